//! In-memory object store with change notification and incremental list diffs.

use crate::error::{StoreError, StoreResult};
use crate::types::{
    ConnectionId, ListDiff, ListQuery, ObjectId, ObjectSnapshot, ObjectUpdate, Value,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use super::{StoreClient, WatchEventKind, WatchId, Watcher};

/// Counters for tests and diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub objects: usize,
    pub connections: usize,
    /// Object and data watchers.
    pub watches: usize,
    /// Standing list queries.
    pub list_queries: usize,
}

struct DataWatch {
    key: String,
    watcher: Watcher,
}

struct ListWatch {
    query: ListQuery,
    /// Ids the client currently believes are visible.
    visible: HashSet<ObjectId>,
    watcher: Watcher,
}

/// Where a watcher lives, for O(1) detach.
#[derive(Clone, Copy)]
enum WatchTarget {
    Object(ObjectId),
    Data(ObjectId),
    List(Option<ObjectId>),
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<ObjectId, ObjectSnapshot>,
    /// Children by parent; `None` holds the root objects.
    children: HashMap<Option<ObjectId>, BTreeSet<ObjectId>>,
    object_watches: HashMap<ObjectId, Vec<Watcher>>,
    data_watches: HashMap<ObjectId, Vec<DataWatch>>,
    list_watches: HashMap<Option<ObjectId>, Vec<ListWatch>>,
    watch_index: HashMap<WatchId, WatchTarget>,
    connections: HashSet<ConnectionId>,
}

impl StoreState {
    fn require(&self, id: &ObjectId) -> StoreResult<&ObjectSnapshot> {
        self.objects.get(id).ok_or(StoreError::ObjectNotFound(*id))
    }

    /// Re-evaluate one child against every list query on its parent and push
    /// the resulting diffs.
    fn refresh_lists(&mut self, parent: Option<ObjectId>, id: ObjectId) {
        let current = self.objects.get(&id);
        let Some(watches) = self.list_watches.get_mut(&parent) else {
            return;
        };

        for watch in watches.iter_mut() {
            let diff = match current {
                Some(object) if watch.query.matches(object) => {
                    watch.visible.insert(id);
                    ListDiff {
                        new: vec![object.clone()],
                        gone: Vec::new(),
                    }
                }
                _ if watch.visible.remove(&id) => ListDiff {
                    new: Vec::new(),
                    gone: vec![id],
                },
                _ => continue,
            };
            watch.watcher.send(WatchEventKind::ListChanged(diff));
        }
    }

    /// Ids of `id` and all its descendants, children before parents.
    ///
    /// Iterative: nesting depth is client-controlled.
    fn subtree_post_order(&self, id: ObjectId, out: &mut Vec<ObjectId>) {
        let mut stack = vec![(id, false)];
        while let Some((next, expanded)) = stack.pop() {
            if expanded {
                out.push(next);
                continue;
            }
            stack.push((next, true));
            if let Some(children) = self.children.get(&Some(next)) {
                stack.extend(children.iter().rev().map(|child| (*child, false)));
            }
        }
    }

    fn remove_object(&mut self, id: ObjectId) {
        let Some(object) = self.objects.remove(&id) else {
            return;
        };

        if let Some(siblings) = self.children.get_mut(&object.parent) {
            siblings.remove(&id);
            if siblings.is_empty() {
                self.children.remove(&object.parent);
            }
        }
        self.children.remove(&Some(id));

        for watcher in self.object_watches.remove(&id).unwrap_or_default() {
            self.watch_index.remove(&watcher.id());
            watcher.send(WatchEventKind::Gone);
        }
        for watch in self.data_watches.remove(&id).unwrap_or_default() {
            self.watch_index.remove(&watch.watcher.id());
            watch.watcher.send(WatchEventKind::Gone);
        }
        for watch in self.list_watches.remove(&Some(id)).unwrap_or_default() {
            self.watch_index.remove(&watch.watcher.id());
            watch.watcher.send(WatchEventKind::Gone);
        }

        self.refresh_lists(object.parent, id);
    }

    fn detach_watch(&mut self, id: WatchId) -> bool {
        let Some(target) = self.watch_index.remove(&id) else {
            return false;
        };

        match target {
            WatchTarget::Object(object) => {
                if let Some(list) = self.object_watches.get_mut(&object) {
                    list.retain(|w| w.id() != id);
                    if list.is_empty() {
                        self.object_watches.remove(&object);
                    }
                }
            }
            WatchTarget::Data(object) => {
                if let Some(list) = self.data_watches.get_mut(&object) {
                    list.retain(|w| w.watcher.id() != id);
                    if list.is_empty() {
                        self.data_watches.remove(&object);
                    }
                }
            }
            WatchTarget::List(parent) => {
                if let Some(list) = self.list_watches.get_mut(&parent) {
                    list.retain(|w| w.watcher.id() != id);
                    if list.is_empty() {
                        self.list_watches.remove(&parent);
                    }
                }
            }
        }
        true
    }
}

/// Thread-safe in-memory store.
///
/// All state sits behind one lock, and notifications are pushed while it is
/// held, so every watcher observes changes in commit order.
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Apply changes to an existing object and notify its watchers.
    ///
    /// The batch is validated first; on error nothing is applied.
    pub fn update(&self, id: &ObjectId, changes: Vec<ObjectUpdate>) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.require(id)?;

        for change in &changes {
            if let ObjectUpdate::SetPos(pos) = change {
                if pos.start > pos.end {
                    return Err(StoreError::InvalidOperation(format!(
                        "position start {} is after end {}",
                        pos.start, pos.end
                    )));
                }
            }
        }

        let mut touched_keys = BTreeSet::new();
        let snapshot = {
            let object = state
                .objects
                .get_mut(id)
                .ok_or(StoreError::ObjectNotFound(*id))?;
            for change in changes {
                match change {
                    ObjectUpdate::SetAttr(key, value) => {
                        object.attr.insert(key, value);
                    }
                    ObjectUpdate::RemoveAttr(key) => {
                        object.attr.remove(&key);
                    }
                    ObjectUpdate::SetData(key, value) => {
                        object.data.insert(key.clone(), value);
                        touched_keys.insert(key);
                    }
                    ObjectUpdate::RemoveData(key) => {
                        object.data.remove(&key);
                        touched_keys.insert(key);
                    }
                    ObjectUpdate::AddTag(tag) => {
                        object.tags.insert(tag);
                    }
                    ObjectUpdate::RemoveTag(tag) => {
                        object.tags.remove(&tag);
                    }
                    ObjectUpdate::SetPos(pos) => object.pos = pos,
                    ObjectUpdate::SetBinData(bytes) => object.bindata = bytes,
                }
            }
            object.clone()
        };

        if let Some(watchers) = state.object_watches.get(id) {
            for watcher in watchers {
                watcher.send(WatchEventKind::ObjectChanged(snapshot.clone()));
            }
        }
        if let Some(watches) = state.data_watches.get(id) {
            for watch in watches.iter().filter(|w| touched_keys.contains(&w.key)) {
                let value = snapshot.data.get(&watch.key).cloned().unwrap_or_default();
                watch.watcher.send(WatchEventKind::DataChanged(value));
            }
        }
        state.refresh_lists(snapshot.parent, *id);

        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            objects: state.objects.len(),
            connections: state.connections.len(),
            watches: state.object_watches.values().map(Vec::len).sum::<usize>()
                + state.data_watches.values().map(Vec::len).sum::<usize>(),
            list_queries: state.list_watches.values().map(Vec::len).sum(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreClient for MemoryStore {
    fn attach(&self, conn: ConnectionId) {
        self.state.lock().connections.insert(conn);
    }

    fn detach(&self, conn: ConnectionId) {
        let mut state = self.state.lock();
        state.connections.remove(&conn);

        let leftovers: Vec<WatchId> = state
            .watch_index
            .keys()
            .filter(|id| id.conn == conn)
            .copied()
            .collect();
        if !leftovers.is_empty() {
            warn!(conn = %conn, count = leftovers.len(), "dropping watchers left by detached connection");
            for id in leftovers {
                state.detach_watch(id);
            }
        }
    }

    fn create(&self, object: ObjectSnapshot) -> StoreResult<()> {
        let mut state = self.state.lock();

        if state.objects.contains_key(&object.id) {
            return Err(StoreError::ObjectExists(object.id));
        }
        if let Some(parent) = object.parent {
            if !state.objects.contains_key(&parent) {
                return Err(StoreError::ParentNotFound(parent));
            }
        }
        if object.pos.start > object.pos.end {
            return Err(StoreError::InvalidOperation(format!(
                "position start {} is after end {}",
                object.pos.start, object.pos.end
            )));
        }

        let (id, parent) = (object.id, object.parent);
        state.children.entry(parent).or_default().insert(id);
        state.objects.insert(id, object);
        state.refresh_lists(parent, id);

        debug!(id = %id, "object created");
        Ok(())
    }

    fn delete(&self, id: &ObjectId) -> StoreResult<()> {
        let mut state = self.state.lock();
        if !state.objects.contains_key(id) {
            return Ok(());
        }

        let mut doomed = Vec::new();
        state.subtree_post_order(*id, &mut doomed);
        for victim in &doomed {
            state.remove_object(*victim);
        }

        debug!(id = %id, removed = doomed.len(), "object deleted");
        Ok(())
    }

    fn get(&self, id: &ObjectId) -> Option<ObjectSnapshot> {
        self.state.lock().objects.get(id).cloned()
    }

    fn get_data(&self, id: &ObjectId, key: &str) -> StoreResult<Value> {
        let state = self.state.lock();
        let object = state.require(id)?;
        Ok(object.data.get(key).cloned().unwrap_or_default())
    }

    fn add_sub(&self, id: &ObjectId, watcher: Watcher) -> StoreResult<ObjectSnapshot> {
        let mut state = self.state.lock();
        let snapshot = state.require(id)?.clone();

        state.watch_index.insert(watcher.id(), WatchTarget::Object(*id));
        state.object_watches.entry(*id).or_default().push(watcher);
        Ok(snapshot)
    }

    fn add_data_sub(&self, id: &ObjectId, key: &str, watcher: Watcher) -> StoreResult<Value> {
        let mut state = self.state.lock();
        let value = state.require(id)?.data.get(key).cloned().unwrap_or_default();

        state.watch_index.insert(watcher.id(), WatchTarget::Data(*id));
        state.data_watches.entry(*id).or_default().push(DataWatch {
            key: key.to_string(),
            watcher,
        });
        Ok(value)
    }

    fn run_list_query(&self, query: &ListQuery, watcher: Option<Watcher>) -> StoreResult<ListDiff> {
        let mut state = self.state.lock();
        if let Some(parent) = &query.parent {
            state.require(parent)?;
        }

        let new: Vec<ObjectSnapshot> = state
            .children
            .get(&query.parent)
            .into_iter()
            .flatten()
            .filter_map(|child| state.objects.get(child))
            .filter(|object| query.matches(object))
            .cloned()
            .collect();

        if let Some(watcher) = watcher {
            state.watch_index.insert(watcher.id(), WatchTarget::List(query.parent));
            state.list_watches.entry(query.parent).or_default().push(ListWatch {
                query: query.clone(),
                visible: new.iter().map(|o| o.id).collect(),
                watcher,
            });
        }

        Ok(ListDiff {
            new,
            gone: Vec::new(),
        })
    }

    fn remove_watch(&self, id: WatchId) {
        self.state.lock().detach_watch(id);
    }
}
