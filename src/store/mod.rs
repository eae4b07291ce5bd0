//! Object store interface used by sessions.
//!
//! The store is shared by every connection. Sessions never receive callbacks
//! from it directly: each subscription hands the store a [`Watcher`], and the
//! store pushes [`WatchEvent`]s into the owning connection's channel from
//! whatever thread performed the mutation.
//!
//! [`MemoryStore`] is the in-process implementation used by the server binary
//! and the tests.

mod memory;

pub use memory::{MemoryStore, StoreStats};

use crate::error::StoreResult;
use crate::types::{ConnectionId, ListDiff, ListQuery, ObjectId, ObjectSnapshot, QueryId, Value};
use crossbeam_channel::Sender;

/// Store-wide identity of one attached watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId {
    pub conn: ConnectionId,
    pub serial: u64,
}

/// What happened to a watched source.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEventKind {
    /// The watched object changed; carries its new state.
    ObjectChanged(ObjectSnapshot),
    /// The watched data slot changed; `Nil` if the key was removed.
    DataChanged(Value),
    /// The visible set of a list query changed.
    ListChanged(ListDiff),
    /// The watched object (or list parent) was deleted. The store has
    /// already dropped the watcher.
    Gone,
}

/// A notification addressed to one subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct WatchEvent {
    pub id: WatchId,
    pub qid: QueryId,
    pub kind: WatchEventKind,
}

/// Delivery endpoint the store keeps for one subscription.
#[derive(Clone, Debug)]
pub struct Watcher {
    id: WatchId,
    qid: QueryId,
    sink: Sender<WatchEvent>,
}

impl Watcher {
    pub fn new(id: WatchId, qid: QueryId, sink: Sender<WatchEvent>) -> Self {
        Self { id, qid, sink }
    }

    pub fn id(&self) -> WatchId {
        self.id
    }

    pub fn qid(&self) -> QueryId {
        self.qid
    }

    /// Push an event. Never blocks. Returns false if the connection is gone.
    pub fn send(&self, kind: WatchEventKind) -> bool {
        self.sink
            .send(WatchEvent {
                id: self.id,
                qid: self.qid,
                kind,
            })
            .is_ok()
    }
}

/// Operations a session needs from the object store.
///
/// The `add_*` and `run_list_query` calls return the state as of attachment,
/// taken atomically with attaching the watcher, so no change can fall
/// between the initial reply and the first notification.
pub trait StoreClient: Send + Sync {
    /// Register a new connection.
    fn attach(&self, conn: ConnectionId);

    /// Forget a connection. Called after all its watchers were removed.
    fn detach(&self, conn: ConnectionId);

    fn create(&self, object: ObjectSnapshot) -> StoreResult<()>;

    /// Delete an object and its descendants. Unknown ids are a no-op.
    fn delete(&self, id: &ObjectId) -> StoreResult<()>;

    fn get(&self, id: &ObjectId) -> Option<ObjectSnapshot>;

    /// Value stored under `key`, `Nil` if the object has no such slot.
    fn get_data(&self, id: &ObjectId, key: &str) -> StoreResult<Value>;

    /// Watch an object for changes.
    fn add_sub(&self, id: &ObjectId, watcher: Watcher) -> StoreResult<ObjectSnapshot>;

    /// Watch one data slot of an object.
    fn add_data_sub(&self, id: &ObjectId, key: &str, watcher: Watcher) -> StoreResult<Value>;

    /// Run a list query. The returned diff holds every current match as new.
    /// With a watcher, later changes to the visible set are pushed to it.
    fn run_list_query(&self, query: &ListQuery, watcher: Option<Watcher>) -> StoreResult<ListDiff>;

    /// Detach a watcher. Unknown ids are a no-op.
    fn remove_watch(&self, id: WatchId);
}
