//! Connection teardown: every subscription is terminated exactly once.

use livestore::error::StoreResult;
use livestore::proto::{GetDataRequest, GetRequest, ListRequest, UnsubRequest};
use livestore::store::{StoreClient, WatchId, Watcher};
use livestore::types::OBJECT_ID_LEN;
use livestore::{
    ConnectionId, ConnectionIds, ListDiff, ListQuery, MemoryStore, ObjectId, ObjectSnapshot,
    Outbox, QueryId, Request, RequestBody, Session, Value,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

fn oid(n: u8) -> ObjectId {
    ObjectId([n; OBJECT_ID_LEN])
}

/// Wraps a [`MemoryStore`] and counts lifecycle calls.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    attached: Mutex<HashMap<ConnectionId, usize>>,
    detached: Mutex<HashMap<ConnectionId, usize>>,
    added: Mutex<HashMap<WatchId, usize>>,
    removed: Mutex<HashMap<WatchId, usize>>,
}

impl CountingStore {
    fn record_add(&self, id: WatchId) {
        *self.added.lock().entry(id).or_default() += 1;
    }
}

impl StoreClient for CountingStore {
    fn attach(&self, conn: ConnectionId) {
        *self.attached.lock().entry(conn).or_default() += 1;
        self.inner.attach(conn);
    }

    fn detach(&self, conn: ConnectionId) {
        *self.detached.lock().entry(conn).or_default() += 1;
        self.inner.detach(conn);
    }

    fn create(&self, object: ObjectSnapshot) -> StoreResult<()> {
        self.inner.create(object)
    }

    fn delete(&self, id: &ObjectId) -> StoreResult<()> {
        self.inner.delete(id)
    }

    fn get(&self, id: &ObjectId) -> Option<ObjectSnapshot> {
        self.inner.get(id)
    }

    fn get_data(&self, id: &ObjectId, key: &str) -> StoreResult<Value> {
        self.inner.get_data(id, key)
    }

    fn add_sub(&self, id: &ObjectId, watcher: Watcher) -> StoreResult<ObjectSnapshot> {
        let watch = watcher.id();
        let snapshot = self.inner.add_sub(id, watcher)?;
        self.record_add(watch);
        Ok(snapshot)
    }

    fn add_data_sub(&self, id: &ObjectId, key: &str, watcher: Watcher) -> StoreResult<Value> {
        let watch = watcher.id();
        let value = self.inner.add_data_sub(id, key, watcher)?;
        self.record_add(watch);
        Ok(value)
    }

    fn run_list_query(&self, query: &ListQuery, watcher: Option<Watcher>) -> StoreResult<ListDiff> {
        let watch = watcher.as_ref().map(Watcher::id);
        let diff = self.inner.run_list_query(query, watcher)?;
        if let Some(watch) = watch {
            self.record_add(watch);
        }
        Ok(diff)
    }

    fn remove_watch(&self, id: WatchId) {
        *self.removed.lock().entry(id).or_default() += 1;
        self.inner.remove_watch(id);
    }
}

fn get(qid: u64, id: ObjectId) -> Request {
    Request::new(RequestBody::Get(GetRequest {
        qid: QueryId(qid),
        id,
        sub: true,
    }))
}

fn send(session: &mut Session, request: Request) {
    session.handle_frame(&request.encode().unwrap()).unwrap();
}

#[test]
fn test_close_terminates_each_subscription_once() {
    let store = Arc::new(CountingStore::default());
    store.create(ObjectSnapshot::new(oid(1))).unwrap();
    store.create(ObjectSnapshot::new(oid(2))).unwrap();

    let ids = ConnectionIds::new();
    let (outbox, _replies) = Outbox::bounded(64);
    let (mut session, _events) = Session::new(store.clone(), &ids, outbox);
    let conn = session.id();

    send(&mut session, get(1, oid(1)));
    send(&mut session, get(2, oid(2)));
    send(
        &mut session,
        Request::new(RequestBody::GetData(GetDataRequest {
            qid: QueryId(3),
            id: oid(1),
            key: "k".to_string(),
            sub: true,
        })),
    );
    send(
        &mut session,
        Request::new(RequestBody::List(ListRequest {
            qid: QueryId(4),
            parent: None,
            pos_start: None,
            pos_end: None,
            tags: Vec::new(),
            sub: true,
        })),
    );
    // Unsubscribed before close: terminated here, not again at close.
    send(
        &mut session,
        Request::new(RequestBody::Unsub(UnsubRequest { qid: QueryId(2) })),
    );
    assert_eq!(session.subscription_count(), 3);

    session.close();

    let added = store.added.lock().clone();
    let removed = store.removed.lock().clone();
    assert_eq!(added.len(), 4);
    assert_eq!(added, removed);
    assert!(removed.values().all(|&count| count == 1));
    assert_eq!(store.attached.lock().get(&conn), Some(&1));
    assert_eq!(store.detached.lock().get(&conn), Some(&1));

    let stats = store.inner.stats();
    assert_eq!(stats.watches, 0);
    assert_eq!(stats.list_queries, 0);
    assert_eq!(stats.connections, 0);
}

#[test]
fn test_source_gone_is_not_terminated_again() {
    let store = Arc::new(CountingStore::default());
    store.create(ObjectSnapshot::new(oid(1))).unwrap();

    let ids = ConnectionIds::new();
    let (outbox, _replies) = Outbox::bounded(64);
    let (mut session, events) = Session::new(store.clone(), &ids, outbox);

    send(&mut session, get(1, oid(1)));
    store.delete(&oid(1)).unwrap();
    for event in events.try_iter().collect::<Vec<_>>() {
        session.deliver(event).unwrap();
    }
    assert_eq!(session.subscription_count(), 0);

    drop(session);

    // The store dropped the watcher itself; nothing asks it to again.
    assert_eq!(store.added.lock().len(), 1);
    assert!(store.removed.lock().is_empty());
}

#[test]
fn test_failed_subscribe_leaves_nothing_to_terminate() {
    let store = Arc::new(CountingStore::default());

    let ids = ConnectionIds::new();
    let (outbox, replies) = Outbox::bounded(64);
    let (mut session, _events) = Session::new(store.clone(), &ids, outbox);

    send(&mut session, get(1, oid(9)));
    assert_eq!(replies.try_iter().count(), 1);
    session.close();

    assert!(store.added.lock().is_empty());
    assert!(store.removed.lock().is_empty());
}

#[test]
fn test_closed_outbox_is_fatal_and_teardown_still_runs() {
    let store = Arc::new(CountingStore::default());
    store.create(ObjectSnapshot::new(oid(1))).unwrap();

    let ids = ConnectionIds::new();
    let (outbox, replies) = Outbox::bounded(64);
    let (mut session, _events) = Session::new(store.clone(), &ids, outbox);

    send(&mut session, get(1, oid(1)));
    drop(replies);

    let frame = get(2, oid(1)).encode().unwrap();
    assert!(session.handle_frame(&frame).is_err());

    drop(session);
    assert_eq!(store.inner.stats().watches, 0);
    let removed = store.removed.lock();
    assert!(removed.values().all(|&count| count == 1));
}
