//! Applying pushed list diffs in order reproduces the store's matching set.

use livestore::proto::{ListEntry, ListRequest};
use livestore::types::OBJECT_ID_LEN;
use livestore::{
    ConnectionIds, ListQuery, MemoryStore, ObjectId, ObjectSnapshot, ObjectUpdate, Outbox,
    PosRange, QueryId, Reply, Request, RequestBody, Session, StoreClient,
};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

const PARENT: u8 = 0;

fn oid(n: u8) -> ObjectId {
    ObjectId([n; OBJECT_ID_LEN])
}

#[derive(Clone, Debug)]
enum Op {
    Create { id: u8, tags: Vec<&'static str>, pos: (i64, i64) },
    CreateGrandchild { id: u8, under: u8 },
    Delete(u8),
    AddTag(u8, &'static str),
    RemoveTag(u8, &'static str),
    SetPos(u8, i64, i64),
    SetAttr(u8, i64),
}

fn tag() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("red"), Just("blue"), Just("big")]
}

fn pos() -> impl Strategy<Value = (i64, i64)> {
    (-5i64..20, 0i64..10).prop_map(|(start, len)| (start, start + len))
}

fn op() -> impl Strategy<Value = Op> {
    let id = 1u8..8;
    prop_oneof![
        (id.clone(), proptest::collection::vec(tag(), 0..3), pos())
            .prop_map(|(id, tags, pos)| Op::Create { id, tags, pos }),
        (20u8..24, id.clone()).prop_map(|(id, under)| Op::CreateGrandchild { id, under }),
        id.clone().prop_map(Op::Delete),
        (id.clone(), tag()).prop_map(|(id, tag)| Op::AddTag(id, tag)),
        (id.clone(), tag()).prop_map(|(id, tag)| Op::RemoveTag(id, tag)),
        (id.clone(), pos()).prop_map(|(id, (start, end))| Op::SetPos(id, start, end)),
        (id, any::<i64>()).prop_map(|(id, n)| Op::SetAttr(id, n)),
    ]
}

/// Store errors (duplicate ids, missing objects) are part of the sequence.
fn apply(store: &MemoryStore, op: Op) {
    let _ = match op {
        Op::Create { id, tags, pos } => {
            let mut object = ObjectSnapshot::new(oid(id))
                .with_parent(oid(PARENT))
                .with_pos(pos.0, pos.1);
            for tag in tags {
                object = object.with_tag(tag);
            }
            store.create(object)
        }
        Op::CreateGrandchild { id, under } => {
            store.create(ObjectSnapshot::new(oid(id)).with_parent(oid(under)).with_tag("red"))
        }
        Op::Delete(id) => store.delete(&oid(id)),
        Op::AddTag(id, tag) => store.update(&oid(id), vec![ObjectUpdate::AddTag(tag.to_string())]),
        Op::RemoveTag(id, tag) => {
            store.update(&oid(id), vec![ObjectUpdate::RemoveTag(tag.to_string())])
        }
        Op::SetPos(id, start, end) => {
            store.update(&oid(id), vec![ObjectUpdate::SetPos(PosRange::new(start, end))])
        }
        Op::SetAttr(id, n) => store.update(
            &oid(id),
            vec![ObjectUpdate::SetAttr("n".to_string(), n.into())],
        ),
    };
}

fn current_matches(store: &MemoryStore, query: &ListQuery) -> BTreeSet<ObjectId> {
    store
        .run_list_query(query, None)
        .unwrap()
        .new
        .iter()
        .map(|object| object.id)
        .collect()
}

proptest! {
    #[test]
    fn diffs_reconstruct_matching_set(
        ops in proptest::collection::vec(op(), 1..60),
        tag_filter in proptest::collection::vec(proptest::collection::vec(tag(), 1..3), 0..3),
        window in proptest::option::of((0i64..10, 10i64..20)),
    ) {
        let store = Arc::new(MemoryStore::new());
        store.create(ObjectSnapshot::new(oid(PARENT))).unwrap();

        let ids = ConnectionIds::new();
        let (outbox, replies) = Outbox::bounded(4096);
        let (mut session, events) = Session::new(store.clone(), &ids, outbox);

        let request = ListRequest {
            qid: QueryId(1),
            parent: Some(oid(PARENT)),
            pos_start: window.map(|w| w.0),
            pos_end: window.map(|w| w.1),
            tags: tag_filter
                .iter()
                .map(|set| set.iter().map(|t| t.to_string()).collect())
                .collect(),
            sub: true,
        };
        let query = ListQuery {
            parent: request.parent,
            pos_start: request.pos_start,
            pos_end: request.pos_end,
            tags: request
                .tags
                .iter()
                .map(|set| set.iter().cloned().collect())
                .collect(),
        };
        let frame = Request::new(RequestBody::List(request)).encode().unwrap();
        session.handle_frame(&frame).unwrap();
        let initial: Vec<Reply> = replies.try_iter().collect();
        prop_assert_eq!(initial, vec![Reply::ListReply { qid: QueryId(1), objs: Vec::new() }]);

        let mut visible: BTreeSet<ObjectId> = BTreeSet::new();
        let mut latest_n: HashMap<ObjectId, i64> = HashMap::new();

        for op in ops {
            apply(&store, op);
            for event in events.try_iter().collect::<Vec<_>>() {
                session.deliver(event).unwrap();
            }
            for reply in replies.try_iter() {
                match reply {
                    Reply::ListReply { qid, objs } => {
                        prop_assert_eq!(qid, QueryId(1));
                        prop_assert!(!objs.is_empty());
                        for ListEntry { id, gone, object } in objs {
                            if gone {
                                visible.remove(&id);
                            } else {
                                visible.insert(id);
                                if let Some(livestore::Value::Int(n)) =
                                    object.as_ref().and_then(|o| o.attr.get("n"))
                                {
                                    latest_n.insert(id, *n);
                                }
                            }
                        }
                    }
                    other => prop_assert!(false, "unexpected reply {:?}", other),
                }
            }
            prop_assert_eq!(&visible, &current_matches(&store, &query));
        }

        // Visible objects were last reported with their current attributes.
        for id in &visible {
            let stored = store.get(id).unwrap();
            if let Some(livestore::Value::Int(n)) = stored.attr.get("n") {
                prop_assert_eq!(latest_n.get(id), Some(n));
            }
        }
    }
}
