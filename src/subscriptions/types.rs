//! Subscription variants bound to one connection.

use crate::error::Result;
use crate::proto::Reply;
use crate::session::Outbox;
use crate::store::{StoreClient, WatchEventKind, WatchId};
use crate::types::{ListQuery, ObjectId, QueryId};
use tracing::warn;

/// Full-snapshot subscription on one object.
#[derive(Clone, Debug)]
pub struct ObjectSubscription {
    pub qid: QueryId,
    pub watch: WatchId,
    pub object: ObjectId,
}

/// Subscription on one data slot of an object.
#[derive(Clone, Debug)]
pub struct DataSubscription {
    pub qid: QueryId,
    pub watch: WatchId,
    pub object: ObjectId,
    pub key: String,
}

/// Standing list query, delivered as incremental diffs.
#[derive(Clone, Debug)]
pub struct ListSubscription {
    pub qid: QueryId,
    pub watch: WatchId,
    pub query: ListQuery,
}

/// A live subscription.
///
/// Owned by exactly one registry entry. `terminate` and `source_gone` consume
/// it, so neither can run twice.
#[derive(Clone, Debug)]
pub enum Subscription {
    Object(ObjectSubscription),
    Data(DataSubscription),
    List(ListSubscription),
}

impl Subscription {
    pub fn object(qid: QueryId, watch: WatchId, object: ObjectId) -> Self {
        Subscription::Object(ObjectSubscription { qid, watch, object })
    }

    pub fn data(qid: QueryId, watch: WatchId, object: ObjectId, key: String) -> Self {
        Subscription::Data(DataSubscription {
            qid,
            watch,
            object,
            key,
        })
    }

    pub fn list(qid: QueryId, watch: WatchId, query: ListQuery) -> Self {
        Subscription::List(ListSubscription { qid, watch, query })
    }

    pub fn qid(&self) -> QueryId {
        match self {
            Subscription::Object(s) => s.qid,
            Subscription::Data(s) => s.qid,
            Subscription::List(s) => s.qid,
        }
    }

    pub fn watch_id(&self) -> WatchId {
        match self {
            Subscription::Object(s) => s.watch,
            Subscription::Data(s) => s.watch,
            Subscription::List(s) => s.watch,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Subscription::Object(_) => "object",
            Subscription::Data(_) => "data",
            Subscription::List(_) => "list",
        }
    }

    /// Turn a change event into a push message for the client.
    pub fn notify(&self, event: WatchEventKind, outbox: &Outbox) -> Result<()> {
        let reply = match (self, event) {
            (Subscription::Object(s), WatchEventKind::ObjectChanged(snapshot)) => {
                Reply::object(s.qid, &snapshot)
            }
            (Subscription::Data(s), WatchEventKind::DataChanged(data)) => Reply::GetDataReply {
                qid: s.qid,
                data,
            },
            (Subscription::List(s), WatchEventKind::ListChanged(diff)) => {
                if diff.is_empty() {
                    return Ok(());
                }
                Reply::list(s.qid, &diff)
            }
            (sub, event) => {
                warn!(
                    qid = %sub.qid(),
                    subscription = sub.kind_name(),
                    event = ?event,
                    "ignoring event that does not match subscription"
                );
                return Ok(());
            }
        };
        outbox.send(reply)
    }

    /// The store deleted the watched source and already dropped the watcher.
    pub fn source_gone(self, outbox: &Outbox) -> Result<()> {
        outbox.send(Reply::ObjGone { qid: self.qid() })
    }

    /// Detach from the store.
    pub fn terminate(self, store: &dyn StoreClient) {
        store.remove_watch(self.watch_id());
    }
}
