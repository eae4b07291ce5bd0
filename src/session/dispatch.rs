//! Request dispatch and handlers.

use crate::error::{ProtocolError, RequestError, Result, StoreError};
use crate::proto::{
    CreateRequest, DeleteRequest, GetDataRequest, GetRequest, ListRequest, Reply, Request,
    RequestBody, UnsubRequest,
};
use crate::subscriptions::Subscription;
use crate::types::{ListQuery, ObjectId, RequestId, Value};
use tracing::{debug, warn};

use super::Session;

type HandlerResult = std::result::Result<(), RequestError>;

impl Session {
    /// Run the handler for one request.
    ///
    /// Protocol faults are answered with `proto_error` and the session
    /// carries on. The returned error is always transport-fatal.
    pub fn dispatch(&mut self, request: Request) -> Result<()> {
        let rid = request.rid;
        debug!(conn = %self.id, kind = request.kind().as_str(), rid = ?rid, "request");

        let outcome = match request.body {
            RequestBody::Create(body) => self.handle_create(rid, body),
            RequestBody::Delete(body) => self.handle_delete(rid, body),
            RequestBody::List(body) => self.handle_list(body),
            RequestBody::Get(body) => self.handle_get(body),
            RequestBody::GetData(body) => self.handle_get_data(body),
            RequestBody::Unsub(body) => self.handle_unsub(body),
            RequestBody::Extension(kind) => Err(ProtocolError::Unsupported(kind.as_str()).into()),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(RequestError::Protocol(error)) => self.reply_fault(rid, error),
            Err(RequestError::Fatal(error)) => Err(error),
        }
    }

    pub(super) fn reply_fault(&mut self, rid: Option<RequestId>, error: ProtocolError) -> Result<()> {
        warn!(conn = %self.id, rid = ?rid, error = %error, "protocol fault");
        self.outbox.send(Reply::ProtoError {
            error: error.to_string(),
            rid,
        })
    }

    fn ack(&self, rid: Option<RequestId>) -> HandlerResult {
        if let Some(rid) = rid {
            self.outbox.send(Reply::Ack { rid })?;
        }
        Ok(())
    }

    fn handle_create(&mut self, rid: Option<RequestId>, body: CreateRequest) -> HandlerResult {
        self.store.create(body.into_snapshot())?;
        self.deliver_pending()?;
        self.ack(rid)
    }

    /// All ids are validated before anything is deleted.
    fn handle_delete(&mut self, rid: Option<RequestId>, body: DeleteRequest) -> HandlerResult {
        let ids = body
            .ids
            .iter()
            .map(|value| match value {
                Value::Bin(bytes) => ObjectId::from_slice(bytes),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .ok_or(ProtocolError::InvalidObjectId)?;

        for id in &ids {
            self.store.delete(id)?;
        }
        self.deliver_pending()?;
        self.ack(rid)
    }

    fn handle_list(&mut self, body: ListRequest) -> HandlerResult {
        let qid = body.qid;
        self.registry.ensure_free(qid)?;

        let query = ListQuery {
            parent: body.parent,
            pos_start: body.pos_start,
            pos_end: body.pos_end,
            tags: body
                .tags
                .into_iter()
                .map(|set| set.into_iter().collect())
                .collect(),
        };

        let watcher = body.sub.then(|| self.new_watcher(qid));
        let watch = watcher.as_ref().map(|w| w.id());

        let initial = match self.store.run_list_query(&query, watcher) {
            Ok(diff) => diff,
            Err(StoreError::ObjectNotFound(_)) => {
                self.outbox.send(Reply::ObjGone { qid })?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(watch) = watch {
            self.registry.register(Subscription::list(qid, watch, query))?;
        }
        self.outbox.send(Reply::list(qid, &initial))?;
        Ok(())
    }

    fn handle_get(&mut self, body: GetRequest) -> HandlerResult {
        let qid = body.qid;
        self.registry.ensure_free(qid)?;

        if !body.sub {
            let reply = match self.store.get(&body.id) {
                Some(snapshot) => Reply::object(qid, &snapshot),
                None => Reply::ObjGone { qid },
            };
            self.outbox.send(reply)?;
            return Ok(());
        }

        let watcher = self.new_watcher(qid);
        let watch = watcher.id();
        match self.store.add_sub(&body.id, watcher) {
            Ok(snapshot) => {
                self.registry
                    .register(Subscription::object(qid, watch, body.id))?;
                self.outbox.send(Reply::object(qid, &snapshot))?;
            }
            Err(StoreError::ObjectNotFound(_)) => self.outbox.send(Reply::ObjGone { qid })?,
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn handle_get_data(&mut self, body: GetDataRequest) -> HandlerResult {
        let qid = body.qid;
        self.registry.ensure_free(qid)?;

        let fetched = if body.sub {
            let watcher = self.new_watcher(qid);
            let watch = watcher.id();
            self.store
                .add_data_sub(&body.id, &body.key, watcher)
                .map(|data| (data, Some(watch)))
        } else {
            self.store.get_data(&body.id, &body.key).map(|data| (data, None))
        };

        match fetched {
            Ok((data, watch)) => {
                if let Some(watch) = watch {
                    self.registry
                        .register(Subscription::data(qid, watch, body.id, body.key))?;
                }
                self.outbox.send(Reply::GetDataReply { qid, data })?;
            }
            Err(StoreError::ObjectNotFound(_)) => self.outbox.send(Reply::ObjGone { qid })?,
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Always answered with `sub_gone`, whether or not `qid` was live.
    fn handle_unsub(&mut self, body: UnsubRequest) -> HandlerResult {
        let removed = self.registry.unregister(body.qid);
        debug!(conn = %self.id, qid = %body.qid, removed, "unsubscribe");
        self.outbox.send(Reply::SubGone { qid: body.qid })?;
        Ok(())
    }
}
