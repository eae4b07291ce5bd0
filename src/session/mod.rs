//! Per-connection session state machine.
//!
//! A [`Session`] owns the subscription registry and the outbox of one
//! connection. It is driven from a single thread: inbound frames go through
//! [`Session::handle_frame`] (or [`Session::dispatch`] for decoded requests),
//! and store notifications arrive on the channel returned by
//! [`Session::new`] and go through [`Session::deliver`]. Because both paths
//! run on the same thread, a notification is never handled in the middle of
//! a request.
//!
//! Dropping the session terminates every live subscription and then detaches
//! the connection from the store.

mod dispatch;
mod outbox;

pub use outbox::{Outbox, DEFAULT_OUTBOUND_BUFFER};

use crate::error::Result;
use crate::proto::Request;
use crate::store::{StoreClient, WatchEvent, WatchEventKind, WatchId, Watcher};
use crate::subscriptions::SubscriptionRegistry;
use crate::types::{ConnectionId, QueryId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Process-scoped allocator of connection ids.
#[derive(Debug)]
pub struct ConnectionIds {
    next: AtomicU64,
}

impl ConnectionIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ConnectionIds {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one client connection.
pub struct Session {
    id: ConnectionId,
    store: Arc<dyn StoreClient>,
    registry: SubscriptionRegistry,
    outbox: Outbox,
    events: Sender<WatchEvent>,
    /// Second handle on the notification channel, for draining inside a
    /// handler.
    inbox: Receiver<WatchEvent>,
    next_watch: u64,
}

impl Session {
    /// Attach a new connection to the store.
    ///
    /// Returns the session and the receiver for its store notifications; the
    /// caller feeds every event from it to [`Session::deliver`].
    pub fn new(
        store: Arc<dyn StoreClient>,
        ids: &ConnectionIds,
        outbox: Outbox,
    ) -> (Self, Receiver<WatchEvent>) {
        let id = ids.next_id();
        store.attach(id);

        let (events, rx) = unbounded();
        let session = Self {
            id,
            registry: SubscriptionRegistry::new(store.clone()),
            store,
            outbox,
            events,
            inbox: rx.clone(),
            next_watch: 0,
        };
        (session, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    pub fn has_subscription(&self, qid: QueryId) -> bool {
        self.registry.contains(qid)
    }

    /// Decode and dispatch one complete frame.
    ///
    /// Frames that are valid MessagePack but not a valid request are answered
    /// with `proto_error`. Only transport-level failures are returned.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<()> {
        match Request::decode(frame) {
            Ok(request) => self.dispatch(request),
            Err(rejected) => self.reply_fault(rejected.rid, rejected.error),
        }
    }

    /// Deliver a store notification.
    ///
    /// Events for subscriptions that are no longer registered (unsubscribed,
    /// already gone, or replaced under a reused qid) are dropped.
    pub fn deliver(&mut self, event: WatchEvent) -> Result<()> {
        let WatchEvent { id, qid, kind } = event;
        match kind {
            WatchEventKind::Gone => match self.registry.take_current(qid, id) {
                Some(subscription) => {
                    debug!(conn = %self.id, qid = %qid, "subscription source gone");
                    subscription.source_gone(&self.outbox)
                }
                None => Ok(()),
            },
            kind => match self.registry.current(qid, id) {
                Some(subscription) => subscription.notify(kind, &self.outbox),
                None => {
                    trace!(conn = %self.id, qid = %qid, "dropping stale notification");
                    Ok(())
                }
            },
        }
    }

    /// Deliver every notification already queued for this connection.
    ///
    /// Mutating handlers call this before acknowledging, so a client that
    /// changes something it watches sees the push before the `ack`.
    pub fn deliver_pending(&mut self) -> Result<()> {
        while let Ok(event) = self.inbox.try_recv() {
            self.deliver(event)?;
        }
        Ok(())
    }

    /// End the session. Same as dropping it.
    pub fn close(self) {}

    fn new_watcher(&mut self, qid: QueryId) -> Watcher {
        self.next_watch += 1;
        let id = WatchId {
            conn: self.id,
            serial: self.next_watch,
        };
        Watcher::new(id, qid, self.events.clone())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let terminated = self.registry.terminate_all();
        self.store.detach(self.id);
        debug!(conn = %self.id, terminated, "session closed");
    }
}
