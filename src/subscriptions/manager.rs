//! Per-connection registry of live subscriptions.

use crate::error::ProtocolError;
use crate::store::{StoreClient, WatchId};
use crate::types::QueryId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::types::Subscription;

/// Maps client query ids to live subscriptions.
///
/// An entry leaves the registry exactly once: by `unregister`, by
/// `take_current` when the store reports the source gone, or by
/// `terminate_all` at disconnect. Whichever happens first wins; the others
/// find nothing and do nothing.
pub struct SubscriptionRegistry {
    subscriptions: HashMap<QueryId, Subscription>,
    store: Arc<dyn StoreClient>,
    closed: bool,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self {
            subscriptions: HashMap::new(),
            store,
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn contains(&self, qid: QueryId) -> bool {
        self.subscriptions.contains_key(&qid)
    }

    /// Fail with `DuplicateQueryId` if `qid` is taken.
    pub fn ensure_free(&self, qid: QueryId) -> Result<(), ProtocolError> {
        if self.closed {
            return Err(ProtocolError::SessionClosed);
        }
        if self.contains(qid) {
            return Err(ProtocolError::DuplicateQueryId(qid));
        }
        Ok(())
    }

    /// Add a subscription under its qid.
    ///
    /// On a duplicate qid the existing entry stays active and the new
    /// subscription is detached from the store before the error is returned.
    pub fn register(&mut self, subscription: Subscription) -> Result<(), ProtocolError> {
        let qid = subscription.qid();
        if let Err(e) = self.ensure_free(qid) {
            subscription.terminate(self.store.as_ref());
            return Err(e);
        }

        debug!(qid = %qid, subscription = subscription.kind_name(), "subscription registered");
        self.subscriptions.insert(qid, subscription);
        Ok(())
    }

    /// Terminate and remove the subscription under `qid`.
    ///
    /// Returns false if there was none.
    pub fn unregister(&mut self, qid: QueryId) -> bool {
        match self.subscriptions.remove(&qid) {
            Some(subscription) => {
                subscription.terminate(self.store.as_ref());
                true
            }
            None => false,
        }
    }

    /// The subscription under `qid`, only if it is the one behind `watch`.
    ///
    /// A qid can be reused after unsubscribing, so events still queued for
    /// the old watcher must not reach the new subscription.
    pub fn current(&self, qid: QueryId, watch: WatchId) -> Option<&Subscription> {
        self.subscriptions
            .get(&qid)
            .filter(|s| s.watch_id() == watch)
    }

    /// Remove without detaching, for sources the store already dropped.
    pub fn take_current(&mut self, qid: QueryId, watch: WatchId) -> Option<Subscription> {
        self.current(qid, watch)?;
        self.subscriptions.remove(&qid)
    }

    /// Terminate every subscription and refuse further registrations.
    ///
    /// Returns how many were terminated. Later calls do nothing.
    pub fn terminate_all(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.closed = true;

        let count = self.subscriptions.len();
        for (_, subscription) in self.subscriptions.drain() {
            subscription.terminate(self.store.as_ref());
        }
        count
    }
}
