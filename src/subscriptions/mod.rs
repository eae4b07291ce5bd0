//! Client subscriptions and their per-connection registry.
//!
//! Three variants share one capability set:
//! - [`ObjectSubscription`]: full snapshot of one object on every change
//! - [`DataSubscription`]: the value of one data slot on every change
//! - [`ListSubscription`]: incremental diffs of a filtered child listing
//!
//! Ownership runs connection → registry → subscription. A subscription holds
//! no reference back to its connection; the session passes its outbox in
//! when a notification is delivered.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = SubscriptionRegistry::new(store.clone());
//! registry.register(Subscription::object(qid, watch, id))?;
//!
//! // Client unsubscribes: detached from the store, entry removed.
//! registry.unregister(qid);
//!
//! // Disconnect: everything left is detached exactly once.
//! registry.terminate_all();
//! ```

mod manager;
mod types;

pub use manager::SubscriptionRegistry;
pub use types::{DataSubscription, ListSubscription, ObjectSubscription, Subscription};
