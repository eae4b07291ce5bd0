//! # livestore
//!
//! Session and protocol layer of a live object-sync server.
//!
//! Clients speak a stream of MessagePack requests over TCP or a Unix socket.
//! They create and delete objects, fetch them once, or subscribe to an
//! object, one data slot, or a filtered child listing and receive pushed
//! updates until they unsubscribe or disconnect.
//!
//! ## Layers
//!
//! - [`proto`]: frame decoding, request and reply messages
//! - [`store`]: the object store interface and an in-memory implementation
//! - [`subscriptions`]: per-connection subscription registry
//! - [`session`]: request dispatch and push delivery for one connection
//! - [`server`]: listeners and per-connection threads
//!
//! ## Example
//!
//! ```ignore
//! use livestore::{MemoryStore, Server, ServerConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let server = Server::new(store, ServerConfig::default());
//! server.run()?;
//! ```

pub mod error;
pub mod logging;
pub mod proto;
pub mod server;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{ConfigError, ConnectionError, ProtocolError, Result, StoreError};
pub use proto::{FrameDecoder, Reply, Request, RequestBody, RequestKind};
pub use server::{serve_connection, Server, ServerConfig, Transport};
pub use session::{ConnectionIds, Outbox, Session};
pub use store::{MemoryStore, StoreClient, StoreStats, WatchEvent, WatchEventKind, WatchId, Watcher};
pub use subscriptions::{Subscription, SubscriptionRegistry};
pub use types::{
    ConnectionId, ListDiff, ListQuery, ObjectId, ObjectSnapshot, ObjectUpdate, PosRange, QueryId,
    RequestId, Value,
};
