//! Error types for the store interface, the protocol, and connections.

use crate::types::{ObjectId, QueryId};
use thiserror::Error;

/// Rejections raised by the object store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object already exists: {0}")]
    ObjectExists(ObjectId),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Parent not found: {0}")]
    ParentNotFound(ObjectId),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Recoverable, request-scoped faults. Answered with `proto_error`; the
/// connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("qid already in use: {0}")]
    DuplicateQueryId(QueryId),

    #[error("obj is not valid id")]
    InvalidObjectId,

    #[error("unsupported request: {0}")]
    Unsupported(&'static str),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: String, reason: String },

    #[error("connection is closing")]
    SessionClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Transport-fatal conditions. The connection is closed and torn down.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("Outbound queue overflowed")]
    OutboxOverflow,

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Connection closed")]
    Closed,
}

impl From<rmp_serde::encode::Error> for ConnectionError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ConnectionError::Encode(e.to_string())
    }
}

/// Outcome of a failed request handler.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Fatal(#[from] ConnectionError),
}

impl From<StoreError> for RequestError {
    fn from(e: StoreError) -> Self {
        RequestError::Protocol(ProtocolError::Store(e))
    }
}

/// Errors loading server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No listener configured (need a TCP address or a Unix socket path)")]
    NoListener,
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for connection-level operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;
