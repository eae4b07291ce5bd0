//! Outbound reply queue for one connection.

use crate::error::{ConnectionError, Result};
use crate::proto::Reply;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Default number of replies that may wait for the writer (per connection).
pub const DEFAULT_OUTBOUND_BUFFER: usize = 4096;

/// Cloneable handle that queues replies for the connection's writer.
///
/// Only the writer touches the transport, so frames are never interleaved.
/// A full queue means the client stopped reading, which is fatal.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: Sender<Reply>,
}

impl Outbox {
    /// Create an outbox and the receiving end the writer drains.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Reply>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn send(&self, reply: Reply) -> Result<()> {
        match self.tx.try_send(reply) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ConnectionError::OutboxOverflow),
            Err(TrySendError::Disconnected(_)) => Err(ConnectionError::Closed),
        }
    }
}
