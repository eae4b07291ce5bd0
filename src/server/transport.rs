//! Stream transports a connection can run over.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// A bidirectional byte stream that can be split across threads.
pub trait Transport: Read + Write + Send + Sized + 'static {
    /// Another handle to the same stream, for the reader or writer thread.
    fn split_clone(&self) -> io::Result<Self>;

    /// Shut down both directions, unblocking any thread using a clone.
    fn close(&self);

    /// Bound how long a single write may block. `None` waits forever.
    fn limit_writes(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Human-readable peer description for logs.
    fn peer_label(&self) -> String;
}

impl Transport for TcpStream {
    fn split_clone(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn close(&self) {
        let _ = self.shutdown(Shutdown::Both);
    }

    fn limit_writes(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_write_timeout(timeout)
    }

    fn peer_label(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "tcp:unknown".to_string())
    }
}

#[cfg(unix)]
impl Transport for UnixStream {
    fn split_clone(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn close(&self) {
        let _ = self.shutdown(Shutdown::Both);
    }

    fn limit_writes(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_write_timeout(timeout)
    }

    fn peer_label(&self) -> String {
        self.peer_addr()
            .ok()
            .and_then(|addr| addr.as_pathname().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "unix".to_string())
    }
}
