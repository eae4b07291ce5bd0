//! Listeners and the per-connection driver.
//!
//! The server accepts stream connections (TCP, and Unix sockets on Unix
//! targets) and runs each one on its own threads. All connections share one
//! [`StoreClient`] and one [`ConnectionIds`] allocator.

mod config;
mod connection;
mod transport;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use connection::serve_connection;
pub use transport::Transport;

use crate::session::ConnectionIds;
use crate::store::StoreClient;
use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

#[cfg(unix)]
use std::os::unix::net::UnixListener;

/// Accepts connections and hands each to [`serve_connection`].
#[derive(Clone)]
pub struct Server {
    store: Arc<dyn StoreClient>,
    ids: Arc<ConnectionIds>,
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(store: Arc<dyn StoreClient>, config: ServerConfig) -> Self {
        Self {
            store,
            ids: Arc::new(ConnectionIds::new()),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind every configured listener and serve until they all fail.
    pub fn run(&self) -> io::Result<()> {
        let tcp = match self.config.tcp_addr {
            Some(addr) => {
                let listener = TcpListener::bind(addr)?;
                info!(addr = %listener.local_addr()?, "listening on tcp");
                Some(listener)
            }
            None => None,
        };

        #[cfg(unix)]
        let unix = match &self.config.unix_path {
            Some(path) => {
                // A socket file left behind by a previous run blocks bind.
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                info!(path = %path.display(), "listening on unix socket");
                Some(listener)
            }
            None => None,
        };
        #[cfg(not(unix))]
        if self.config.unix_path.is_some() {
            warn!("unix sockets are not supported on this platform; ignoring unix_path");
        }

        thread::scope(|scope| {
            let mut loops = Vec::new();
            if let Some(listener) = tcp {
                loops.push(scope.spawn(move || self.serve_tcp(listener)));
            }
            #[cfg(unix)]
            if let Some(listener) = unix {
                loops.push(scope.spawn(move || self.serve_unix(listener)));
            }

            let mut result = Ok(());
            for handle in loops {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(error = %e, "listener failed");
                        result = Err(e);
                    }
                    Err(_) => {
                        result = Err(io::Error::new(io::ErrorKind::Other, "listener panicked"));
                    }
                }
            }
            result
        })
    }

    /// Accept loop for a TCP listener. Per-connection accept errors are
    /// logged and skipped.
    pub fn serve_tcp(&self, listener: TcpListener) -> io::Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    self.spawn_connection(stream)?;
                }
                Err(e) => warn!(error = %e, "tcp accept failed"),
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    pub fn serve_unix(&self, listener: UnixListener) -> io::Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    self.spawn_connection(stream)?;
                }
                Err(e) => warn!(error = %e, "unix accept failed"),
            }
        }
        Ok(())
    }

    /// Serve one connection on a new thread.
    pub fn spawn_connection<T: Transport>(&self, stream: T) -> io::Result<JoinHandle<()>> {
        let server = self.clone();
        thread::Builder::new()
            .name("conn".to_string())
            .spawn(move || {
                // Errors are already logged by serve_connection.
                let _ = serve_connection(
                    stream,
                    server.store.clone(),
                    &server.ids,
                    &server.config,
                );
            })
    }
}
