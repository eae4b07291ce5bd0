//! livestore server binary.

use anyhow::{Context, Result};
use clap::Parser;
use livestore::logging::init_logging;
use livestore::{MemoryStore, Server, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "livestore-server")]
#[command(about = "Live object-sync server over TCP and Unix sockets")]
#[command(version)]
struct Cli {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP listen address, e.g. 127.0.0.1:3135
    #[arg(long)]
    tcp: Option<SocketAddr>,

    /// Unix socket path
    #[arg(long)]
    unix: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(addr) = cli.tcp {
        config.tcp_addr = Some(addr);
    }
    if let Some(path) = cli.unix {
        config.unix_path = Some(path);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config.validate()?;

    init_logging(&config.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting livestore");

    let store = Arc::new(MemoryStore::new());
    let server = Server::new(store, config);
    server.run().context("server stopped")?;
    Ok(())
}
