//! Server configuration.

use crate::error::ConfigError;
use crate::proto::DEFAULT_MAX_FRAME_BYTES;
use crate::session::DEFAULT_OUTBOUND_BUFFER;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 3135;

/// Server configuration. Every field has a default, so a config file only
/// needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address (None = no TCP listener).
    pub tcp_addr: Option<SocketAddr>,

    /// Unix socket path (None = no Unix listener).
    pub unix_path: Option<PathBuf>,

    /// Max bytes buffered for one incomplete inbound frame.
    /// Default: 16MB
    pub max_frame_bytes: usize,

    /// Size of each transport read.
    /// Default: 64KB
    pub read_chunk_bytes: usize,

    /// Replies queued per connection before the client counts as stalled.
    /// Default: 4096
    pub outbound_buffer: usize,

    /// How long one socket write may block before the client is dropped
    /// (0 = no limit).
    /// Default: 30s
    pub write_timeout_ms: u64,

    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: Some(SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))),
            unix_path: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            read_chunk_bytes: 64 * 1024,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            write_timeout_ms: 30_000,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        match self.write_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tcp_addr.is_none() && self.unix_path.is_none() {
            return Err(ConfigError::NoListener);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"unix_path": "/tmp/livestore.sock", "outbound_buffer": 16}}"#).unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.unix_path, Some(PathBuf::from("/tmp/livestore.sock")));
        assert_eq!(config.outbound_buffer, 16);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(config.tcp_addr, ServerConfig::default().tcp_addr);
        assert_eq!(config.write_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_zero_write_timeout_means_unbounded() {
        let config = ServerConfig {
            write_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.write_timeout(), None);
    }

    #[test]
    fn test_no_listener_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"tcp_addr": null}}"#).unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NoListener));
    }

    #[test]
    fn test_bad_json_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
