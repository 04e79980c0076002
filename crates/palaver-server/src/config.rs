//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use palaver_shared::constants::DEFAULT_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    /// Env: `PALAVER_LISTEN_ADDR`
    /// Default: `127.0.0.1:5000`
    pub listen_addr: SocketAddr,

    /// Path of the SQLite database file.
    /// Env: `PALAVER_DB_PATH`
    /// Default: platform data directory (see `palaver_store::Database::new`).
    pub db_path: Option<PathBuf>,

    /// Maximum number of concurrently served connections. Connections over
    /// the cap are accepted and immediately closed.
    /// Env: `PALAVER_MAX_CONNECTIONS`
    /// Default: `256`
    pub max_connections: usize,

    /// Per-read socket timeout. `None` disables the timeout.
    /// Env: `PALAVER_READ_TIMEOUT_SECS` (0 disables)
    /// Default: disabled
    pub read_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], DEFAULT_PORT).into(),
            db_path: None,
            max_connections: 256,
            read_timeout: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PALAVER_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.listen_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid PALAVER_LISTEN_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("PALAVER_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(val) = std::env::var("PALAVER_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse::<usize>() {
                if n > 0 {
                    config.max_connections = n;
                }
            }
        }

        if let Ok(val) = std::env::var("PALAVER_READ_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(0) => config.read_timeout = None,
                Ok(secs) => config.read_timeout = Some(Duration::from_secs(secs)),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid PALAVER_READ_TIMEOUT_SECS, ignoring");
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, ([127, 0, 0, 1], 5000).into());
        assert_eq!(config.max_connections, 256);
        assert!(config.read_timeout.is_none());
    }
}
