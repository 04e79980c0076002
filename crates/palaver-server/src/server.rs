//! Listener setup and the accept loop.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use palaver_store::Database;

use crate::config::ServerConfig;
use crate::handler::{run_connection, SharedState};
use crate::registry::SessionRegistry;

/// A bound but not yet running server.
pub struct Server {
    listener: TcpListener,
    state: Arc<SharedState>,
    max_connections: usize,
}

impl Server {
    /// Bind the listen socket and open the database.
    ///
    /// Binding failure is the one fatal startup error.
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)
                .with_context(|| format!("opening database at {}", path.display()))?,
            None => Database::new().context("opening default database")?,
        };

        let listener = TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("binding {}", config.listen_addr))?;

        info!(addr = %listener.local_addr()?, "server listening");

        Ok(Self {
            listener,
            state: Arc::new(SharedState {
                db: Mutex::new(db),
                registry: SessionRegistry::new(),
                read_timeout: config.read_timeout,
            }),
            max_connections: config.max_connections,
        })
    }

    /// The actually bound address (useful with port 0).
    pub fn local_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per connection.
    pub async fn run(self) -> anyhow::Result<()> {
        let permits = Arc::new(Semaphore::new(self.max_connections));

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let Ok(permit) = permits.clone().try_acquire_owned() else {
                warn!(%peer, "connection limit reached, dropping connection");
                drop(stream);
                continue;
            };

            let state = self.state.clone();
            tokio::spawn(async move {
                run_connection(state, stream).await;
                drop(permit);
            });
        }
    }
}
