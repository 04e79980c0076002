//! Palaver messenger server binary.

use tracing::info;
use tracing_subscriber::EnvFilter;

use palaver_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,palaver_server=debug")),
        )
        .init();

    info!("Starting Palaver server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
