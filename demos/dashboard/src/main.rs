//! Dashboard server.
//!
//! Serves the dashboard methods over WebSocket and over the HTTP fallback.
//!
//! Run:
//!   cargo run -p tether-example-dashboard --bin dashboard-server -- --listen 127.0.0.1:3000
//!
//! Then:
//!   curl -X POST localhost:3000/fallback/call -H 'content-type: application/json' \
//!     -d '{"methodName":"listServers","args":[]}'

use clap::Parser;
use dashboard::{Store, router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tether_server::{Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dashboard-server")]
#[command(about = "Serve the dashboard over tether")]
struct Cli {
    /// TOML file with server settings
    #[arg(long, env = "DASHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(long, env = "DASHBOARD_LISTEN")]
    listen: Option<SocketAddr>,

    /// Poll period suggested to fallback clients, in milliseconds
    #[arg(long)]
    poll_hint_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("dashboard=info".parse()?)
                .add_directive("tether_server=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(hint) = cli.poll_hint_ms {
        config.poll_hint_ms = hint;
    }

    tracing::info!("Starting dashboard on {}", config.listen);
    let store = Arc::new(Store::demo());
    Server::new(router(store), config).run().await?;
    Ok(())
}
