//! rproxy: encrypting forward proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────┐
//!                    │                      RPROXY                       │
//!                    │                                                   │
//!  Client Request    │  ┌──────────┐   ┌──────────┐   ┌──────────────┐   │
//!  ──────────────────┼─▶│  stages  │──▶│ request  │──▶│   routing    │   │
//!  /<encoded url>    │  │ (mw)     │   │ extract  │   │   resolver   │   │
//!                    │  └──────────┘   └──────────┘   └──────┬───────┘   │
//!                    │                                       ▼           │
//!                    │                               ┌──────────────┐    │
//!                    │                               │   security   │    │
//!                    │                               │ policy/hdrs  │    │
//!                    │                               └──────┬───────┘    │
//!                    │                                       ▼           │
//!  Client Response   │  ┌──────────┐   ┌──────────┐   ┌──────────────┐   │
//!  ◀─────────────────┼──│ response │◀──│  cipher  │◀──│ http client  │◀──┼── Destination
//!                    │  │  writer  │   │ limits   │   │  (pooled)    │   │
//!                    │  └──────────┘   └──────────┘   └──────────────┘   │
//!                    └───────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use rproxy::http::HttpServer;
use rproxy::lifecycle::{signals, startup, RuntimeEnvironment, Shutdown};
use rproxy::observability;

#[derive(Debug, Parser)]
#[command(name = "rproxy", version, about = "Encrypting forward proxy")]
struct Cli {
    /// Configuration file; defaults to the runtime environment's location.
    #[arg(short, long, env = "RPROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let environment = RuntimeEnvironment::detect();
    let (path, config) = startup::load(environment, cli.config.as_deref())?;

    observability::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?environment,
        config = %path.display(),
        "rproxy starting"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        observability::init_metrics(addr)?;
    }

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config.clone())?;
    let listener = TcpListener::bind(&config.general.listen).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server_shutdown = shutdown.subscribe();
    signals::spawn_signal_listener(shutdown);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
