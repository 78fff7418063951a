//! mpserver: serve HTTP and a binary echo protocol on one port.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ listener ──▶ accept loop ──spawn──▶ dispatch (peek bytes)
//!                                                     │
//!                                  ┌──────────────────┼──────────────────┐
//!                                  ▼                  ▼                  ▼
//!                           EchoProtocol        HttpProtocol        no match:
//!                           ("BIN1" frames)     (axum router)       close
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{routing::get, Router};
use clap::Parser;
use tower_http::trace::TraceLayer;

use mpserver::config::{load_config, validate_config, ConfigError, ServerConfig};
use mpserver::lifecycle::signals::wait_for_signal;
use mpserver::observability::{logging, metrics};
use mpserver::{EchoProtocol, HttpProtocol, Server};

#[derive(Parser)]
#[command(name = "mpserver")]
#[command(about = "Serve several wire protocols on a single TCP port", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration file.
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listener.bind_address = Some(listen);
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!("mpserver v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = Arc::new(Server::from_config(&config));
    if config.protocols.echo_enabled {
        server.register_protocol(EchoProtocol::new(config.protocols.echo_magic.as_bytes()))?;
    }
    if config.protocols.http_enabled {
        server.register_protocol(HttpProtocol::new(status_router()))?;
    }

    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        wait_for_signal().await;
        if let Err(e) = stopper.stop().await {
            tracing::error!(error = %e, "Failed to stop server");
        }
    });

    server.start().await?;

    tracing::info!(
        active_sessions = server.active_sessions(),
        "Shutdown complete"
    );
    Ok(())
}

fn status_router() -> Router {
    Router::new()
        .route("/", get(|| async { "mpserver\n" }))
        .route("/health", get(|| async { "ok\n" }))
        .layer(TraceLayer::new_for_http())
}
