//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for the binary
//! - Honour `RUST_LOG`, falling back to the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter used when `RUST_LOG` is not set.
pub fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("mpserver={level},tower_http={level}"))
}

/// Install the global subscriber. Call once, from the binary.
pub fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
