//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listener, registry, sessions produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Library code only emits; the binary installs subscribers and recorders
//! - Every per-connection event carries the connection id

pub mod logging;
pub mod metrics;
