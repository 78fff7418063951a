//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mpserver_connections_accepted_total` (counter)
//! - `mpserver_dispatch_total` (counter): connections handed off, by protocol
//! - `mpserver_dispatch_failures_total` (counter): rejections, by reason
//! - `mpserver_session_errors_total` (counter): failed or panicked sessions, by protocol
//! - `mpserver_background_errors_total` (counter): background hook failures, by protocol
//! - `mpserver_active_sessions` (gauge)
//!
//! Without an installed recorder these calls are no-ops.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn connection_accepted() {
    counter!("mpserver_connections_accepted_total").increment(1);
}

pub fn dispatched(protocol: &str) {
    counter!("mpserver_dispatch_total", "protocol" => protocol.to_string()).increment(1);
}

pub fn dispatch_failed(reason: &'static str) {
    counter!("mpserver_dispatch_failures_total", "reason" => reason).increment(1);
}

pub fn session_error(protocol: &str) {
    counter!("mpserver_session_errors_total", "protocol" => protocol.to_string()).increment(1);
}

pub fn background_error(protocol: &str) {
    counter!("mpserver_background_errors_total", "protocol" => protocol.to_string()).increment(1);
}

pub fn session_started() {
    gauge!("mpserver_active_sessions").increment(1.0);
}

pub fn session_finished() {
    gauge!("mpserver_active_sessions").decrement(1.0);
}
