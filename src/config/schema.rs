//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::registry::{DispatchOptions, DEFAULT_PEEK_BYTES};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Protocol identification bounds.
    pub dispatch: DispatchConfig,

    /// Which reference protocols the binary registers.
    pub protocols: ProtocolsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080"). Unset means the server refuses to start.
    pub bind_address: Option<String>,
}

/// Protocol identification settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of leading bytes inspected per connection.
    pub peek_bytes: usize,

    /// Deadline for identifying a connection, in milliseconds.
    pub peek_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            peek_bytes: DEFAULT_PEEK_BYTES,
            peek_timeout_ms: 3_000,
        }
    }
}

impl DispatchConfig {
    pub fn to_options(&self) -> DispatchOptions {
        DispatchOptions {
            peek_bytes: self.peek_bytes,
            peek_timeout: Duration::from_millis(self.peek_timeout_ms),
        }
    }
}

/// Reference protocol selection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProtocolsConfig {
    /// Register the binary echo protocol.
    pub echo_enabled: bool,

    /// Magic prefix identifying echo connections.
    pub echo_magic: String,

    /// Register the HTTP protocol.
    pub http_enabled: bool,
}

impl Default for ProtocolsConfig {
    fn default() -> Self {
        Self {
            echo_enabled: true,
            echo_magic: "BIN1".to_string(),
            http_enabled: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
