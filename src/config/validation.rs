//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (peek window and timeout > 0)
//! - Check addresses parse as socket addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::ServerConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check `config` for semantic problems.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(addr) = &config.listener.bind_address {
        if addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "listener.bind_address",
                format!("`{addr}` is not a socket address"),
            ));
        }
    }

    if config.dispatch.peek_bytes == 0 {
        errors.push(ValidationError::new("dispatch.peek_bytes", "must be greater than 0"));
    }
    if config.dispatch.peek_timeout_ms == 0 {
        errors.push(ValidationError::new("dispatch.peek_timeout_ms", "must be greater than 0"));
    }

    let protocols = &config.protocols;
    if !protocols.echo_enabled && !protocols.http_enabled {
        errors.push(ValidationError::new("protocols", "at least one protocol must be enabled"));
    }
    if protocols.echo_enabled {
        if protocols.echo_magic.is_empty() {
            errors.push(ValidationError::new("protocols.echo_magic", "must not be empty"));
        } else if protocols.echo_magic.len() > config.dispatch.peek_bytes {
            errors.push(ValidationError::new(
                "protocols.echo_magic",
                format!(
                    "is {} bytes but the peek window is only {}",
                    protocols.echo_magic.len(),
                    config.dispatch.peek_bytes
                ),
            ));
        }
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level `{}`", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
