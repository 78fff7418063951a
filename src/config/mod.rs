//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → Server::from_config
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; the bind address is fixed after start
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{DispatchConfig, ListenerConfig, ObservabilityConfig, ProtocolsConfig, ServerConfig};
pub use validation::{validate_config, ValidationError};
