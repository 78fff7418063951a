//! Multi-protocol server: one TCP port, many wire protocols.
//!
//! Each accepted connection is identified from its leading bytes and handed
//! to the first registered [`Protocol`] that claims it.

// Core subsystems
pub mod error;
pub mod net;
pub mod protocol;
pub mod server;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use error::{BoxError, DispatchError, ServerError};
pub use net::Connection;
pub use protocol::{DispatchOptions, EchoProtocol, HttpProtocol, Protocol, ProtocolRegistry};
pub use server::Server;
