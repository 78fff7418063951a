//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, close signal)
//!     → [registry peeks leading bytes]
//!     → rewind.rs (replay peeked bytes)
//!     → connection.rs (owned by one protocol session)
//! ```
//!
//! # Design Decisions
//! - One listener per server, closed by the registry's signal
//! - Peeked bytes are never lost: the session reads them first
//! - TLS belongs to the protocol that needs it, not to this layer

pub mod connection;
pub mod listener;
pub mod rewind;

pub use connection::{Connection, ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::Listener;
pub(crate) use listener::Accept;
pub use rewind::Rewind;
