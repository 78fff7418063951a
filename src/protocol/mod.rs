//! Protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → registry.rs (peek leading bytes under a deadline)
//!     → Protocol::matches, in registration order
//!     → first match: Protocol::serve owns the connection
//!     → no match: connection closed, failure logged
//! ```
//!
//! # Design Decisions
//! - Registration order is the only tie-break: register specific protocols first
//! - `matches` is pure and never waits for more data
//! - A protocol that still `needs_more` bytes holds back every later one, so
//!   the outcome does not depend on how the peer's bytes were segmented
//! - Sessions are isolated: errors and panics stay inside the dispatch task

pub mod echo;
pub mod http;
pub mod registry;

use async_trait::async_trait;

use crate::error::BoxError;
use crate::lifecycle::ShutdownSignal;
use crate::net::Connection;

pub use echo::EchoProtocol;
pub use http::HttpProtocol;
pub use registry::{DispatchOptions, ProtocolRegistry};

/// One wire protocol served on the shared port.
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Returns true if `prefix`, the leading bytes received so far, belongs
    /// to this protocol.
    ///
    /// Called again with a longer prefix as more bytes arrive, so it must
    /// return `false` rather than guess when `prefix` is too short.
    fn matches(&self, prefix: &[u8]) -> bool;

    /// Returns true if `prefix` does not match yet but could once more bytes
    /// arrive.
    ///
    /// While this holds, protocols registered later are not allowed to claim
    /// the connection until the peek window fills, the peer stops sending or
    /// the deadline passes. The default assumes more bytes may always help;
    /// override it so later protocols are decided without waiting.
    fn needs_more(&self, _prefix: &[u8]) -> bool {
        true
    }

    /// Run a session on `conn` until it ends.
    ///
    /// The returned error is only logged.
    async fn serve(&self, conn: Connection) -> Result<(), BoxError>;

    /// Optional task that runs for the server's lifetime, independent of
    /// any connection. Must return once `shutdown` fires.
    async fn background(&self, _shutdown: ShutdownSignal) -> Result<(), BoxError> {
        Ok(())
    }

    /// Release protocol-owned resources when the server stops.
    async fn release(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
