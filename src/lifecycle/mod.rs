//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Server::stop
//!     → shutdown.rs (trigger close signal)
//!     → listeners return Closed, background hooks return
//!     → accept loop exits cleanly
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary calls Server::stop
//! ```
//!
//! # Design Decisions
//! - The close signal is level-triggered so a stop that lands before the
//!   listener is bound is still observed
//! - Stopping never cancels in-flight sessions

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
