//! Error taxonomy for the server core.
//!
//! # Classes
//! - Configuration: missing address, misuse of the lifecycle (fail fast)
//! - Bind: the listener could not be created (fail fast)
//! - Accept: the listener failed for a reason other than an orderly stop
//! - Release: a protocol could not release its resources during stop
//!
//! Per-connection failures ([`DispatchError`] and session errors) never
//! leave the dispatch task; they are logged and counted.

use std::io;

use thiserror::Error;

/// Boxed error type returned by protocol sessions and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by [`Server`](crate::Server) and
/// [`ProtocolRegistry`](crate::protocol::ProtocolRegistry).
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called before a listen address was set.
    #[error("listen address is not set")]
    AddressMissing,

    /// `start` was called on a server that has already been started.
    #[error("server has already been started")]
    AlreadyStarted,

    /// The registry was stopped before a listener could be bound.
    #[error("server has been stopped")]
    Stopped,

    /// A protocol was registered after the registry was sealed by `listen`.
    #[error("cannot register protocol `{0}`: registry is sealed")]
    RegistrySealed(String),

    /// The listen address could not be parsed or bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The listener failed while the server was still meant to be running.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// A protocol failed to release its resources during stop.
    #[error("protocol `{protocol}` failed to release resources: {source}")]
    Release {
        protocol: String,
        #[source]
        source: BoxError,
    },
}

/// Reasons a connection was not handed to any protocol.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The peek window filled (or the peer stopped sending) without a match.
    #[error("no protocol matched {peeked} leading bytes")]
    NoMatch { peeked: usize },

    /// The peek deadline elapsed before any protocol matched.
    #[error("peek timed out after {peeked} bytes")]
    Timeout { peeked: usize },

    /// The peer closed the connection before sending anything.
    #[error("connection closed before any bytes were received")]
    Closed,

    /// Reading the leading bytes failed.
    #[error("peek failed: {0}")]
    Io(#[from] io::Error),
}

impl DispatchError {
    /// Short label used for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            DispatchError::NoMatch { .. } => "no_match",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::Closed => "closed",
            DispatchError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_mentions_address() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:1".into(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:1"));
    }

    #[test]
    fn dispatch_reasons() {
        assert_eq!(DispatchError::NoMatch { peeked: 4 }.reason(), "no_match");
        assert_eq!(DispatchError::Timeout { peeked: 0 }.reason(), "timeout");
        assert_eq!(DispatchError::Closed.reason(), "closed");
    }
}
