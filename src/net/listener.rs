//! TCP listener that observes the registry's close signal.
//!
//! # Responsibilities
//! - Parse and bind the configured address
//! - Accept incoming TCP connections
//! - Report an orderly close distinctly from accept failures
//! - Abstract the connection source behind `Accept` for the accept loop

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::lifecycle::ShutdownSignal;

/// Where the accept loop gets its connections from.
#[async_trait]
pub(crate) trait Accept: Send {
    /// The next connection, or `None` once the source has been closed.
    async fn accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>>;

    /// Whether the source has been closed on purpose.
    fn is_closed(&self) -> bool;
}

/// The shared listening socket.
///
/// Once the close signal fires every pending and future `accept` returns
/// `Ok(None)`. The socket itself is released when the listener is dropped.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
}

impl Listener {
    /// Bind to `address`, which must be a literal socket address.
    ///
    /// An unparsable address is reported as [`io::ErrorKind::InvalidInput`].
    pub async fn bind(address: &str, shutdown: ShutdownSignal) -> io::Result<Self> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let inner = TcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self {
            inner,
            local_addr,
            shutdown,
        })
    }

    /// Accept the next connection. Returns `Ok(None)` once the listener was closed.
    pub async fn accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        if self.shutdown.is_triggered() {
            return Ok(None);
        }

        tokio::select! {
            biased;
            _ = self.shutdown.recv() => Ok(None),
            accepted = self.inner.accept() => {
                let (stream, peer_addr) = accepted?;
                tracing::trace!(peer_addr = %peer_addr, "Connection accepted");
                Ok(Some((stream, peer_addr)))
            }
        }
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the close signal has fired.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

#[async_trait]
impl Accept for Listener {
    async fn accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        Listener::accept(self).await
    }

    fn is_closed(&self) -> bool {
        Listener::is_closed(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    #[tokio::test]
    async fn malformed_address_is_a_bind_error() {
        let shutdown = Shutdown::new();
        let err = Listener::bind("not-an-address", shutdown.subscribe())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn accepts_until_closed() {
        let shutdown = Shutdown::new();
        let mut listener = Listener::bind("127.0.0.1:0", shutdown.subscribe())
            .await
            .unwrap();
        let addr = listener.local_addr();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await });
        let (_stream, _peer) = listener.accept().await.unwrap().unwrap();
        client.await.unwrap().unwrap();

        shutdown.trigger();
        assert!(listener.is_closed());
        assert!(listener.accept().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_accept_wakes_on_close() {
        let shutdown = Shutdown::new();
        let mut listener = Listener::bind("127.0.0.1:0", shutdown.subscribe())
            .await
            .unwrap();

        let pending = tokio::spawn(async move { listener.accept().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown.trigger();

        let result = pending.await.unwrap();
        assert!(result.unwrap().is_none());
    }
}
