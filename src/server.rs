//! Server lifecycle and accept loop.
//!
//! # Responsibilities
//! - Hold the bind address and the protocol registry
//! - Run the accept loop, one dispatch task per connection
//! - Drain pending background errors between accepts
//! - Tell an orderly stop apart from a failing listener
//!
//! # Design Decisions
//! - `start` blocks the calling task until the server stops
//! - A server runs at most once; build a new one to restart
//! - `stop` closes the listener before clearing the running flag, so the
//!   accept loop always sees the close as a clean shutdown
//! - `stop` does not wait for in-flight sessions; use `wait_for_sessions`

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::error::{BoxError, ServerError};
use crate::net::Accept;
use crate::protocol::{DispatchOptions, Protocol, ProtocolRegistry};

/// A single listening port shared by several protocols.
///
/// ```no_run
/// use std::sync::Arc;
/// use mpserver::{EchoProtocol, Server};
///
/// # async fn run() -> Result<(), mpserver::ServerError> {
/// let server = Arc::new(Server::default());
/// server.set_listen_addr("127.0.0.1:7000");
/// server.register_protocol(EchoProtocol::default())?;
///
/// let handle = Arc::clone(&server);
/// tokio::spawn(async move { handle.start().await });
/// // ...
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Server {
    addr: Mutex<Option<String>>,
    local_addr: OnceLock<SocketAddr>,
    registry: Arc<ProtocolRegistry>,
    running: AtomicBool,
    started: AtomicBool,
}

impl Server {
    pub fn new(options: DispatchOptions) -> Self {
        Self {
            addr: Mutex::new(None),
            local_addr: OnceLock::new(),
            registry: Arc::new(ProtocolRegistry::new(options)),
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// Build a server from configuration. Protocols are not registered.
    pub fn from_config(config: &ServerConfig) -> Self {
        let server = Self::new(config.dispatch.to_options());
        if let Some(addr) = &config.listener.bind_address {
            server.set_listen_addr(addr.as_str());
        }
        server
    }

    /// Set the address `start` binds to. Not validated until `start`.
    ///
    /// Ignored once the server has started.
    pub fn set_listen_addr(&self, addr: impl Into<String>) {
        let addr = addr.into();
        if self.started.load(Ordering::SeqCst) {
            tracing::warn!(address = %addr, "Server already started, listen address unchanged");
            return;
        }
        *self.addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
    }

    /// Append a protocol at the lowest dispatch priority.
    pub fn register_protocol<P: Protocol>(&self, protocol: P) -> Result<(), ServerError> {
        self.registry.register(Arc::new(protocol))
    }

    /// Append an already shared protocol at the lowest dispatch priority.
    pub fn register_shared(&self, protocol: Arc<dyn Protocol>) -> Result<(), ServerError> {
        self.registry.register(protocol)
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once `start` has bound it.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> u64 {
        self.registry.active_sessions()
    }

    /// Wait for in-flight sessions to end. Returns `false` on timeout.
    pub async fn wait_for_sessions(&self, timeout: Duration) -> bool {
        self.registry.wait_idle(timeout).await
    }

    /// Bind, then accept and dispatch connections until the server stops.
    ///
    /// Returns `Ok(())` after an orderly [`stop`](Self::stop) and an error
    /// for a missing address, a failed bind, or a listener failure that
    /// was not caused by `stop`.
    pub async fn start(&self) -> Result<(), ServerError> {
        let addr = self
            .addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ServerError::AddressMissing)?;

        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        self.running.store(true, Ordering::SeqCst);

        let mut listener = match self.registry.listen(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                tracing::error!(address = %addr, error = %e, "Server failed to start");
                return Err(e);
            }
        };
        let _ = self.local_addr.set(listener.local_addr());

        tracing::info!(
            address = %listener.local_addr(),
            protocols = ?self.registry.names(),
            "Server listening"
        );

        let result = self.run(&mut listener).await;
        drop(listener);

        match &result {
            Ok(()) => tracing::info!("Server exited"),
            Err(e) => tracing::error!(error = %e, "Server exited abnormally"),
        }
        result
    }

    /// Start background hooks, then accept and dispatch until `listener`
    /// closes or fails.
    async fn run<A: Accept>(&self, listener: &mut A) -> Result<(), ServerError> {
        let (errors_tx, mut errors_rx) = mpsc::channel::<BoxError>(1);
        self.registry.serve(errors_tx);

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }

            if let Ok(error) = errors_rx.try_recv() {
                tracing::warn!(error = %error, "Background protocol error");
            }

            match listener.accept().await {
                Ok(Some((stream, peer_addr))) => {
                    crate::observability::metrics::connection_accepted();
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        registry.dispatch(stream, peer_addr).await;
                    });
                }
                Ok(None) => {
                    tracing::debug!("Listener closed, accept loop exiting");
                    return Ok(());
                }
                Err(e) => {
                    if listener.is_closed() || !self.running.load(Ordering::SeqCst) {
                        tracing::debug!(error = %e, "Accept failed during shutdown");
                        return Ok(());
                    }
                    self.running.store(false, Ordering::SeqCst);
                    return Err(ServerError::Accept(e));
                }
            }
        }
    }

    /// Stop accepting connections.
    ///
    /// Closes the listener, ends background hooks and releases protocol
    /// resources, then clears the running flag. Sessions already running
    /// are left to finish on their own. If the registry fails to release
    /// its resources the error is returned and the server still reports
    /// itself as running. Repeated calls return `Ok(())`.
    pub async fn stop(&self) -> Result<(), ServerError> {
        self.registry.stop().await?;
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!(
                active_sessions = self.active_sessions(),
                "Server stopped"
            );
        }
        Ok(())
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new(DispatchOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    use async_trait::async_trait;
    use tokio::net::TcpStream;

    /// Accept source whose every accept fails after `delay`.
    struct FailingAccept {
        closed: bool,
        delay: Duration,
    }

    impl FailingAccept {
        fn new(closed: bool) -> Self {
            Self {
                closed,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Accept for FailingAccept {
        async fn accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
            tokio::time::sleep(self.delay).await;
            Err(io::Error::other("too many open files"))
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    #[tokio::test]
    async fn start_without_address_fails_fast() {
        let server = Server::default();
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::AddressMissing));
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
        assert!(!server.registry().is_sealed());
    }

    #[tokio::test]
    async fn bind_failure_clears_running() {
        let server = Server::default();
        server.set_listen_addr("256.0.0.1:80");
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn from_config_takes_address_and_options() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = Some("127.0.0.1:0".into());
        config.dispatch.peek_bytes = 8;

        let server = Server::from_config(&config);
        assert_eq!(server.registry().options().peek_bytes, 8);
        assert_eq!(
            server.addr.lock().unwrap().as_deref(),
            Some("127.0.0.1:0")
        );
    }

    #[tokio::test]
    async fn stop_before_start_prevents_binding() {
        let server = Server::default();
        server.set_listen_addr("127.0.0.1:0");
        server.stop().await.unwrap();

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Stopped));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn accept_failure_while_running_is_fatal() {
        let server = Server::default();
        server.running.store(true, Ordering::SeqCst);

        let err = server
            .run(&mut FailingAccept::new(false))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Accept(ref e) if e.to_string() == "too many open files"));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn accept_failure_after_close_is_clean() {
        let server = Server::default();
        server.running.store(true, Ordering::SeqCst);

        server.run(&mut FailingAccept::new(true)).await.unwrap();
    }

    #[tokio::test]
    async fn accept_failure_after_running_cleared_is_clean() {
        let server = Server::default();
        server.running.store(true, Ordering::SeqCst);

        let mut source = FailingAccept {
            closed: false,
            delay: Duration::from_millis(50),
        };
        let (result, ()) = tokio::join!(server.run(&mut source), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            server.running.store(false, Ordering::SeqCst);
        });
        result.unwrap();
        assert!(!server.is_running());
    }
}
