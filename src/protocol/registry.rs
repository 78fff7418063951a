//! Ordered protocol registry and per-connection dispatch.
//!
//! # Responsibilities
//! - Hold registered protocols in priority (registration) order
//! - Bind the shared listener and seal the protocol set
//! - Identify each connection from its leading bytes and hand it off
//! - Run protocol background hooks and report their errors
//! - Stop: close listeners, end hooks, release protocol resources
//!
//! # Design Decisions
//! - First registered, first tried; no other tie-break exists
//! - A single deadline bounds the whole peek, not each read
//! - Peeked bytes are replayed to the chosen protocol via `Rewind`
//! - At most one background error is pending; later ones are dropped

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::{BoxError, DispatchError, ServerError};
use crate::lifecycle::Shutdown;
use crate::net::{Connection, ConnectionId, ConnectionTracker, Listener, Rewind};
use crate::observability::metrics;
use crate::protocol::Protocol;

/// Default size of the peek window in bytes.
pub const DEFAULT_PEEK_BYTES: usize = 16;

/// Default deadline for identifying a connection.
pub const DEFAULT_PEEK_TIMEOUT: Duration = Duration::from_secs(3);

/// How long `stop` waits for a background hook before aborting it.
const BACKGROUND_GRACE: Duration = Duration::from_secs(5);

/// Bounds on protocol identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Maximum number of leading bytes inspected.
    pub peek_bytes: usize,
    /// Deadline for the whole identification phase.
    pub peek_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            peek_bytes: DEFAULT_PEEK_BYTES,
            peek_timeout: DEFAULT_PEEK_TIMEOUT,
        }
    }
}

type Protocols = Arc<[Arc<dyn Protocol>]>;

/// Registry of protocols sharing one listening port.
///
/// Protocols are tried in the order they were registered and the first one
/// whose [`Protocol::matches`] accepts the leading bytes receives the
/// connection. When two protocols can match the same bytes the earlier one
/// always wins, so register the most specific protocols first.
pub struct ProtocolRegistry {
    pending: RwLock<Vec<Arc<dyn Protocol>>>,
    sealed: OnceLock<Protocols>,
    shutdown: Shutdown,
    background: Mutex<Vec<(String, JoinHandle<()>)>>,
    released: tokio::sync::Mutex<bool>,
    tracker: ConnectionTracker,
    options: DispatchOptions,
}

impl ProtocolRegistry {
    pub fn new(options: DispatchOptions) -> Self {
        Self {
            pending: RwLock::new(Vec::new()),
            sealed: OnceLock::new(),
            shutdown: Shutdown::new(),
            background: Mutex::new(Vec::new()),
            released: tokio::sync::Mutex::new(false),
            tracker: ConnectionTracker::new(),
            options,
        }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Append a protocol at the lowest priority.
    ///
    /// Fails once [`listen`](Self::listen) has sealed the registry.
    pub fn register(&self, protocol: Arc<dyn Protocol>) -> Result<(), ServerError> {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        if self.sealed.get().is_some() {
            tracing::warn!(protocol = protocol.name(), "Registration rejected, registry is sealed");
            return Err(ServerError::RegistrySealed(protocol.name().to_string()));
        }

        tracing::debug!(
            protocol = protocol.name(),
            priority = pending.len(),
            "Protocol registered"
        );
        pending.push(protocol);
        Ok(())
    }

    /// Names of the registered protocols, in priority order.
    pub fn names(&self) -> Vec<String> {
        self.protocols().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.get().is_some()
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Wait for running sessions to finish. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.tracker.wait_idle(timeout).await
    }

    /// Bind the shared listener and seal the protocol set.
    pub async fn listen(&self, addr: &str) -> Result<Listener, ServerError> {
        if self.shutdown.is_triggered() {
            return Err(ServerError::Stopped);
        }

        let listener = Listener::bind(addr, self.shutdown.subscribe())
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        let protocols = self.seal();
        tracing::info!(
            address = %listener.local_addr(),
            protocols = protocols.len(),
            "Protocol registry sealed"
        );

        Ok(listener)
    }

    /// Spawn every protocol's background hook.
    ///
    /// A failing hook pushes its error onto `errors` without waiting. If an
    /// error is already pending the new one is logged and dropped.
    pub fn serve(&self, errors: mpsc::Sender<BoxError>) {
        let mut handles = self.background.lock().unwrap_or_else(PoisonError::into_inner);

        for protocol in self.protocols().iter() {
            let protocol = Arc::clone(protocol);
            let signal = self.shutdown.subscribe();
            let errors = errors.clone();
            let name = protocol.name().to_string();

            let handle = tokio::spawn(async move {
                let Err(error) = protocol.background(signal).await else {
                    return;
                };
                metrics::background_error(protocol.name());

                match errors.try_send(error) {
                    Ok(()) => {}
                    Err(TrySendError::Full(error)) => tracing::warn!(
                        protocol = protocol.name(),
                        error = %error,
                        "Background error dropped, another is already pending"
                    ),
                    Err(TrySendError::Closed(error)) => tracing::warn!(
                        protocol = protocol.name(),
                        error = %error,
                        "Background error after accept loop exited"
                    ),
                }
            });
            handles.push((name, handle));
        }
    }

    /// Identify `stream` and run the matching protocol's session.
    ///
    /// Never fails: rejections, session errors and panics are logged and
    /// counted, and the socket is closed when this returns.
    pub async fn dispatch(&self, mut stream: TcpStream, peer_addr: SocketAddr) {
        let id = ConnectionId::new();
        let protocols = self.protocols();

        let (protocol, prefix) = match identify(&mut stream, &protocols, &self.options).await {
            Ok(found) => found,
            Err(error) => {
                metrics::dispatch_failed(error.reason());
                tracing::info!(
                    connection_id = %id,
                    peer_addr = %peer_addr,
                    reason = error.reason(),
                    error = %error,
                    "Connection rejected"
                );
                return;
            }
        };

        metrics::dispatched(protocol.name());
        tracing::debug!(
            connection_id = %id,
            peer_addr = %peer_addr,
            protocol = protocol.name(),
            peeked = prefix.len(),
            "Connection dispatched"
        );

        let _guard = self.tracker.track(id);
        let conn = Connection::new(id, peer_addr, Rewind::new_buffered(stream, prefix));

        match AssertUnwindSafe(protocol.serve(conn)).catch_unwind().await {
            Ok(Ok(())) => {
                tracing::debug!(connection_id = %id, protocol = protocol.name(), "Session finished");
            }
            Ok(Err(error)) => {
                metrics::session_error(protocol.name());
                tracing::warn!(
                    connection_id = %id,
                    protocol = protocol.name(),
                    error = %error,
                    "Session ended with error"
                );
            }
            Err(panic) => {
                metrics::session_error(protocol.name());
                tracing::error!(
                    connection_id = %id,
                    protocol = protocol.name(),
                    panic = panic_message(&*panic),
                    "Session panicked"
                );
            }
        }
    }

    /// Close the listener, end background hooks and release protocol resources.
    ///
    /// In-flight sessions are not interrupted. Safe to call repeatedly and
    /// concurrently; after a successful stop further calls do nothing. If a
    /// protocol fails to release, the error is returned and the next call
    /// retries the release.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut released = self.released.lock().await;
        if *released {
            return Ok(());
        }

        if self.shutdown.trigger() {
            tracing::info!("Protocol registry stopping");
        }

        let handles = std::mem::take(
            &mut *self.background.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for (name, mut handle) in handles {
            match tokio::time::timeout(BACKGROUND_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(protocol = %name, error = %e, "Background task did not finish cleanly")
                }
                Err(_) => {
                    tracing::warn!(protocol = %name, "Background task ignored shutdown, aborting");
                    handle.abort();
                }
            }
        }

        for protocol in self.protocols().iter() {
            protocol
                .release()
                .await
                .map_err(|source| ServerError::Release {
                    protocol: protocol.name().to_string(),
                    source,
                })?;
        }

        *released = true;
        tracing::info!("Protocol registry stopped");
        Ok(())
    }

    fn protocols(&self) -> Protocols {
        match self.sealed.get() {
            Some(sealed) => Arc::clone(sealed),
            None => self
                .pending
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .collect(),
        }
    }

    fn seal(&self) -> Protocols {
        let pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(self.sealed.get_or_init(|| pending.iter().cloned().collect()))
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new(DispatchOptions::default())
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("protocols", &self.names())
            .field("sealed", &self.is_sealed())
            .field("stopped", &self.is_stopped())
            .field("options", &self.options)
            .finish()
    }
}

/// Outcome of asking the protocols about the bytes seen so far.
enum Selection {
    Matched(Arc<dyn Protocol>),
    Pending,
    Rejected,
}

/// Ask `protocols` in order about `prefix`.
///
/// A protocol that does not match yet but `needs_more` bytes blocks every
/// later one, unless `settled` says no more bytes will arrive.
fn select(protocols: &[Arc<dyn Protocol>], prefix: &[u8], settled: bool) -> Selection {
    for protocol in protocols {
        if protocol.matches(prefix) {
            return Selection::Matched(Arc::clone(protocol));
        }
        if !settled && protocol.needs_more(prefix) {
            return Selection::Pending;
        }
    }
    Selection::Rejected
}

/// Read leading bytes until a protocol can be chosen.
///
/// After every read the protocols are asked in order with everything seen so
/// far. A later protocol only wins once every earlier one has ruled itself
/// out, or once the window is full, the peer sent EOF or the deadline passed.
/// Returns the winner and the bytes consumed from `stream`.
pub(crate) async fn identify<S>(
    stream: &mut S,
    protocols: &[Arc<dyn Protocol>],
    options: &DispatchOptions,
) -> Result<(Arc<dyn Protocol>, Bytes), DispatchError>
where
    S: AsyncRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + options.peek_timeout;
    let mut window = vec![0u8; options.peek_bytes];
    let mut filled = 0;

    let failure = loop {
        match tokio::time::timeout_at(deadline, stream.read(&mut window[filled..])).await {
            Err(_) => break DispatchError::Timeout { peeked: filled },
            Ok(Ok(0)) if filled == 0 => return Err(DispatchError::Closed),
            Ok(Ok(0)) => break DispatchError::NoMatch { peeked: filled },
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(e.into()),
        }

        match select(protocols, &window[..filled], filled == window.len()) {
            Selection::Matched(protocol) => {
                window.truncate(filled);
                return Ok((protocol, Bytes::from(window)));
            }
            Selection::Rejected => return Err(DispatchError::NoMatch { peeked: filled }),
            Selection::Pending => {}
        }
    };

    // No more bytes are coming: the first protocol that matches wins.
    match select(protocols, &window[..filled], true) {
        Selection::Matched(protocol) if filled > 0 => {
            window.truncate(filled);
            Ok((protocol, Bytes::from(window)))
        }
        _ => Err(failure),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
