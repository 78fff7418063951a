//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mpserver::{BoxError, Connection, DispatchOptions, Protocol, Server, ServerError};

/// What a [`RecordingProtocol`] saw during one session.
#[derive(Debug)]
pub struct Session {
    pub protocol: String,
    pub bytes: Vec<u8>,
}

/// Reads the whole connection, reports it, and answers `ok:<name>`.
pub struct RecordingProtocol {
    name: String,
    prefix: Vec<u8>,
    min_len: usize,
    sessions: mpsc::UnboundedSender<Session>,
}

impl RecordingProtocol {
    /// Claims connections starting with `prefix`.
    pub fn prefix(name: &str, prefix: &[u8], sessions: mpsc::UnboundedSender<Session>) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_vec(),
            min_len: prefix.len(),
            sessions,
        }
    }

    /// Claims any connection once `min_len` bytes have arrived.
    pub fn catch_all(name: &str, min_len: usize, sessions: mpsc::UnboundedSender<Session>) -> Self {
        Self {
            name: name.to_string(),
            prefix: Vec::new(),
            min_len,
            sessions,
        }
    }
}

#[async_trait]
impl Protocol for RecordingProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.len() >= self.min_len && prefix.starts_with(&self.prefix)
    }

    fn needs_more(&self, prefix: &[u8]) -> bool {
        let consistent = self.prefix.starts_with(prefix) || prefix.starts_with(&self.prefix);
        prefix.len() < self.min_len && consistent
    }

    async fn serve(&self, mut conn: Connection) -> Result<(), BoxError> {
        let mut bytes = Vec::new();
        conn.read_to_end(&mut bytes).await?;
        let _ = self.sessions.send(Session {
            protocol: self.name.clone(),
            bytes,
        });
        conn.write_all(format!("ok:{}", self.name).as_bytes()).await?;
        conn.shutdown().await?;
        Ok(())
    }
}

pub fn options(peek_timeout_ms: u64) -> DispatchOptions {
    DispatchOptions {
        peek_bytes: 16,
        peek_timeout: Duration::from_millis(peek_timeout_ms),
    }
}

/// Run `server.start()` in the background and wait until it is bound.
pub async fn start_server(
    server: Arc<Server>,
) -> (SocketAddr, JoinHandle<Result<(), ServerError>>) {
    let runner = Arc::clone(&server);
    let handle = tokio::spawn(async move { runner.start().await });

    for _ in 0..200 {
        if let Some(addr) = server.local_addr() {
            return (addr, handle);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server did not bind within 2s");
}

/// Send `payload`, close the write half and collect the reply.
pub async fn exchange(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
        .await
        .expect("reply timed out")
        .unwrap();
    reply
}

/// Poll `condition` every 10ms for up to 2s.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
