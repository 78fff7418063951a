//! Length-delimited binary echo protocol.
//!
//! Wire format: the magic bytes once, then frames of a 4-byte big-endian
//! length followed by the payload. Every frame is sent back unchanged.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::BoxError;
use crate::net::Connection;
use crate::protocol::Protocol;

/// Default magic prefix.
pub const DEFAULT_MAGIC: &[u8] = b"BIN1";

/// Default upper bound on a single frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct EchoProtocol {
    name: String,
    magic: Bytes,
    max_frame_length: usize,
}

impl EchoProtocol {
    pub fn new(magic: impl AsRef<[u8]>) -> Self {
        Self {
            name: "echo".to_string(),
            magic: Bytes::copy_from_slice(magic.as_ref()),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    pub fn magic(&self) -> &[u8] {
        &self.magic
    }
}

impl Default for EchoProtocol {
    fn default() -> Self {
        Self::new(DEFAULT_MAGIC)
    }
}

#[async_trait]
impl Protocol for EchoProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        !self.magic.is_empty() && prefix.starts_with(&self.magic)
    }

    fn needs_more(&self, prefix: &[u8]) -> bool {
        prefix.len() < self.magic.len() && self.magic.starts_with(prefix)
    }

    async fn serve(&self, mut conn: Connection) -> Result<(), BoxError> {
        let mut magic = vec![0u8; self.magic.len()];
        conn.read_exact(&mut magic).await?;

        let id = conn.id();
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(self.max_frame_length)
            .new_codec();
        let mut framed = Framed::new(conn, codec);

        let mut frames = 0u64;
        while let Some(frame) = framed.next().await {
            let frame = frame?;
            framed.send(frame.freeze()).await?;
            frames += 1;
        }

        tracing::debug!(connection_id = %id, frames, "Echo session finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_magic_prefix() {
        let echo = EchoProtocol::default();
        assert_eq!(echo.magic(), b"BIN1");
        assert!(echo.matches(b"BIN1"));
        assert!(echo.matches(b"BIN1\x00\x00\x00\x03abc"));
        assert!(!echo.matches(b"BIN"));
        assert!(!echo.matches(b"BIN2"));
        assert!(!echo.matches(b"GET / HTTP/1.1"));
    }

    #[test]
    fn partial_magic_needs_more() {
        let echo = EchoProtocol::default();
        assert!(echo.needs_more(b"B"));
        assert!(echo.needs_more(b"BIN"));
        assert!(!echo.needs_more(b"BIN1"));
        assert!(!echo.needs_more(b"BX"));
    }

    #[test]
    fn empty_magic_never_matches() {
        let echo = EchoProtocol::new(b"");
        assert!(!echo.matches(b"anything"));
    }

    #[test]
    fn builder_overrides() {
        let echo = EchoProtocol::new("MAGX")
            .with_name("custom")
            .with_max_frame_length(64);
        assert_eq!(echo.name(), "custom");
        assert_eq!(echo.max_frame_length, 64);
        assert!(echo.matches(b"MAGX...."));
    }
}
