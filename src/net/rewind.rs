//! Stream wrapper that replays bytes already read during dispatch.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Serves `pre` to readers before reading from `inner` again.
///
/// Writes always go straight to `inner`.
#[derive(Debug)]
pub struct Rewind<T> {
    pre: Option<Bytes>,
    inner: T,
}

impl<T> Rewind<T> {
    pub fn new(inner: T) -> Self {
        Self { pre: None, inner }
    }

    /// Wrap `inner` so that `buf` is read first.
    pub fn new_buffered(inner: T, buf: Bytes) -> Self {
        let pre = if buf.is_empty() { None } else { Some(buf) };
        Self { pre, inner }
    }

    /// Bytes that will be replayed before the next read reaches `inner`.
    pub fn buffered(&self) -> &[u8] {
        self.pre.as_deref().unwrap_or_default()
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Split into the inner stream and any bytes not yet replayed.
    pub fn into_inner(self) -> (T, Bytes) {
        (self.inner, self.pre.unwrap_or_default())
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Rewind<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(mut prefix) = self.pre.take() {
            if !prefix.is_empty() {
                let n = prefix.len().min(buf.remaining());
                buf.put_slice(&prefix[..n]);
                prefix.advance(n);
                if !prefix.is_empty() {
                    self.pre = Some(prefix);
                }
                return Poll::Ready(Ok(()));
            }
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Rewind<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn replays_prefix_before_inner() {
        let mut stream = Rewind::new_buffered(&b"world"[..], Bytes::from_static(b"hello "));
        assert_eq!(stream.buffered(), b"hello ");

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
        assert!(stream.buffered().is_empty());
    }

    #[tokio::test]
    async fn small_reads_drain_prefix_in_pieces() {
        let mut stream = Rewind::new_buffered(&b"CD"[..], Bytes::from_static(b"AB"));

        let mut one = [0u8; 1];
        stream.read_exact(&mut one).await.unwrap();
        assert_eq!(&one, b"A");
        assert_eq!(stream.buffered(), b"B");

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"BCD");
    }

    #[tokio::test]
    async fn empty_prefix_reads_inner() {
        let mut stream = Rewind::new_buffered(&b"xyz"[..], Bytes::new());
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"xyz");
    }

    #[tokio::test]
    async fn writes_pass_through() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = Rewind::new_buffered(client, Bytes::from_static(b"ignored"));
        stream.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        let (_inner, rest) = stream.into_inner();
        assert_eq!(&rest[..], b"ignored");
    }
}
