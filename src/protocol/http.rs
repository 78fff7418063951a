//! HTTP/1.x and HTTP/2 (prior knowledge) served by an axum router.

use async_trait::async_trait;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;

use crate::error::BoxError;
use crate::net::Connection;
use crate::protocol::Protocol;

/// Request-line method tokens, including the trailing space.
const METHODS: &[&[u8]] = &[
    b"GET ",
    b"HEAD ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"CONNECT ",
    b"OPTIONS ",
    b"TRACE ",
    b"PATCH ",
];

/// Leading part of the HTTP/2 connection preface.
const H2_PREFACE: &[u8] = b"PRI * HTTP/2";

/// Serves HTTP on connections that open with a request line or the HTTP/2 preface.
#[derive(Clone)]
pub struct HttpProtocol {
    name: String,
    router: Router,
}

impl HttpProtocol {
    pub fn new(router: Router) -> Self {
        Self::with_name("http", router)
    }

    pub fn with_name(name: impl Into<String>, router: Router) -> Self {
        Self {
            name: name.into(),
            router,
        }
    }
}

#[async_trait]
impl Protocol for HttpProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.starts_with(H2_PREFACE) || METHODS.iter().any(|method| prefix.starts_with(method))
    }

    fn needs_more(&self, prefix: &[u8]) -> bool {
        METHODS
            .iter()
            .chain(std::iter::once(&H2_PREFACE))
            .any(|token| prefix.len() < token.len() && token.starts_with(prefix))
    }

    async fn serve(&self, conn: Connection) -> Result<(), BoxError> {
        let peer_addr = conn.peer_addr();
        let service = TowerToHyperService::new(self.router.clone());
        let builder = auto::Builder::new(TokioExecutor::new());

        builder.serve_connection(TokioIo::new(conn), service).await?;
        tracing::trace!(peer_addr = %peer_addr, "HTTP connection closed");
        Ok(())
    }
}
