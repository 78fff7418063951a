//! HTTP and the framed echo protocol sharing one port.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use mpserver::{EchoProtocol, HttpProtocol, Server};

mod common;

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn start() -> (Arc<Server>, std::net::SocketAddr, tokio::task::JoinHandle<Result<(), mpserver::ServerError>>) {
    let router = Router::new().route("/hello", get(|| async { "hello" }));

    let server = Arc::new(Server::new(common::options(1000)));
    server.set_listen_addr("127.0.0.1:0");
    server.register_protocol(EchoProtocol::default()).unwrap();
    server.register_protocol(HttpProtocol::new(router)).unwrap();

    let (addr, handle) = common::start_server(Arc::clone(&server)).await;
    (server, addr, handle)
}

#[tokio::test]
async fn http_and_echo_share_a_port() {
    let (server, addr, handle) = start().await;

    let response = client()
        .get(format!("http://{addr}/hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello");

    let missing = client()
        .get(format!("http://{addr}/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"BIN1").await.unwrap();
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    for payload in [&b"first"[..], b"", b"third frame"] {
        framed.send(Bytes::copy_from_slice(payload)).await.unwrap();
        assert_eq!(framed.next().await.unwrap().unwrap(), payload);
    }
    drop(framed);

    assert!(common::exchange(addr, b"SSH-2.0-client\r\n").await.is_empty());

    server.stop().await.unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn http2_prior_knowledge_is_recognised() {
    let (server, addr, handle) = start().await;

    let client = reqwest::Client::builder()
        .no_proxy()
        .http2_prior_knowledge()
        .build()
        .unwrap();
    let response = client
        .get(format!("http://{addr}/hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.version(), reqwest::Version::HTTP_2);
    assert_eq!(response.text().await.unwrap(), "hello");

    server.stop().await.unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn keep_alive_requests_stay_on_the_http_session() {
    let (server, addr, handle) = start().await;

    let client = client();
    for _ in 0..3 {
        let body = client
            .get(format!("http://{addr}/hello"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "hello");
    }
    assert!(server.active_sessions() <= 1);

    server.stop().await.unwrap();
    handle.await.unwrap().unwrap();
}
