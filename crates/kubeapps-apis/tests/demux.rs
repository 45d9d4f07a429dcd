//! Content-type classification over real sockets, under concurrent load.

use axum::Router;
use bytes::Bytes;
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use kubeapps_apis::demux::{Demux, MuxListener};
use kubeapps_apis::transport::serve_connections;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

fn answering(class: &'static str) -> Router {
    Router::new().fallback(move || async move { class })
}

fn serve(listener: MuxListener, class: &'static str) {
    tokio::spawn(serve_connections(class, listener, answering(class), Duration::from_secs(60)));
}

async fn start() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (demux, listeners) = Demux::new(listener, Duration::from_secs(2)).unwrap();
    let addr = demux.local_addr();
    serve(listeners.binary, "binary");
    serve(listeners.browser, "browser");
    serve(listeners.http, "http");
    tokio::spawn(demux.serve());
    addr
}

fn client(h2: bool) -> Client<HttpConnector, Full<Bytes>> {
    let mut builder = Client::builder(TokioExecutor::new());
    builder.http2_only(h2);
    builder.build_http()
}

async fn landed_on(
    addr: SocketAddr,
    h2: bool,
    method: Method,
    content_type: Option<&'static str>,
) -> String {
    let mut request = Request::builder().method(method).uri(format!("http://{addr}/classify"));
    if let Some(content_type) = content_type {
        request = request.header("content-type", content_type);
    }
    let request = request.body(Full::new(Bytes::from_static(b"payload"))).unwrap();
    // A fresh client per call, so each request is its own connection.
    let response = client(h2).request(request).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn concurrent_binary_rpc_connections_land_on_binary() {
    let addr = start().await;
    let calls: Vec<_> = (0..16)
        .map(|_| tokio::spawn(landed_on(addr, true, Method::POST, Some("application/grpc"))))
        .collect();
    for call in calls {
        assert_eq!(call.await.unwrap(), "binary");
    }
}

#[tokio::test]
async fn browser_rpc_lands_on_browser() {
    let addr = start().await;
    assert_eq!(
        landed_on(addr, true, Method::POST, Some("application/grpc-web")).await,
        "browser"
    );
}

#[tokio::test]
async fn http1_rpc_content_types_land_on_http() {
    let addr = start().await;
    assert_eq!(
        landed_on(addr, false, Method::POST, Some("application/grpc-web")).await,
        "http"
    );
    assert_eq!(
        landed_on(addr, false, Method::POST, Some("application/grpc")).await,
        "http"
    );
}

#[tokio::test]
async fn plain_http_lands_on_http() {
    let addr = start().await;
    assert_eq!(landed_on(addr, false, Method::GET, None).await, "http");
    assert_eq!(
        landed_on(addr, false, Method::POST, Some("application/json")).await,
        "http"
    );
    // Close but not exact: still HTTP.
    assert_eq!(
        landed_on(addr, false, Method::POST, Some("application/grpc+proto")).await,
        "http"
    );
}

#[tokio::test]
async fn mixed_load_is_classified_per_connection() {
    let addr = start().await;
    let mut calls = Vec::new();
    for i in 0..24 {
        let call = match i % 3 {
            0 => tokio::spawn(landed_on(addr, true, Method::POST, Some("application/grpc"))),
            1 => tokio::spawn(landed_on(addr, true, Method::POST, Some("application/grpc-web"))),
            _ => tokio::spawn(landed_on(addr, false, Method::GET, None)),
        };
        calls.push((i % 3, call));
    }
    for (kind, call) in calls {
        let expected = ["binary", "browser", "http"][kind];
        assert_eq!(call.await.unwrap(), expected);
    }
}
