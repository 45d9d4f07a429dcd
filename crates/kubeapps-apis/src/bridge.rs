//! Transport bridge: the reverse proxy from the front door to the legacy
//! generation's internal port.
//!
//! Requests that arrived over HTTP/2 are forwarded with an HTTP/2
//! prior-knowledge client over cleartext TCP; everything else with an
//! HTTP/1.1 client. Only scheme and authority are rewritten. Each transport
//! keeps a separate connection pool per content-type [`Class`], because the
//! legacy demultiplexer routes a whole connection by its first request: an
//! upstream connection opened for a gRPC call must never carry a REST call.

use axum::body::Body;
use http::header::{CONNECTION, CONTENT_TYPE, HeaderName, TE, UPGRADE};
use http::uri::{Authority, Scheme};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Uri, Version};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tower::Service;
use tracing::{debug, warn};

use crate::demux::{Class, classify_content_type};
use crate::rpc::{BoxError, BoxFuture};
use crate::transport::RemoteAddr;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that only describe one hop.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

/// Upstream transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// HTTP/2 prior knowledge over cleartext TCP.
    H2c,
    Http1,
}

impl Transport {
    /// Transport matching the protocol the inbound request was negotiated with.
    pub fn for_version(version: Version) -> Self {
        if version == Version::HTTP_2 {
            Transport::H2c
        } else {
            Transport::Http1
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::H2c => "h2c",
            Transport::Http1 => "http1",
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dialing
// ─────────────────────────────────────────────────────────────────────────────

/// Upstream connections opened per transport.
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    h2c: Arc<AtomicUsize>,
    http1: Arc<AtomicUsize>,
}

impl BridgeStats {
    pub fn h2c_dials(&self) -> usize {
        self.h2c.load(Ordering::Relaxed)
    }

    pub fn http1_dials(&self) -> usize {
        self.http1.load(Ordering::Relaxed)
    }

    fn counter(&self, transport: Transport) -> Arc<AtomicUsize> {
        match transport {
            Transport::H2c => self.h2c.clone(),
            Transport::Http1 => self.http1.clone(),
        }
    }
}

/// Plain TCP connector that counts its dials.
#[derive(Clone)]
pub struct UpstreamDialer {
    inner: HttpConnector,
    dials: Arc<AtomicUsize>,
}

impl UpstreamDialer {
    fn new(dials: Arc<AtomicUsize>) -> Self {
        let mut inner = HttpConnector::new();
        inner.set_nodelay(true);
        Self { inner, dials }
    }
}

impl Service<Uri> for UpstreamDialer {
    type Response = TokioIo<TcpStream>;
    type Error = BoxError;
    type Future = BoxFuture<Result<Self::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        self.dials.fetch_add(1, Ordering::Relaxed);
        let connecting = self.inner.call(uri);
        Box::pin(async move { connecting.await.map_err(Into::into) })
    }
}

type UpstreamClient = Client<UpstreamDialer, Body>;

/// One client per content-type class.
#[derive(Clone)]
struct Pools {
    binary: UpstreamClient,
    browser: UpstreamClient,
    other: UpstreamClient,
}

impl Pools {
    fn new(transport: Transport, stats: &BridgeStats) -> Self {
        let client = || {
            let dialer = UpstreamDialer::new(stats.counter(transport));
            let mut builder = Client::builder(TokioExecutor::new());
            if transport == Transport::H2c {
                builder.http2_only(true);
            }
            builder.build(dialer)
        };
        Self {
            binary: client(),
            browser: client(),
            other: client(),
        }
    }

    fn get(&self, class: Class) -> &UpstreamClient {
        match class {
            Class::Binary => &self.binary,
            Class::Browser => &self.browser,
            Class::Http => &self.other,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Reverse proxy to `127.0.0.1:<port>`.
#[derive(Clone)]
pub struct Bridge {
    authority: Authority,
    h2c: Pools,
    http1: Pools,
    stats: BridgeStats,
}

impl Bridge {
    pub fn new(port: u16) -> Result<Self, http::Error> {
        let stats = BridgeStats::default();
        let authority = Authority::try_from(SocketAddr::from((Ipv4Addr::LOCALHOST, port)).to_string())?;
        Ok(Self {
            authority,
            h2c: Pools::new(Transport::H2c, &stats),
            http1: Pools::new(Transport::Http1, &stats),
            stats,
        })
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn upstream(&self) -> &Authority {
        &self.authority
    }

    async fn forward(self, mut request: Request<Body>) -> Response<Body> {
        let transport = Transport::for_version(request.version());
        let class = classify_content_type(request.headers().get(CONTENT_TYPE).map(HeaderValue::as_bytes));
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let upgrade = upgrade_protocol(request.headers());
        let downstream_upgrade = upgrade.is_some().then(|| hyper::upgrade::on(&mut request));

        if let Err(err) = self.prepare(&mut request, upgrade) {
            warn!(method = %method, path = %path, error = %err, "bridge: invalid upstream request");
            return bad_gateway();
        }

        let client = match transport {
            Transport::H2c => self.h2c.get(class),
            Transport::Http1 => self.http1.get(class),
        };
        let mut response = match client.request(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%transport, %class, method = %method, path = %path, error = %err, "bridge: upstream request failed");
                return bad_gateway();
            }
        };
        debug!(%transport, %class, method = %method, path = %path, status = %response.status(), "bridged");

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(downstream) = downstream_upgrade {
                let upstream = hyper::upgrade::on(&mut response);
                tokio::spawn(tunnel(downstream, upstream));
            }
        } else {
            strip_hop_by_hop(response.headers_mut());
        }
        response.map(Body::new)
    }

    /// Point `request` at the upstream and make its headers fit for the next hop.
    fn prepare(&self, request: &mut Request<Body>, upgrade: Option<HeaderValue>) -> Result<(), http::Error> {
        let mut parts = request.uri().clone().into_parts();
        parts.scheme = Some(Scheme::HTTP);
        parts.authority = Some(self.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(http::uri::PathAndQuery::from_static("/"));
        }
        *request.uri_mut() = Uri::from_parts(parts)?;

        let remote = request.extensions().get::<RemoteAddr>().copied();
        let headers = request.headers_mut();
        let trailers = accepts_trailers(headers);
        strip_hop_by_hop(headers);
        if trailers {
            headers.insert(TE, HeaderValue::from_static("trailers"));
        }
        if let Some(protocol) = upgrade {
            headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
            headers.insert(UPGRADE, protocol);
        }
        if let Some(RemoteAddr(remote)) = remote {
            append_forwarded_for(headers, remote);
        }
        Ok(())
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("upstream", &self.authority)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Service<Request<Body>> for Bridge {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let bridge = self.clone();
        Box::pin(async move { Ok(bridge.forward(request).await) })
    }
}

fn bad_gateway() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}

/// The `Upgrade` protocol of an HTTP/1 upgrade request.
fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if wants_upgrade { headers.get(UPGRADE).cloned() } else { None }
}

fn accepts_trailers(headers: &HeaderMap) -> bool {
    headers
        .get_all(TE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("trailers"))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(UPGRADE);
}

fn append_forwarded_for(headers: &mut HeaderMap, remote: SocketAddr) {
    let ip = remote.ip().to_string();
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

async fn tunnel(downstream: hyper::upgrade::OnUpgrade, upstream: hyper::upgrade::OnUpgrade) {
    let (downstream, upstream) = match tokio::try_join!(downstream, upstream) {
        Ok(pair) => pair,
        Err(err) => {
            debug!(error = %err, "bridge: upgrade failed");
            return;
        }
    };
    let mut downstream = TokioIo::new(downstream);
    let mut upstream = TokioIo::new(upstream);
    if let Err(err) = tokio::io::copy_bidirectional(&mut downstream, &mut upstream).await {
        debug!(error = %err, "bridge: tunnel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_follows_the_negotiated_version() {
        assert_eq!(Transport::for_version(Version::HTTP_2), Transport::H2c);
        assert_eq!(Transport::for_version(Version::HTTP_11), Transport::Http1);
        assert_eq!(Transport::for_version(Version::HTTP_10), Transport::Http1);
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("1"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["authorization"], "Bearer t");
    }

    #[test]
    fn requests_are_pointed_at_the_upstream() {
        let bridge = Bridge::new(4242).unwrap();
        let mut request = Request::builder()
            .uri("/core/packages/v1alpha1/availablepackages?context.cluster=default")
            .header("te", "trailers")
            .header("connection", "te")
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(RemoteAddr("192.168.1.7:5000".parse().unwrap()));

        bridge.prepare(&mut request, None).unwrap();
        assert_eq!(
            request.uri().to_string(),
            "http://127.0.0.1:4242/core/packages/v1alpha1/availablepackages?context.cluster=default"
        );
        assert_eq!(request.headers()["te"], "trailers");
        assert!(request.headers().get("connection").is_none());
        assert_eq!(request.headers()["x-forwarded-for"], "10.0.0.1, 192.168.1.7");
    }

    #[test]
    fn upgrades_keep_their_protocol() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        assert_eq!(upgrade_protocol(&headers), Some(HeaderValue::from_static("websocket")));

        headers.remove(CONNECTION);
        assert_eq!(upgrade_protocol(&headers), None);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_bad_gateway() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let response = Bridge::new(port)
            .unwrap()
            .forward(Request::builder().uri("/docs").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
