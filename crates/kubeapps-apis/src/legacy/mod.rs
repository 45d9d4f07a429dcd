//! Legacy RPC server generation.
//!
//! The binary-RPC sub-listener is served by the [`RpcServer`] itself. The
//! browser-RPC and HTTP sub-listeners are served by [`LegacyHttpHandler`],
//! which sends each request to the browser-RPC wrapper (gRPC-Web, its CORS
//! preflights, or the `grpc-websockets` transport) and everything else to
//! the REST/JSON gateway.

pub mod browser;
pub mod websocket;

pub use browser::{BrowserRpc, browser_rpc, cors_layer};
pub use websocket::websocket_router;

use axum::Router;
use axum::body::Body;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, UPGRADE};
use http::{HeaderMap, Method};
use std::convert::Infallible;
use std::fmt;
use std::task::{Context, Poll};
use tonic_web::GrpcWebLayer;
use tower::{Layer, Service, ServiceExt};

use crate::config::ServeConfig;
use crate::rpc::{BoxError, BoxFuture, RpcServer};

/// Which handler of the legacy HTTP surface a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// gRPC-Web, or a CORS preflight for it.
    Browser,
    /// gRPC-Web over WebSocket.
    WebSocket,
    /// REST/JSON gateway.
    Gateway,
}

/// HTTP handler of the browser-RPC and HTTP sub-listeners.
#[derive(Clone)]
pub struct LegacyHttpHandler {
    server: RpcServer,
    browser: BrowserRpc,
    websocket: Router,
    gateway: Router,
}

impl LegacyHttpHandler {
    /// Browser-RPC origins and WebSocket limits are taken from `config`.
    pub fn new(server: RpcServer, gateway: Router, config: &ServeConfig) -> Self {
        let browser = browser_rpc(server.clone(), &config.origins);
        let websocket = websocket_router(
            GrpcWebLayer::new().layer(server.clone()),
            config.websocket_origins.clone(),
            config.websocket_max_request_bytes,
        );
        Self {
            server,
            browser,
            websocket,
            gateway,
        }
    }

    pub fn route<B>(&self, request: &http::Request<B>) -> Route {
        let headers = request.headers();
        if is_grpc_web_request(request.method(), headers) {
            Route::Browser
        } else if is_acceptable_cors_request(request.method(), headers)
            && self.server.method(request.uri().path()).is_some()
        {
            Route::Browser
        } else if is_websocket_request(headers) {
            Route::WebSocket
        } else {
            Route::Gateway
        }
    }
}

impl fmt::Debug for LegacyHttpHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyHttpHandler")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

fn is_grpc_web_request(method: &Method, headers: &HeaderMap) -> bool {
    method == Method::POST
        && headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/grpc-web"))
}

fn is_acceptable_cors_request(method: &Method, headers: &HeaderMap) -> bool {
    method == Method::OPTIONS
        && headers
            .get_all("access-control-request-headers")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|h| h.trim().eq_ignore_ascii_case("x-grpc-web"))
}

fn is_websocket_request(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    upgrade
        && headers
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains(websocket::PROTOCOL))
}

impl<B> Service<http::Request<B>> for LegacyHttpHandler
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<Result<Self::Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        match self.route(&request) {
            Route::Browser => {
                let browser = self.browser.clone();
                let request = request.map(tonic::body::boxed);
                Box::pin(async move {
                    let response = browser.oneshot(request).await?;
                    Ok(response.map(Body::new))
                })
            }
            Route::WebSocket => Box::pin(self.websocket.clone().oneshot(request.map(Body::new))),
            Route::Gateway => Box::pin(self.gateway.clone().oneshot(request.map(Body::new))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::tests::grpc_frame;
    use crate::rpc::{RequestLogger, RpcRegistry};
    use axum::routing::get;
    use http_body_util::{BodyExt, Full};
    use kubeapps_core::proto::plugins::{
        GET_CONFIGURED_PLUGINS, GetConfiguredPluginsRequest, GetConfiguredPluginsResponse,
    };
    use tonic::{Request, Response};

    fn handler() -> LegacyHttpHandler {
        let mut registry = RpcRegistry::new(RequestLogger::default());
        registry
            .unary(GET_CONFIGURED_PLUGINS, |_req: Request<GetConfiguredPluginsRequest>| async {
                Ok(Response::new(GetConfiguredPluginsResponse::default()))
            })
            .unwrap();
        let gateway = Router::new().route("/core/plugins/v1alpha1/configured-plugins", get(|| async { "gateway" }));
        LegacyHttpHandler::new(registry.into_server(), gateway, &ServeConfig::default())
    }

    fn request(method: Method, path: &str) -> http::request::Builder {
        http::Request::builder().method(method).uri(path)
    }

    #[test]
    fn requests_are_routed_by_shape() {
        let handler = handler();
        let grpc_web = request(Method::POST, GET_CONFIGURED_PLUGINS)
            .header("content-type", "application/grpc-web+proto")
            .body(())
            .unwrap();
        assert_eq!(handler.route(&grpc_web), Route::Browser);

        let preflight = request(Method::OPTIONS, GET_CONFIGURED_PLUGINS)
            .header("access-control-request-headers", "content-type, X-Grpc-Web")
            .body(())
            .unwrap();
        assert_eq!(handler.route(&preflight), Route::Browser);

        let unregistered_preflight = request(Method::OPTIONS, "/a.b.C/D")
            .header("access-control-request-headers", "x-grpc-web")
            .body(())
            .unwrap();
        assert_eq!(handler.route(&unregistered_preflight), Route::Gateway);

        let socket = request(Method::GET, GET_CONFIGURED_PLUGINS)
            .header("upgrade", "websocket")
            .header("sec-websocket-protocol", "grpc-websockets")
            .body(())
            .unwrap();
        assert_eq!(handler.route(&socket), Route::WebSocket);

        let rest = request(Method::GET, "/core/plugins/v1alpha1/configured-plugins").body(()).unwrap();
        assert_eq!(handler.route(&rest), Route::Gateway);
    }

    #[tokio::test]
    async fn grpc_web_reaches_the_rpc_server() {
        let request = request(Method::POST, GET_CONFIGURED_PLUGINS)
            .header("content-type", "application/grpc-web+proto")
            .body(Full::new(grpc_frame(&GetConfiguredPluginsRequest {})))
            .unwrap();
        let response = handler().oneshot(request).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/grpc-web+proto");
    }

    #[tokio::test]
    async fn other_requests_reach_the_gateway() {
        let request = request(Method::GET, "/core/plugins/v1alpha1/configured-plugins")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handler().oneshot(request).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"gateway");
    }
}
