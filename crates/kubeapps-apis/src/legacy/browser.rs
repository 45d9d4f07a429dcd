//! Browser-RPC wrapper: gRPC-Web around the legacy [`RpcServer`], behind a
//! CORS policy.

use axum::http::{HeaderName, HeaderValue, Method, request};
use std::time::Duration;
use tonic_web::{GrpcWebLayer, GrpcWebService};
use tower::Layer;
use tower_http::cors::{AllowHeaders, AllowOrigin, Cors, CorsLayer};

use crate::config::OriginPolicy;
use crate::rpc::RpcServer;

/// gRPC-Web service with CORS handling.
pub type BrowserRpc = Cors<GrpcWebService<RpcServer>>;

/// How long browsers may cache a preflight answer.
const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(600);

pub fn cors_layer(origins: &OriginPolicy) -> CorsLayer {
    let policy = origins.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &request::Parts| {
                origin.to_str().map(|o| policy.allows(o)).unwrap_or(false)
            },
        ))
        .allow_methods([Method::POST])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .expose_headers([
            HeaderName::from_static("grpc-status"),
            HeaderName::from_static("grpc-message"),
        ])
        .max_age(PREFLIGHT_MAX_AGE)
}

/// Wrap `server` so browsers can call it.
pub fn browser_rpc(server: RpcServer, origins: &OriginPolicy) -> BrowserRpc {
    cors_layer(origins).layer(GrpcWebLayer::new().layer(server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{RequestLogger, RpcRegistry};
    use tonic::body::BoxBody;
    use tower::ServiceExt;

    fn browser(origins: OriginPolicy) -> BrowserRpc {
        browser_rpc(RpcRegistry::new(RequestLogger::default()).into_server(), &origins)
    }

    fn preflight(origin: &str) -> http::Request<BoxBody> {
        http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/kubeappsapis.core.packages.v1alpha1.PackagesService/GetAvailablePackageSummaries")
            .header("origin", origin)
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type,x-grpc-web")
            .body(tonic::body::empty_body())
            .unwrap()
    }

    #[tokio::test]
    async fn preflight_mirrors_requested_headers() {
        let response = browser(OriginPolicy::Any)
            .oneshot(preflight("https://dashboard.example"))
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "https://dashboard.example");
        assert_eq!(headers["access-control-allow-headers"], "content-type,x-grpc-web");
        assert_eq!(headers["access-control-allow-credentials"], "true");
    }

    #[tokio::test]
    async fn disallowed_origins_get_no_cors_headers() {
        let policy = OriginPolicy::Allow(vec!["https://dashboard.example".into()]);
        let response = browser(policy)
            .oneshot(preflight("https://evil.example"))
            .await
            .unwrap();
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }
}
