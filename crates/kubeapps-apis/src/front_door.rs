//! Front door: the externally bound multiplexer.
//!
//! Each method of the new-generation registry (health included) is served in
//! place by the [`UnifiedHandler`]; every other request falls through to the
//! [`Bridge`] and so to the legacy generation.

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::bridge::Bridge;
use crate::rpc::UnifiedHandler;

/// Build the front door router. The route table is fixed from here on.
pub fn front_door(handler: UnifiedHandler, bridge: Bridge) -> Router {
    let mut router = Router::new();
    for path in handler.methods() {
        debug!(path = %path, "front door route");
        router = router.route_service(&path, handler.clone());
    }
    router
        .fallback_service(bridge)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::StaticChecker;
    use crate::rpc::tests::grpc_frame;
    use crate::rpc::{RequestLogger, RpcRegistry};
    use axum::body::Body;
    use http_body_util::BodyExt;
    use kubeapps_core::proto::health::{CHECK, HealthCheckRequest, HealthCheckResponse, ServingStatus};
    use prost::Message;
    use tower::ServiceExt;

    fn router(bridge_port: u16) -> Router {
        let mut registry = RpcRegistry::new(RequestLogger::default());
        StaticChecker::default().register(&mut registry).unwrap();
        front_door(
            UnifiedHandler::new(registry.into_server()),
            Bridge::new(bridge_port).unwrap(),
        )
    }

    #[tokio::test]
    async fn health_is_served_in_place() {
        let request = http::Request::builder()
            .method("POST")
            .uri(CHECK)
            .header("content-type", "application/grpc-web+proto")
            .body(Body::from(grpc_frame(&HealthCheckRequest::default())))
            .unwrap();

        let response = router(1).oneshot(request).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
        let decoded = HealthCheckResponse::decode(&body[5..5 + len]).unwrap();
        assert_eq!(decoded.status, ServingStatus::Serving as i32);
    }

    #[tokio::test]
    async fn other_paths_fall_through_to_the_bridge() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let request = http::Request::builder()
            .uri("/core/packages/v1alpha1/availablepackages")
            .body(Body::empty())
            .unwrap();
        let response = router(port).oneshot(request).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::BAD_GATEWAY);
    }
}
