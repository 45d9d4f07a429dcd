//! New-generation handler: one registration served over gRPC, gRPC-Web and
//! Connect.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use http_body::Body;
use std::convert::Infallible;
use std::fmt;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::Status;
use tonic_web::{GrpcWebLayer, GrpcWebService};
use tower::{Layer, Service, ServiceExt};

use super::connect::{self, ConnectCodec};
use super::{BoxError, BoxFuture, RpcServer, grpc_error_response};

/// Which protocol a request speaks, judged from its `content-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    GrpcWeb,
    Connect(ConnectCodec),
}

impl Protocol {
    pub fn detect(content_type: Option<&HeaderValue>) -> Option<Self> {
        let value = content_type?.to_str().ok()?;
        if value.starts_with("application/grpc-web") {
            Some(Protocol::GrpcWeb)
        } else if value.starts_with("application/grpc") {
            Some(Protocol::Grpc)
        } else {
            ConnectCodec::from_content_type(value).map(Protocol::Connect)
        }
    }
}

/// Serves the methods of an [`RpcServer`] to gRPC, gRPC-Web and Connect
/// clients. Requests in any other encoding get `415 Unsupported Media Type`.
#[derive(Clone)]
pub struct UnifiedHandler {
    server: RpcServer,
    grpc_web: GrpcWebService<RpcServer>,
}

impl UnifiedHandler {
    pub fn new(server: RpcServer) -> Self {
        let grpc_web = GrpcWebLayer::new().layer(server.clone());
        Self { server, grpc_web }
    }

    /// Method paths this handler answers.
    pub fn methods(&self) -> Vec<String> {
        self.server.methods()
    }
}

impl fmt::Debug for UnifiedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnifiedHandler")
            .field("server", &self.server)
            .finish()
    }
}

impl<B> Service<http::Request<B>> for UnifiedHandler
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + fmt::Display,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Result<Self::Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        match Protocol::detect(request.headers().get(CONTENT_TYPE)) {
            Some(Protocol::GrpcWeb) => {
                Box::pin(self.grpc_web.clone().oneshot(request.map(tonic::body::boxed)))
            }
            Some(Protocol::Grpc) => Box::pin(self.server.clone().oneshot(request)),
            Some(Protocol::Connect(codec)) => match self.server.method(request.uri().path()) {
                Some(method) => {
                    Box::pin(async move { Ok(connect::serve_unary(method, codec, request).await) })
                }
                None => {
                    let status = Status::unimplemented(format!("unknown method {}", request.uri().path()));
                    Box::pin(async move { Ok(connect::error_response(&status)) })
                }
            },
            None => Box::pin(async move {
                let mut response = grpc_error_response(&Status::unimplemented("unsupported content type"));
                *response.status_mut() = StatusCode::UNSUPPORTED_MEDIA_TYPE;
                response.headers_mut().remove(CONTENT_TYPE);
                Ok(response)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::tests::grpc_frame;
    use crate::rpc::{RequestLogger, RpcRegistry};
    use http_body_util::{BodyExt, Full};
    use kubeapps_core::proto::plugins::{
        GET_CONFIGURED_PLUGINS, GetConfiguredPluginsRequest, GetConfiguredPluginsResponse, Plugin,
    };
    use prost::Message;
    use tonic::{Request, Response};

    fn handler() -> UnifiedHandler {
        let mut registry = RpcRegistry::new(RequestLogger::default());
        registry
            .unary(GET_CONFIGURED_PLUGINS, |_req: Request<GetConfiguredPluginsRequest>| async {
                Ok(Response::new(GetConfiguredPluginsResponse {
                    plugins: vec![Plugin {
                        name: "kapp_controller.packages".into(),
                        version: "v1alpha1".into(),
                    }],
                }))
            })
            .unwrap();
        UnifiedHandler::new(registry.into_server())
    }

    fn post(content_type: &str, body: impl Into<Bytes>) -> http::Request<Full<Bytes>> {
        http::Request::builder()
            .method("POST")
            .uri(GET_CONFIGURED_PLUGINS)
            .header("content-type", content_type)
            .body(Full::new(body.into()))
            .unwrap()
    }

    #[test]
    fn protocols_are_detected_from_content_type() {
        let detect = |v: &'static str| Protocol::detect(Some(&HeaderValue::from_static(v)));
        assert_eq!(detect("application/grpc"), Some(Protocol::Grpc));
        assert_eq!(detect("application/grpc+proto"), Some(Protocol::Grpc));
        assert_eq!(detect("application/grpc-web+proto"), Some(Protocol::GrpcWeb));
        assert_eq!(detect("application/json"), Some(Protocol::Connect(ConnectCodec::Json)));
        assert_eq!(detect("text/html"), None);
        assert_eq!(Protocol::detect(None), None);
    }

    #[tokio::test]
    async fn connect_json_call() {
        let response = handler().oneshot(post("application/json", "{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
            serde_json::json!({ "plugins": [{ "name": "kapp_controller.packages", "version": "v1alpha1" }] })
        );
    }

    #[tokio::test]
    async fn connect_proto_call() {
        let response = handler()
            .oneshot(post("application/proto", Bytes::new()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let decoded = GetConfiguredPluginsResponse::decode(body).unwrap();
        assert_eq!(decoded.plugins.len(), 1);
    }

    #[tokio::test]
    async fn grpc_web_call_carries_trailers_in_the_body() {
        let response = handler()
            .oneshot(post(
                "application/grpc-web+proto",
                grpc_frame(&GetConfiguredPluginsRequest {}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/grpc-web+proto");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        // data frame, then the 0x80 trailer frame
        assert_eq!(body[0], 0x00);
        let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
        assert_eq!(body[5 + len], 0x80);
        let trailers = String::from_utf8_lossy(&body[5 + len + 5..]).to_lowercase().replace(" ", "");
        assert!(trailers.contains("grpc-status:0"), "{trailers}");
    }

    #[tokio::test]
    async fn unknown_encodings_are_unsupported() {
        let response = handler().oneshot(post("text/plain", "hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
