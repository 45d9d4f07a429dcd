//! RPC plumbing shared by both server generations.
//!
//! Services register typed unary handlers on an [`RpcRegistry`] under their
//! full method path. Freezing the registry with
//! [`RpcRegistry::into_server`] yields an immutable [`RpcServer`] (the
//! binary-RPC tower service); no method can be added once serving starts.
//! The same frozen route table also backs the new-generation
//! [`UnifiedHandler`], which adds gRPC-Web and the Connect protocol.
//!
//! Every registered handler is wrapped by the registry's [`RequestLogger`],
//! so each unary call is logged exactly once whichever protocol carried it.
//!
//! Whole gRPC services built elsewhere (server reflection) are mounted with
//! [`RpcRegistry::service`] and answer every method of their service name
//! over binary RPC.

pub mod connect;
pub mod logging;
pub mod unified;

use bytes::Bytes;
use http::HeaderValue;
use http_body::Body;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tonic::body::BoxBody;
use tonic::codec::ProstCodec;
use tonic::server::{Grpc, NamedService, UnaryService};
use tonic::{Code, Request, Response, Status};
use tower::ServiceExt;
use tower::util::BoxCloneSyncService;

pub use connect::ConnectCodec;
pub use logging::RequestLogger;
pub use unified::UnifiedHandler;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A mounted gRPC service, type-erased.
pub type GrpcService = BoxCloneSyncService<http::Request<BoxBody>, http::Response<BoxBody>, Infallible>;

/// A message usable on every protocol: prost for the binary framings, serde
/// for the JSON mappings.
pub trait RpcMessage: Message + Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> RpcMessage for T where T: Message + Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("method {0} is already registered")]
    DuplicateMethod(String),

    #[error("'{0}' is not a /package.Service/Method path")]
    InvalidPath(String),

    #[error("service {0} is already registered")]
    DuplicateService(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Type-erased methods
// ─────────────────────────────────────────────────────────────────────────────

type Handler<Req, Resp> =
    Arc<dyn Fn(Request<Req>) -> BoxFuture<Result<Response<Resp>, Status>> + Send + Sync>;

/// A registered unary method, callable over every supported protocol.
pub(crate) trait UnaryMethod: Send + Sync {
    fn path(&self) -> &str;

    /// Serve a gRPC (binary framing) request.
    fn serve_grpc(&self, request: http::Request<BoxBody>) -> BoxFuture<http::Response<BoxBody>>;

    /// Serve a Connect unary request whose body has already been read.
    fn serve_connect(
        &self,
        codec: ConnectCodec,
        metadata: tonic::metadata::MetadataMap,
        body: Bytes,
    ) -> BoxFuture<Result<Bytes, Status>>;
}

struct TypedMethod<Req, Resp> {
    path: Arc<str>,
    handler: Handler<Req, Resp>,
    logger: RequestLogger,
}

impl<Req, Resp> Clone for TypedMethod<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            handler: self.handler.clone(),
            logger: self.logger.clone(),
        }
    }
}

impl<Req: RpcMessage, Resp: RpcMessage> TypedMethod<Req, Resp> {
    fn invoke(&self, request: Request<Req>) -> BoxFuture<Result<Response<Resp>, Status>> {
        self.logger.instrument(self.path.clone(), (self.handler)(request))
    }
}

impl<Req: RpcMessage, Resp: RpcMessage> UnaryService<Req> for TypedMethod<Req, Resp> {
    type Response = Resp;
    type Future = BoxFuture<Result<Response<Resp>, Status>>;

    fn call(&mut self, request: Request<Req>) -> Self::Future {
        self.invoke(request)
    }
}

impl<Req: RpcMessage, Resp: RpcMessage> UnaryMethod for TypedMethod<Req, Resp> {
    fn path(&self) -> &str {
        &self.path
    }

    fn serve_grpc(&self, request: http::Request<BoxBody>) -> BoxFuture<http::Response<BoxBody>> {
        let method = self.clone();
        Box::pin(async move {
            let mut grpc = Grpc::new(ProstCodec::<Resp, Req>::default());
            grpc.unary(method, request).await
        })
    }

    fn serve_connect(
        &self,
        codec: ConnectCodec,
        metadata: tonic::metadata::MetadataMap,
        body: Bytes,
    ) -> BoxFuture<Result<Bytes, Status>> {
        let method = self.clone();
        Box::pin(async move {
            let message: Req = codec.decode(&body)?;
            let mut request = Request::new(message);
            *request.metadata_mut() = metadata;
            let response = method.invoke(request).await?;
            codec.encode(response.get_ref())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RpcRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable set of unary methods, frozen into an [`RpcServer`].
pub struct RpcRegistry {
    logger: RequestLogger,
    methods: HashMap<String, Arc<dyn UnaryMethod>>,
    services: HashMap<String, GrpcService>,
}

impl RpcRegistry {
    pub fn new(logger: RequestLogger) -> Self {
        Self {
            logger,
            methods: HashMap::new(),
            services: HashMap::new(),
        }
    }

    /// Register `handler` for the unary method at `path`
    /// (`/package.Service/Method`).
    pub fn unary<Req, Resp, F, Fut>(&mut self, path: &str, handler: F) -> Result<&mut Self, RegistryError>
    where
        Req: RpcMessage,
        Resp: RpcMessage,
        F: Fn(Request<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<Resp>, Status>> + Send + 'static,
    {
        if kubeapps_core::proto::split_method_path(path).is_none() {
            return Err(RegistryError::InvalidPath(path.to_string()));
        }
        if self.methods.contains_key(path) {
            return Err(RegistryError::DuplicateMethod(path.to_string()));
        }
        if let Some((service, _)) = kubeapps_core::proto::split_method_path(path) {
            if self.services.contains_key(service) {
                return Err(RegistryError::DuplicateService(service.to_string()));
            }
        }
        let handler: Handler<Req, Resp> =
            Arc::new(move |request| -> BoxFuture<Result<Response<Resp>, Status>> {
                Box::pin(handler(request))
            });
        let method = TypedMethod {
            path: Arc::from(path),
            handler,
            logger: self.logger.clone(),
        };
        self.methods.insert(path.to_string(), Arc::new(method));
        Ok(self)
    }

    /// Mount a complete gRPC service under its [`NamedService::NAME`]. Its
    /// methods are reachable over binary RPC only.
    pub fn service<S>(&mut self, service: S) -> Result<&mut Self, RegistryError>
    where
        S: NamedService
            + tower::Service<http::Request<BoxBody>, Response = http::Response<BoxBody>, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let name = S::NAME;
        let claimed = self
            .methods
            .keys()
            .any(|path| kubeapps_core::proto::split_method_path(path).is_some_and(|(s, _)| s == name));
        if claimed || self.services.contains_key(name) {
            return Err(RegistryError::DuplicateService(name.to_string()));
        }
        self.services.insert(name.to_string(), BoxCloneSyncService::new(service));
        Ok(self)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.methods.contains_key(path)
    }

    pub fn into_server(self) -> RpcServer {
        RpcServer {
            methods: Arc::new(self.methods),
            services: Arc::new(self.services),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RpcServer
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable route table serving gRPC. Unknown methods answer
/// `UNIMPLEMENTED`.
#[derive(Clone)]
pub struct RpcServer {
    methods: Arc<HashMap<String, Arc<dyn UnaryMethod>>>,
    services: Arc<HashMap<String, GrpcService>>,
}

impl RpcServer {
    /// Registered method paths, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.methods.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Names of the mounted services, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn method(&self, path: &str) -> Option<Arc<dyn UnaryMethod>> {
        self.methods.get(path).cloned()
    }

    fn mounted(&self, path: &str) -> Option<GrpcService> {
        let (service, _) = kubeapps_core::proto::split_method_path(path)?;
        self.services.get(service).cloned()
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("methods", &self.methods())
            .field("services", &self.services())
            .finish()
    }
}

impl<B> tower::Service<http::Request<B>> for RpcServer
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Result<Self::Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let path = request.uri().path();
        if let Some(method) = self.method(path) {
            let request = request.map(tonic::body::boxed);
            return Box::pin(async move { Ok(method.serve_grpc(request).await) });
        }
        match self.mounted(path) {
            Some(service) => Box::pin(service.oneshot(request.map(tonic::body::boxed))),
            None => {
                let status = Status::unimplemented(format!(
                    "unknown method {}",
                    request.uri().path()
                ));
                Box::pin(async move { Ok(grpc_error_response(&status)) })
            }
        }
    }
}

/// A trailers-only gRPC response carrying `status`.
pub fn grpc_error_response(status: &Status) -> http::Response<BoxBody> {
    let mut response = http::Response::new(tonic::body::empty_body());
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    if status.add_header(headers).is_err() {
        headers.insert("grpc-status", HeaderValue::from(Code::Internal as i32));
    }
    response
}

/// HTTP status a gRPC code maps to on the JSON protocols (Connect and the
/// REST gateway share the same table).
pub fn http_status_for(code: Code) -> http::StatusCode {
    use http::StatusCode;
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}
