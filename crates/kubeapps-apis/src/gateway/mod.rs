//! REST/JSON gateway.
//!
//! Exposes the core RPC services as REST endpoints by translating each HTTP
//! request into an RPC request message and forwarding it, over a plaintext
//! local hop, to the front door. Responses are written as JSON with
//! unpopulated fields omitted; unknown request fields are ignored.
//!
//! | Method | Path | RPC |
//! |--------|------|-----|
//! | GET  | `/core/plugins/v1alpha1/configured-plugins` | `PluginsService/GetConfiguredPlugins` |
//! | GET  | `/core/packages/v1alpha1/availablepackages` | `PackagesService/GetAvailablePackageSummaries` |
//! | GET  | `/core/packages/v1alpha1/installedpackages` | `PackagesService/GetInstalledPackageSummaries` |
//! | GET  | `/core/packages/v1alpha1/repositories/summaries` | `RepositoriesService/GetPackageRepositorySummaries` |
//! | POST | `/core/packages/v1alpha1/repositories` | `RepositoriesService/AddPackageRepository` |
//!
//! Besides the generated bindings the gateway serves the API description
//! (`/openapi.json`), the documentation page (`/docs`) and the operator logo
//! passthrough (see [`icon`]).

mod error;
pub mod icon;
pub mod query;

pub use error::GatewayError;
pub use icon::register_operator_logo_handler;
pub use query::RequestBody;

use axum::Router;
use axum::extract::Query;
use axum::http::{HeaderMap, HeaderName, Method};
use axum::response::Json;
use axum::routing::{MethodRouter, get_service, on};
use bytes::Bytes;
use http::uri::PathAndQuery;
use kubeapps_core::proto::packages::{
    ADD_PACKAGE_REPOSITORY, AddPackageRepositoryRequest, AddPackageRepositoryResponse,
    GET_AVAILABLE_PACKAGE_SUMMARIES, GET_INSTALLED_PACKAGE_SUMMARIES,
    GET_PACKAGE_REPOSITORY_SUMMARIES, GetAvailablePackageSummariesRequest,
    GetAvailablePackageSummariesResponse, GetInstalledPackageSummariesRequest,
    GetInstalledPackageSummariesResponse, GetPackageRepositorySummariesRequest,
    GetPackageRepositorySummariesResponse,
};
use kubeapps_core::proto::plugins::{
    GET_CONFIGURED_PLUGINS, GetConfiguredPluginsRequest, GetConfiguredPluginsResponse,
};
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::codec::ProstCodec;
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, Endpoint};
use tower_http::services::ServeFile;
use tracing::debug;

use crate::rpc::RpcMessage;

pub const CONFIGURED_PLUGINS_PATH: &str = "/core/plugins/v1alpha1/configured-plugins";
pub const AVAILABLE_PACKAGES_PATH: &str = "/core/packages/v1alpha1/availablepackages";
pub const INSTALLED_PACKAGES_PATH: &str = "/core/packages/v1alpha1/installedpackages";
pub const REPOSITORY_SUMMARIES_PATH: &str = "/core/packages/v1alpha1/repositories/summaries";
pub const REPOSITORIES_PATH: &str = "/core/packages/v1alpha1/repositories";

pub const OPENAPI_PATH: &str = "/openapi.json";
pub const DOCS_PATH: &str = "/docs";

/// Prefix of request headers forwarded as RPC metadata.
const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";

// ─────────────────────────────────────────────────────────────────────────────
// GatewayMux
// ─────────────────────────────────────────────────────────────────────────────

/// Route table of the gateway.
pub struct GatewayMux {
    router: Router,
    routes: BTreeSet<(String, String)>,
}

impl Default for GatewayMux {
    fn default() -> Self {
        Self {
            router: Router::new(),
            routes: BTreeSet::new(),
        }
    }
}

impl GatewayMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `method` on `path` (axum `{param}` syntax).
    pub fn handle(&mut self, method: Method, path: &str, handler: MethodRouter) -> Result<(), GatewayError> {
        if !self.routes.insert((path.to_string(), method.to_string())) {
            return Err(GatewayError::DuplicateRoute {
                method,
                path: path.to_string(),
            });
        }
        let router = std::mem::take(&mut self.router);
        self.router = router.route(path, handler);
        Ok(())
    }

    /// Registered `(method, path)` pairs, sorted by path.
    pub fn routes(&self) -> Vec<(String, String)> {
        self.routes
            .iter()
            .map(|(path, method)| (method.clone(), path.clone()))
            .collect()
    }

    pub fn into_router(self) -> Router {
        self.router
            .method_not_allowed_fallback(|| async { GatewayError::MethodNotAllowed })
            .fallback(|| async { GatewayError::NotFound })
    }
}

impl fmt::Debug for GatewayMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayMux").field("routes", &self.routes).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GatewayLinkage
// ─────────────────────────────────────────────────────────────────────────────

/// How the gateway dials its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialOptions {
    pub connect_timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything the gateway needs to reach the RPC backend.
///
/// `lifetime` bounds all gateway work: once cancelled, new calls fail with
/// `UNAVAILABLE` while calls already in flight complete.
pub struct GatewayLinkage {
    pub lifetime: CancellationToken,
    pub mux: GatewayMux,
    pub addr: SocketAddr,
    pub dial: DialOptions,
}

impl GatewayLinkage {
    pub fn new(lifetime: CancellationToken, addr: SocketAddr, dial: DialOptions) -> Self {
        Self {
            lifetime,
            mux: GatewayMux::new(),
            addr,
            dial,
        }
    }

    /// A lazily connected plaintext channel to the backend.
    fn channel(&self) -> Result<Channel, GatewayError> {
        let uri = format!("http://{}", self.addr);
        let endpoint = Endpoint::from_shared(uri.clone()).map_err(|e| GatewayError::InvalidBackend {
            addr: uri,
            reason: e.to_string(),
        })?;
        Ok(endpoint.connect_timeout(self.dial.connect_timeout).connect_lazy())
    }

    /// Bind a REST route forwarding to the unary RPC at `rpc_path`.
    fn unary<Req, Resp>(
        &mut self,
        channel: &Channel,
        method: Method,
        path: &str,
        rpc_path: &'static str,
        body: RequestBody,
    ) -> Result<(), GatewayError>
    where
        Req: RpcMessage,
        Resp: RpcMessage,
    {
        let route = Arc::new(UpstreamRoute {
            channel: channel.clone(),
            lifetime: self.lifetime.clone(),
            rpc_path: PathAndQuery::from_static(rpc_path),
            body,
        });
        let filter = axum::routing::MethodFilter::try_from(method.clone()).map_err(|e| {
            GatewayError::BadRequest(format!("unsupported method {method}: {e}"))
        })?;
        let handler = on(
            filter,
            move |Query(params): Query<Vec<(String, String)>>, headers: HeaderMap, body: Bytes| {
                let route = route.clone();
                async move { route.call::<Req, Resp>(params, headers, body).await }
            },
        );
        self.mux.handle(method, path, handler)
    }

    pub fn into_router(self) -> Router {
        self.mux.into_router()
    }
}

impl fmt::Debug for GatewayLinkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayLinkage")
            .field("addr", &self.addr)
            .field("dial", &self.dial)
            .field("cancelled", &self.lifetime.is_cancelled())
            .field("mux", &self.mux)
            .finish()
    }
}

struct UpstreamRoute {
    channel: Channel,
    lifetime: CancellationToken,
    rpc_path: PathAndQuery,
    body: RequestBody,
}

impl UpstreamRoute {
    async fn call<Req, Resp>(
        &self,
        params: Vec<(String, String)>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Json<Resp>, GatewayError>
    where
        Req: RpcMessage,
        Resp: RpcMessage,
    {
        if self.lifetime.is_cancelled() {
            return Err(GatewayError::ShuttingDown);
        }
        let message: Req = query::decode_request(self.body, &params, &body)?;
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = outgoing_metadata(&headers);

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|e| {
            debug!(rpc = %self.rpc_path, error = %e, "gateway backend not ready");
            tonic::Status::unavailable(e.to_string())
        })?;
        let response = grpc
            .unary(request, self.rpc_path.clone(), ProstCodec::<Req, Resp>::default())
            .await?;
        Ok(Json(response.into_inner()))
    }
}

/// `Authorization` and `Grpc-Metadata-*` request headers as RPC metadata.
pub fn outgoing_metadata(headers: &HeaderMap) -> MetadataMap {
    let mut forwarded = HeaderMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        if name == "authorization" {
            forwarded.append(http::header::AUTHORIZATION, value.clone());
        } else if let Some(key) = name.strip_prefix(METADATA_HEADER_PREFIX) {
            if let Ok(key) = HeaderName::from_bytes(key.as_bytes()) {
                forwarded.append(key, value.clone());
            }
        }
    }
    MetadataMap::from_headers(forwarded)
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration
// ─────────────────────────────────────────────────────────────────────────────

pub fn register_plugins_service_handler(linkage: &mut GatewayLinkage) -> Result<(), GatewayError> {
    let channel = linkage.channel()?;
    linkage.unary::<GetConfiguredPluginsRequest, GetConfiguredPluginsResponse>(
        &channel,
        Method::GET,
        CONFIGURED_PLUGINS_PATH,
        GET_CONFIGURED_PLUGINS,
        RequestBody::None,
    )
}

pub fn register_packages_service_handler(linkage: &mut GatewayLinkage) -> Result<(), GatewayError> {
    let channel = linkage.channel()?;
    linkage.unary::<GetAvailablePackageSummariesRequest, GetAvailablePackageSummariesResponse>(
        &channel,
        Method::GET,
        AVAILABLE_PACKAGES_PATH,
        GET_AVAILABLE_PACKAGE_SUMMARIES,
        RequestBody::None,
    )?;
    linkage.unary::<GetInstalledPackageSummariesRequest, GetInstalledPackageSummariesResponse>(
        &channel,
        Method::GET,
        INSTALLED_PACKAGES_PATH,
        GET_INSTALLED_PACKAGE_SUMMARIES,
        RequestBody::None,
    )
}

pub fn register_repositories_service_handler(linkage: &mut GatewayLinkage) -> Result<(), GatewayError> {
    let channel = linkage.channel()?;
    linkage.unary::<GetPackageRepositorySummariesRequest, GetPackageRepositorySummariesResponse>(
        &channel,
        Method::GET,
        REPOSITORY_SUMMARIES_PATH,
        GET_PACKAGE_REPOSITORY_SUMMARIES,
        RequestBody::None,
    )?;
    linkage.unary::<AddPackageRepositoryRequest, AddPackageRepositoryResponse>(
        &channel,
        Method::POST,
        REPOSITORIES_PATH,
        ADD_PACKAGE_REPOSITORY,
        RequestBody::Whole,
    )
}

/// Serve the API description and the documentation page from `docs_dir`.
pub fn register_docs_handlers(mux: &mut GatewayMux, docs_dir: &Path) -> Result<(), GatewayError> {
    mux.handle(
        Method::GET,
        OPENAPI_PATH,
        get_service(ServeFile::new(docs_dir.join("kubeapps-apis.swagger.json"))),
    )?;
    mux.handle(
        Method::GET,
        DOCS_PATH,
        get_service(ServeFile::new(docs_dir.join("index.html"))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn linkage() -> GatewayLinkage {
        GatewayLinkage::new(
            CancellationToken::new(),
            "127.0.0.1:1".parse().unwrap(),
            DialOptions::default(),
        )
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Bytes) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
    }

    #[tokio::test]
    async fn every_binding_is_registered_once() {
        let mut linkage = linkage();
        register_plugins_service_handler(&mut linkage).unwrap();
        register_packages_service_handler(&mut linkage).unwrap();
        register_repositories_service_handler(&mut linkage).unwrap();
        assert_eq!(linkage.mux.routes().len(), 5);
        assert!(matches!(
            register_packages_service_handler(&mut linkage),
            Err(GatewayError::DuplicateRoute { .. })
        ));
    }

    #[tokio::test]
    async fn unmatched_paths_are_not_found() {
        let (status, body) = get(linkage().into_router(), "/nothing/here").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], 5);
        assert_eq!(body["message"], "Not Found");
    }

    #[tokio::test]
    async fn cancelled_lifetime_rejects_new_calls() {
        let mut linkage = linkage();
        register_plugins_service_handler(&mut linkage).unwrap();
        linkage.lifetime.cancel();
        let (status, body) = get(linkage.into_router(), CONFIGURED_PLUGINS_PATH).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], 14);
    }

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let mut linkage = linkage();
        register_repositories_service_handler(&mut linkage).unwrap();
        let response = linkage
            .into_router()
            .oneshot(Request::delete(REPOSITORIES_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn docs_are_served_from_the_docs_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kubeapps-apis.swagger.json"), r#"{"swagger":"2.0"}"#).unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();

        let mut mux = GatewayMux::new();
        register_docs_handlers(&mut mux, dir.path()).unwrap();
        let router = mux.into_router();

        let (status, body) = get(router.clone(), OPENAPI_PATH).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from(r#"{"swagger":"2.0"}"#));
        let (status, _) = get(router, DOCS_PATH).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn authorization_and_prefixed_headers_become_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer t".parse().unwrap());
        headers.insert("grpc-metadata-cluster", "default".parse().unwrap());
        headers.insert("cookie", "session=1".parse().unwrap());
        let metadata = outgoing_metadata(&headers);
        assert_eq!(metadata.get("authorization").unwrap(), "Bearer t");
        assert_eq!(metadata.get("cluster").unwrap(), "default");
        assert!(metadata.get("cookie").is_none());
    }
}
