//! Operator logo passthrough.
//!
//! Package manifests of the operator lifecycle manager expose their icon
//! through the cluster API without a usable content type. The gateway
//! fetches it, sniffs the type from the bytes and re-serves it; text is
//! assumed to be an SVG document.

use axum::extract::Path;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use super::{GatewayError, GatewayMux};
use crate::cluster::{ClusterClientProvider, namespaced_subresource_path};

const PACKAGE_MANIFESTS_API: &str = "/apis/packages.operators.coreos.com/v1";

pub const OPERATOR_LOGO_PATH: &str = "/operators/namespaces/{namespace}/operator/{name}/logo";

pub fn register_operator_logo_handler(
    mux: &mut GatewayMux,
    provider: Arc<ClusterClientProvider>,
) -> Result<(), GatewayError> {
    mux.handle(
        Method::GET,
        OPERATOR_LOGO_PATH,
        get(move |Path((namespace, name)): Path<(String, String)>| {
            let provider = provider.clone();
            async move { operator_logo(&provider, &namespace, &name).await }
        }),
    )
}

async fn operator_logo(provider: &ClusterClientProvider, namespace: &str, name: &str) -> Response {
    let path = match namespaced_subresource_path(
        PACKAGE_MANIFESTS_API,
        namespace,
        "packagemanifests",
        name,
        "icon",
    ) {
        Ok(path) => path,
        Err(err) => return GatewayError::BadRequest(err.to_string()).into_response(),
    };
    let fetched = match provider.client().await {
        Ok(client) => client.get_raw(&path).await,
        Err(err) => Err(err),
    };
    match fetched {
        Ok(icon) => {
            let content_type = icon_content_type(&icon);
            debug!(namespace, name, content_type, "serving operator logo");
            (
                [(CONTENT_TYPE, HeaderValue::from_static(content_type))],
                icon,
            )
                .into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unable to retrieve operator logo: {err}"),
        )
            .into_response(),
    }
}

/// Content type of an icon, with any `text/*` type served as SVG.
pub fn icon_content_type(icon: &Bytes) -> &'static str {
    let detected = sniff_content_type(icon);
    if detected.starts_with("text/") {
        "image/svg+xml"
    } else {
        detected
    }
}

fn sniff_content_type(data: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type();
    }
    let looks_textual = std::str::from_utf8(data)
        .map(|text| !text.chars().any(|c| c.is_control() && !c.is_whitespace()))
        .unwrap_or(false);
    if looks_textual && !data.is_empty() {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}
