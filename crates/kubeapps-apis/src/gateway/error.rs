//! Gateway errors and their JSON rendering.

use axum::Json;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tonic::{Code, Status};

use crate::rpc::http_status_for;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// Registration: the route is already bound.
    #[error("route {method} {path} is already registered")]
    DuplicateRoute { method: Method, path: String },

    /// Registration: the backend address is not a valid URI.
    #[error("invalid backend address {addr}: {reason}")]
    InvalidBackend { addr: String, reason: String },

    /// The request could not be translated into an RPC message.
    #[error("{0}")]
    BadRequest(String),

    /// The backend answered with an error status.
    #[error(transparent)]
    Rpc(#[from] Status),

    #[error("Not Found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// The gateway lifetime has ended; no new calls are started.
    #[error("gateway is shutting down")]
    ShuttingDown,
}

impl GatewayError {
    pub fn code(&self) -> Code {
        match self {
            GatewayError::DuplicateRoute { .. } | GatewayError::InvalidBackend { .. } => Code::Internal,
            GatewayError::BadRequest(_) => Code::InvalidArgument,
            GatewayError::Rpc(status) => status.code(),
            GatewayError::NotFound => Code::NotFound,
            GatewayError::MethodNotAllowed => Code::Unimplemented,
            GatewayError::ShuttingDown => Code::Unavailable,
        }
    }

    pub fn message(&self) -> String {
        match self {
            GatewayError::Rpc(status) => status.message().to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: i32,
    message: String,
    details: Vec<serde_json::Value>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = match self {
            GatewayError::MethodNotAllowed => axum::http::StatusCode::METHOD_NOT_ALLOWED,
            _ => http_status_for(code),
        };
        let body = ErrorBody {
            code: code as i32,
            message: self.message(),
            details: Vec::new(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::StatusCode;

    async fn render(err: GatewayError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn not_found_uses_the_gateway_body() {
        let (status, body) = render(GatewayError::NotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, serde_json::json!({ "code": 5, "message": "Not Found", "details": [] }));
    }

    #[tokio::test]
    async fn rpc_errors_keep_code_and_message() {
        let (status, body) = render(Status::permission_denied("no access to namespace").into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], 7);
        assert_eq!(body["message"], "no access to namespace");
    }

    #[tokio::test]
    async fn shutting_down_is_unavailable() {
        let (status, body) = render(GatewayError::ShuttingDown).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], 14);
    }
}
