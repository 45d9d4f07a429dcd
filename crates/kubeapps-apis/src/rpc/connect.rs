//! Connect protocol, unary calls only.
//!
//! A Connect unary request is a `POST` to the method path whose body is the
//! bare request message, encoded as JSON (`application/json`) or protobuf
//! (`application/proto`). Success is `200` with the bare response message in
//! the same encoding; errors are a JSON body `{"code": "...", "message":
//! "..."}` with an HTTP status derived from the code.

use bytes::Bytes;
use http::header::{ALLOW, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tonic::body::BoxBody;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

use super::{BoxError, RpcMessage, UnaryMethod, http_status_for};

pub const TIMEOUT_HEADER: &str = "connect-timeout-ms";

/// Message encoding of a Connect unary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCodec {
    Json,
    Proto,
}

impl ConnectCodec {
    /// Recognise `application/json` and `application/proto`, ignoring
    /// parameters such as `charset`.
    pub fn from_content_type(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("application/json") {
            Some(ConnectCodec::Json)
        } else if essence.eq_ignore_ascii_case("application/proto") {
            Some(ConnectCodec::Proto)
        } else {
            None
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ConnectCodec::Json => "application/json",
            ConnectCodec::Proto => "application/proto",
        }
    }

    pub fn decode<M: RpcMessage>(self, body: &[u8]) -> Result<M, Status> {
        match self {
            ConnectCodec::Json if body.iter().all(u8::is_ascii_whitespace) => Ok(M::default()),
            ConnectCodec::Json => serde_json::from_slice(body)
                .map_err(|e| Status::invalid_argument(format!("unable to unmarshal request: {e}"))),
            ConnectCodec::Proto => M::decode(body)
                .map_err(|e| Status::invalid_argument(format!("unable to unmarshal request: {e}"))),
        }
    }

    pub fn encode<M: RpcMessage>(self, message: &M) -> Result<Bytes, Status> {
        match self {
            ConnectCodec::Json => serde_json::to_vec(message)
                .map(Bytes::from)
                .map_err(|e| Status::internal(format!("unable to marshal response: {e}"))),
            ConnectCodec::Proto => Ok(message.encode_to_vec().into()),
        }
    }
}

/// Connect's name for a status code.
pub fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::Cancelled => "canceled",
        Code::Unknown => "unknown",
        Code::InvalidArgument => "invalid_argument",
        Code::DeadlineExceeded => "deadline_exceeded",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::PermissionDenied => "permission_denied",
        Code::ResourceExhausted => "resource_exhausted",
        Code::FailedPrecondition => "failed_precondition",
        Code::Aborted => "aborted",
        Code::OutOfRange => "out_of_range",
        Code::Unimplemented => "unimplemented",
        Code::Internal => "internal",
        Code::Unavailable => "unavailable",
        Code::DataLoss => "data_loss",
        Code::Unauthenticated => "unauthenticated",
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    message: &'a str,
}

/// Connect error response for `status`.
pub fn error_response(status: &Status) -> http::Response<BoxBody> {
    let body = serde_json::to_vec(&ErrorBody {
        code: code_name(status.code()),
        message: status.message(),
    })
    .unwrap_or_default();
    let mut response = http::Response::new(tonic::body::boxed(Full::new(Bytes::from(body))));
    *response.status_mut() = http_status_for(status.code());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Parse `connect-timeout-ms`: at most ten ASCII digits.
pub fn parse_timeout(headers: &HeaderMap) -> Result<Option<Duration>, Status> {
    let Some(value) = headers.get(TIMEOUT_HEADER) else {
        return Ok(None);
    };
    let invalid = || Status::invalid_argument(format!("invalid {TIMEOUT_HEADER} header"));
    let text = value.to_str().map_err(|_| invalid())?;
    if text.is_empty() || text.len() > 10 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let millis: u64 = text.parse().map_err(|_| invalid())?;
    Ok(Some(Duration::from_millis(millis)))
}

/// Serve one Connect unary call against `method`.
pub(crate) async fn serve_unary<B>(
    method: Arc<dyn UnaryMethod>,
    codec: ConnectCodec,
    request: http::Request<B>,
) -> http::Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    if request.method() != Method::POST {
        let mut response = error_response(&Status::unimplemented("only POST is supported"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
        return response;
    }
    let timeout = match parse_timeout(request.headers()) {
        Ok(timeout) => timeout,
        Err(status) => return error_response(&status),
    };

    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            let err: BoxError = err.into();
            return error_response(&Status::invalid_argument(format!(
                "failed to read request body: {err}"
            )));
        }
    };

    let call = method.serve_connect(codec, MetadataMap::from_headers(parts.headers), body);
    let result = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, call)
            .await
            .unwrap_or_else(|_| Err(Status::deadline_exceeded("the operation timed out"))),
        None => call.await,
    };

    match result {
        Ok(payload) => {
            let mut response = http::Response::new(tonic::body::boxed(Full::new(payload)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(codec.content_type()));
            response
        }
        Err(status) => error_response(&status),
    }
}
