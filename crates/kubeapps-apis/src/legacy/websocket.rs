//! Browser-RPC over WebSocket (`grpc-websockets`).
//!
//! Client to server:
//! 1. one message with the request headers as `name: value\r\n` lines;
//! 2. binary messages `0x00 ++ grpc-web bytes` carrying the request body;
//! 3. a binary message `0x01` when the client has finished sending.
//!
//! Server to client: one binary message with the response headers in the
//! same line format, then the gRPC-Web response body (data frames followed
//! by the trailer frame) as binary messages, then a close.

use axum::Router;
use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use std::sync::Arc;
use tonic_web::GrpcWebService;
use tower::ServiceExt;
use tracing::debug;

use crate::config::OriginPolicy;
use crate::rpc::RpcServer;

pub const PROTOCOL: &str = "grpc-websockets";

const FRAME_DATA: u8 = 0x00;
const FRAME_FINISH_SEND: u8 = 0x01;

/// Router answering `grpc-websockets` upgrade requests on any path.
/// Request bodies larger than `max_request_bytes` abort the socket.
pub fn websocket_router(
    grpc_web: GrpcWebService<RpcServer>,
    origins: OriginPolicy,
    max_request_bytes: usize,
) -> Router {
    let origins = Arc::new(origins);
    Router::new().fallback(move |upgrade: WebSocketUpgrade, headers: HeaderMap, uri: Uri| {
        let grpc_web = grpc_web.clone();
        let origins = origins.clone();
        async move { accept(upgrade, &headers, uri, grpc_web, &origins, max_request_bytes) }
    })
}

fn accept(
    upgrade: WebSocketUpgrade,
    headers: &HeaderMap,
    uri: Uri,
    grpc_web: GrpcWebService<RpcServer>,
    origins: &OriginPolicy,
    max_request_bytes: usize,
) -> Response {
    let allowed = match headers.get("origin").map(HeaderValue::to_str) {
        None => origins.allows_missing(),
        Some(Ok(origin)) => origins.allows(origin),
        Some(Err(_)) => false,
    };
    if !allowed {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    upgrade
        .protocols([PROTOCOL])
        .on_upgrade(move |socket| serve_socket(socket, uri, grpc_web, max_request_bytes))
}

async fn serve_socket(
    mut socket: WebSocket,
    uri: Uri,
    grpc_web: GrpcWebService<RpcServer>,
    max_request_bytes: usize,
) {
    let request = match read_request(&mut socket, uri, max_request_bytes).await {
        Ok(request) => request,
        Err(FrameError::TooLarge) => {
            debug!(limit = max_request_bytes, "websocket request too large");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::SIZE,
                    reason: "request too large".into(),
                })))
                .await;
            return;
        }
        Err(reason) => {
            debug!(%reason, "websocket request aborted");
            return;
        }
    };

    let response = match grpc_web.oneshot(request.map(tonic::body::boxed)).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let (parts, mut body) = response.into_parts();
    if socket
        .send(Message::Binary(encode_headers(&parts.headers)))
        .await
        .is_err()
    {
        return;
    }
    while let Some(frame) = body.frame().await {
        let Ok(frame) = frame else { break };
        if let Ok(data) = frame.into_data() {
            if socket.send(Message::Binary(data)).await.is_err() {
                return;
            }
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Why a client's request could not be read off the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("no header message")]
    NoHeaders,
    #[error("unknown frame type")]
    UnknownFrame,
    #[error("unexpected text frame")]
    UnexpectedText,
    #[error("request body exceeds the configured limit")]
    TooLarge,
    #[error("websocket error")]
    Socket,
}

/// Request body assembled from the client's binary messages.
#[derive(Debug)]
pub struct RequestBody {
    buf: BytesMut,
    limit: usize,
}

impl RequestBody {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            limit,
        }
    }

    /// Take one binary message. Returns `true` once the client has finished
    /// sending.
    pub fn push(&mut self, message: &[u8]) -> Result<bool, FrameError> {
        match message.split_first() {
            Some((&FRAME_DATA, data)) => {
                if self.buf.len() + data.len() > self.limit {
                    return Err(FrameError::TooLarge);
                }
                self.buf.extend_from_slice(data);
                Ok(false)
            }
            Some((&FRAME_FINISH_SEND, _)) => Ok(true),
            _ => Err(FrameError::UnknownFrame),
        }
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

async fn read_request(
    socket: &mut WebSocket,
    uri: Uri,
    max_request_bytes: usize,
) -> Result<http::Request<Body>, FrameError> {
    let headers = match socket.recv().await {
        Some(Ok(Message::Text(text))) => parse_headers(text.as_bytes()),
        Some(Ok(Message::Binary(data))) => parse_headers(&data),
        _ => return Err(FrameError::NoHeaders),
    };

    let mut body = RequestBody::new(max_request_bytes);
    loop {
        match socket.recv().await {
            Some(Ok(Message::Binary(data))) => {
                if body.push(&data)? {
                    break;
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Text(_))) => return Err(FrameError::UnexpectedText),
            Some(Err(_)) => return Err(FrameError::Socket),
        }
    }

    let mut request = http::Request::new(Body::from(body.freeze()));
    *request.method_mut() = Method::POST;
    *request.uri_mut() = uri;
    *request.headers_mut() = headers;
    if !request.headers().contains_key("content-type") {
        request.headers_mut().insert(
            "content-type",
            HeaderValue::from_static("application/grpc-web+proto"),
        );
    }
    Ok(request)
}

/// Parse `name: value\r\n` lines; malformed lines are skipped.
pub fn parse_headers(raw: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in String::from_utf8_lossy(raw).split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            headers.append(name, value);
        }
    }
    headers
}

pub fn encode_headers(headers: &HeaderMap) -> Bytes {
    let mut out = BytesMut::new();
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.freeze()
}
