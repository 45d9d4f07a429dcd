//! Connection serving shared by every listener.
//!
//! [`serve_connections`] drives one accept loop: each accepted connection is
//! served on its own task by the `hyper-util` auto builder, which speaks
//! HTTP/1.1 and HTTP/2 prior knowledge on the same socket and supports
//! HTTP/1 upgrades. The loop only returns when accepting fails for good.

use async_trait::async_trait;
use bytes::Bytes;
use http_body::Body;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tower::{Service, ServiceExt};
use tracing::debug;

use crate::demux::{MuxListener, SniffedStream};
use crate::rpc::BoxError;

/// Peer address of the connection a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Accept errors that only affect the connection being accepted.
pub(crate) fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

/// A source of connections.
#[async_trait]
pub trait Acceptor: Send + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&mut self) -> io::Result<(Self::Io, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Io = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        loop {
            match TcpListener::accept(self).await {
                Ok((stream, remote)) => {
                    let _ = stream.set_nodelay(true);
                    return Ok((stream, remote));
                }
                Err(err) if is_transient_accept_error(&err) => {
                    debug!(error = %err, "transient accept error");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Acceptor for MuxListener {
    type Io = SniffedStream;

    async fn accept(&mut self) -> io::Result<(SniffedStream, SocketAddr)> {
        MuxListener::accept(self).await
    }
}

/// Serve every connection `acceptor` yields with `service` until accepting
/// fails; returns that error.
pub async fn serve_connections<A, S, B>(
    name: &'static str,
    mut acceptor: A,
    service: S,
    header_read_timeout: Duration,
) -> io::Error
where
    A: Acceptor,
    S: Service<http::Request<Incoming>, Response = http::Response<B>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let mut builder = Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(header_read_timeout);

    loop {
        let (io, remote) = match acceptor.accept().await {
            Ok(accepted) => accepted,
            Err(err) => return err,
        };
        let service = service.clone();
        let builder = builder.clone();
        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |mut request: http::Request<Incoming>| {
                request.extensions_mut().insert(RemoteAddr(remote));
                service.clone().oneshot(request)
            });
            if let Err(err) = builder
                .serve_connection_with_upgrades(TokioIo::new(io), service)
                .await
            {
                debug!(listener = name, remote = %remote, error = %err, "connection error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_recognised() {
        assert!(is_transient_accept_error(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient_accept_error(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient_accept_error(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn requests_carry_the_remote_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = axum::Router::new().route(
            "/whoami",
            axum::routing::get(|axum::Extension(RemoteAddr(remote)): axum::Extension<RemoteAddr>| async move {
                remote.ip().to_string()
            }),
        );
        tokio::spawn(serve_connections("test", listener, router, Duration::from_secs(5)));

        let body = reqwest::get(format!("http://{addr}/whoami"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "127.0.0.1");
    }
}
