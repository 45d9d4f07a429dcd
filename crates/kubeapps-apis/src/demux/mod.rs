//! Legacy protocol demultiplexer.
//!
//! One physical listener is split into three logical sub-listeners by the
//! declared content type of the first request of each HTTP/2 connection:
//!
//! | Sub-listener | Matched by |
//! |--------------|------------|
//! | [`ListenerSet::binary`]  | HTTP/2, `content-type: application/grpc` |
//! | [`ListenerSet::browser`] | HTTP/2, `content-type: application/grpc-web` |
//! | [`ListenerSet::http`]    | anything else: HTTP/1 and unclassifiable connections |
//!
//! Classification never consumes protocol bytes: the sub-listeners hand out
//! [`SniffedStream`]s that replay what was read. Each connection is
//! classified in its own task so a slow client never stalls the accept loop.
//!
//! When the physical listener is closed (see [`CloseHandle`]) or fails
//! irrecoverably, all three sub-listeners report the same error.

mod sniff;
mod stream;

pub use sniff::classify_content_type;
pub use stream::{AckFilter, SniffedStream};

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::transport::is_transient_accept_error;

/// Pending classified connections per sub-listener.
const BACKLOG: usize = 128;

/// Content-type class of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    /// Binary RPC (`application/grpc`).
    Binary,
    /// Browser RPC (`application/grpc-web`).
    Browser,
    /// Everything else.
    Http,
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Class::Binary => "binary",
            Class::Browser => "browser",
            Class::Http => "http",
        })
    }
}

type Accepted = (SniffedStream, SocketAddr);

/// Closure state shared by the dispatch loop and its sub-listeners.
#[derive(Default)]
struct Closure {
    closed: CancellationToken,
    reason: OnceLock<(io::ErrorKind, String)>,
}

impl Closure {
    fn close(&self, kind: io::ErrorKind, message: String) -> io::Error {
        let (kind, message) = self.reason.get_or_init(|| (kind, message));
        self.closed.cancel();
        io::Error::new(*kind, message.clone())
    }

    fn error(&self) -> io::Error {
        match self.reason.get() {
            Some((kind, message)) => io::Error::new(*kind, message.clone()),
            None => io::Error::new(io::ErrorKind::NotConnected, "demux: listener closed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MuxListener
// ─────────────────────────────────────────────────────────────────────────────

/// One logical sub-listener.
pub struct MuxListener {
    class: Class,
    local_addr: SocketAddr,
    rx: mpsc::Receiver<Accepted>,
    closure: Arc<Closure>,
}

impl MuxListener {
    /// Next connection of this class, or the demultiplexer's closing error.
    pub async fn accept(&mut self) -> io::Result<Accepted> {
        tokio::select! {
            biased;
            _ = self.closure.closed.cancelled() => Err(self.closure.error()),
            accepted = self.rx.recv() => accepted.ok_or_else(|| self.closure.error()),
        }
    }

    pub fn class(&self) -> Class {
        self.class
    }

    /// Address of the underlying physical listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl fmt::Debug for MuxListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxListener")
            .field("class", &self.class)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// The three sub-listeners of a [`Demux`].
#[derive(Debug)]
pub struct ListenerSet {
    pub binary: MuxListener,
    pub browser: MuxListener,
    pub http: MuxListener,
}

/// Closes the physical listener of a [`Demux`].
#[derive(Debug, Clone)]
pub struct CloseHandle(CancellationToken);

impl CloseHandle {
    pub fn close(&self) {
        self.0.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Demux
// ─────────────────────────────────────────────────────────────────────────────

/// Dispatch loop owning the physical listener.
pub struct Demux {
    listener: TcpListener,
    local_addr: SocketAddr,
    sniff_timeout: Duration,
    close: CancellationToken,
    closure: Arc<Closure>,
    binary: mpsc::Sender<Accepted>,
    browser: mpsc::Sender<Accepted>,
    http: mpsc::Sender<Accepted>,
}

impl Demux {
    /// Split `listener` into its three sub-listeners.
    pub fn new(listener: TcpListener, sniff_timeout: Duration) -> io::Result<(Demux, ListenerSet)> {
        let local_addr = listener.local_addr()?;
        let closure = Arc::new(Closure::default());
        let sub_listener = |class| {
            let (tx, rx) = mpsc::channel(BACKLOG);
            let listener = MuxListener {
                class,
                local_addr,
                rx,
                closure: closure.clone(),
            };
            (tx, listener)
        };
        let (binary, binary_listener) = sub_listener(Class::Binary);
        let (browser, browser_listener) = sub_listener(Class::Browser);
        let (http, http_listener) = sub_listener(Class::Http);

        let demux = Demux {
            listener,
            local_addr,
            sniff_timeout,
            close: CancellationToken::new(),
            closure: closure.clone(),
            binary,
            browser,
            http,
        };
        let listeners = ListenerSet {
            binary: binary_listener,
            browser: browser_listener,
            http: http_listener,
        };
        Ok((demux, listeners))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle(self.close.clone())
    }

    /// Accept and dispatch connections until the listener is closed or fails.
    /// Returns the error the sub-listeners report from then on.
    pub async fn serve(self) -> io::Error {
        info!(addr = %self.local_addr, "legacy demultiplexer listening");
        loop {
            let accepted = tokio::select! {
                _ = self.close.cancelled() => {
                    return self.closure.close(io::ErrorKind::NotConnected, "demux: listener closed".into());
                }
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, remote)) => self.dispatch(stream, remote),
                Err(err) if is_transient_accept_error(&err) => {
                    debug!(error = %err, "transient accept error");
                }
                Err(err) => return self.closure.close(err.kind(), err.to_string()),
            }
        }
    }

    fn dispatch(&self, stream: tokio::net::TcpStream, remote: SocketAddr) {
        let timeout = self.sniff_timeout;
        let senders = [self.binary.clone(), self.browser.clone(), self.http.clone()];
        tokio::spawn(async move {
            let (class, stream) = sniff::sniff(stream, timeout).await;
            let [binary, browser, http] = senders;
            let tx = match class {
                Class::Binary => binary,
                Class::Browser => browser,
                Class::Http => http,
            };
            debug!(remote = %remote, class = %class, "connection classified");
            if tx.send((stream, remote)).await.is_err() {
                debug!(remote = %remote, class = %class, "no consumer for connection");
            }
        });
    }
}

impl fmt::Debug for Demux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demux")
            .field("local_addr", &self.local_addr)
            .field("sniff_timeout", &self.sniff_timeout)
            .finish()
    }
}
