//! Connection classification.
//!
//! HTTP/2 connections are classified from the `content-type` of the first
//! request's header block. Binary-RPC and browser-RPC are only recognised
//! over HTTP/2: every HTTP/1 connection is [`Class::Http`], and the HTTP
//! handler still routes gRPC-Web it finds there to the browser-RPC wrapper.
//! Every byte read is replayed to whoever serves the connection.

use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use super::Class;
use super::stream::{FLAG_ACK, FRAME_HEADER_LEN, FRAME_SETTINGS, SniffedStream};

pub(crate) const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Most bytes read while classifying one connection.
pub(crate) const MAX_SNIFF_BYTES: usize = 64 * 1024;

const FRAME_HEADERS: u8 = 0x1;
const FRAME_CONTINUATION: u8 = 0x9;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

/// An empty server SETTINGS frame.
const EMPTY_SETTINGS: [u8; FRAME_HEADER_LEN] = [0, 0, 0, FRAME_SETTINGS, 0, 0, 0, 0, 0];

/// Why classification stopped short of a `content-type`.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SniffError {
    #[error("timed out")]
    Timeout,
    #[error("connection closed")]
    Eof,
    #[error("more than {MAX_SNIFF_BYTES} bytes without a complete header block")]
    TooLarge,
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("hpack: {0}")]
    Hpack(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Classify a binary-RPC / browser-RPC / other connection by its declared
/// content type (exact match).
pub fn classify_content_type(content_type: Option<&[u8]>) -> Class {
    match content_type {
        Some(b"application/grpc") => Class::Binary,
        Some(b"application/grpc-web") => Class::Browser,
        _ => Class::Http,
    }
}

/// Classify `stream`, giving up after `timeout`. Anything that cannot be
/// classified is [`Class::Http`].
pub(crate) async fn sniff(mut stream: TcpStream, timeout: Duration) -> (Class, SniffedStream) {
    let deadline = Instant::now() + timeout;
    let mut buf = BytesMut::with_capacity(4096);

    // Read until the bytes either are or cannot be the HTTP/2 preface.
    while buf.len() < PREFACE.len() && PREFACE.starts_with(&buf) {
        if let Err(err) = read_more(&mut stream, &mut buf, deadline).await {
            debug!(error = %err, "connection unclassified");
            return (Class::Http, SniffedStream::new(buf, stream));
        }
    }

    if buf.starts_with(PREFACE) {
        sniff_h2(stream, buf, deadline).await
    } else {
        (Class::Http, SniffedStream::new(buf, stream))
    }
}

async fn read_more(stream: &mut TcpStream, buf: &mut BytesMut, deadline: Instant) -> Result<(), SniffError> {
    if buf.len() >= MAX_SNIFF_BYTES {
        return Err(SniffError::TooLarge);
    }
    match tokio::time::timeout_at(deadline, stream.read_buf(buf)).await {
        Err(_) => Err(SniffError::Timeout),
        Ok(Ok(0)) => Err(SniffError::Eof),
        Ok(Ok(_)) => Ok(()),
        Ok(Err(err)) => Err(err.into()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP/2
// ─────────────────────────────────────────────────────────────────────────────

/// Scan state over the frames following the preface.
#[derive(Default)]
struct H2Scan {
    /// Bytes to replay: every frame seen so far except a dropped ACK.
    kept: BytesMut,
    /// Offset into the read buffer up to which frames have been scanned.
    pos: usize,
    settings_sent: bool,
    ack_dropped: bool,
    /// Header block fragments of the first request.
    block: Vec<u8>,
    in_block: bool,
}

async fn sniff_h2(mut stream: TcpStream, mut buf: BytesMut, deadline: Instant) -> (Class, SniffedStream) {
    let mut scan = H2Scan {
        pos: PREFACE.len(),
        ..Default::default()
    };
    scan.kept.extend_from_slice(PREFACE);

    let class = match scan_h2(&mut stream, &mut buf, &mut scan, deadline).await {
        Ok(content_type) => classify_content_type(content_type.as_deref()),
        Err(err) => {
            debug!(error = %err, "http/2 connection unclassified");
            Class::Http
        }
    };

    let rest = &buf[scan.pos..];
    let replay = if scan.settings_sent && !scan.ack_dropped {
        SniffedStream::with_ack_filter(scan.kept, rest, stream)
    } else {
        let mut kept = scan.kept;
        kept.extend_from_slice(rest);
        SniffedStream::new(kept, stream)
    };
    (class, replay)
}

/// Walk frames until the first header block is complete and return its
/// `content-type`.
async fn scan_h2(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    scan: &mut H2Scan,
    deadline: Instant,
) -> Result<Option<Vec<u8>>, SniffError> {
    loop {
        while buf.len() < scan.pos + FRAME_HEADER_LEN {
            read_more(stream, buf, deadline).await?;
        }
        let header: [u8; FRAME_HEADER_LEN] = buf[scan.pos..scan.pos + FRAME_HEADER_LEN]
            .try_into()
            .map_err(|_| SniffError::Malformed("short frame header"))?;
        let length = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        let (kind, flags) = (header[3], header[4]);
        let end = scan.pos + FRAME_HEADER_LEN + length;
        while buf.len() < end {
            read_more(stream, buf, deadline).await?;
        }
        let payload = &buf[scan.pos + FRAME_HEADER_LEN..end];

        let mut keep = true;
        match kind {
            FRAME_SETTINGS if flags & FLAG_ACK == 0 => {
                if !scan.settings_sent {
                    // Clients that wait for the server's SETTINGS before
                    // sending their first request would stall otherwise.
                    stream.write_all(&EMPTY_SETTINGS).await?;
                    scan.settings_sent = true;
                }
            }
            FRAME_SETTINGS => {
                if scan.settings_sent && !scan.ack_dropped {
                    scan.ack_dropped = true;
                    keep = false;
                }
            }
            FRAME_HEADERS if !scan.in_block => {
                scan.block.extend_from_slice(headers_fragment(flags, payload)?);
                scan.in_block = true;
            }
            FRAME_CONTINUATION if scan.in_block => {
                scan.block.extend_from_slice(payload);
            }
            FRAME_HEADERS | FRAME_CONTINUATION => {
                return Err(SniffError::Malformed("unexpected header block frame"));
            }
            _ => {}
        }

        if keep {
            scan.kept.extend_from_slice(&buf[scan.pos..end]);
        }
        scan.pos = end;

        if scan.in_block && flags & FLAG_END_HEADERS != 0 {
            return decode_content_type(&scan.block);
        }
    }
}

/// Strip padding and priority fields from a HEADERS payload.
fn headers_fragment(flags: u8, payload: &[u8]) -> Result<&[u8], SniffError> {
    let mut start = 0;
    let mut end = payload.len();
    if flags & FLAG_PADDED != 0 {
        let pad = *payload.first().ok_or(SniffError::Malformed("missing pad length"))? as usize;
        start += 1;
        end = end
            .checked_sub(pad)
            .ok_or(SniffError::Malformed("padding exceeds payload"))?;
    }
    if flags & FLAG_PRIORITY != 0 {
        start += 5;
    }
    if start > end {
        return Err(SniffError::Malformed("short HEADERS payload"));
    }
    Ok(&payload[start..end])
}

fn decode_content_type(block: &[u8]) -> Result<Option<Vec<u8>>, SniffError> {
    let mut decoder = hpack::Decoder::new();
    let fields = decoder
        .decode(block)
        .map_err(|err| SniffError::Hpack(format!("{err:?}")))?;
    Ok(fields
        .into_iter()
        .find(|(name, _)| name.as_slice() == b"content-type")
        .map(|(_, value)| value))
}
