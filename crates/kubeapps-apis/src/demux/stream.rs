//! Connections handed out by the sub-listeners.
//!
//! A [`SniffedStream`] first replays the bytes read while classifying the
//! connection, then reads from the socket. For HTTP/2 connections the
//! classifier sends the client a SETTINGS frame of its own; the client's
//! acknowledgement of that frame is not something the downstream server
//! expects, so if it has not been seen during classification an
//! [`AckFilter`] removes it from the live byte stream.

use bytes::{Buf, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

pub(crate) const FRAME_HEADER_LEN: usize = 9;
pub(crate) const FRAME_SETTINGS: u8 = 0x4;
pub(crate) const FLAG_ACK: u8 = 0x1;

/// Whether `header` is an HTTP/2 SETTINGS frame header with the ACK flag.
pub(crate) fn is_settings_ack(header: &[u8; FRAME_HEADER_LEN]) -> bool {
    let length = u32::from_be_bytes([0, header[0], header[1], header[2]]);
    length == 0 && header[3] == FRAME_SETTINGS && header[4] & FLAG_ACK != 0
}

// ─────────────────────────────────────────────────────────────────────────────
// AckFilter
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    /// Collecting a frame header.
    Header { header: [u8; FRAME_HEADER_LEN], filled: usize },
    /// Passing `remaining` payload bytes of the current frame through.
    Payload { remaining: usize },
    /// The acknowledgement has been dropped; everything passes through.
    Done,
}

/// One-shot HTTP/2 frame filter that drops the first SETTINGS ACK.
///
/// Must be fed from a frame boundary. Bytes of a frame header are held back
/// until the header is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFilter {
    state: FilterState,
}

impl Default for AckFilter {
    fn default() -> Self {
        Self {
            state: FilterState::Header {
                header: [0; FRAME_HEADER_LEN],
                filled: 0,
            },
        }
    }
}

impl AckFilter {
    pub fn is_done(&self) -> bool {
        self.state == FilterState::Done
    }

    /// Run `input` through the filter, appending what survives to `out`.
    pub fn feed(&mut self, mut input: &[u8], out: &mut BytesMut) {
        while !input.is_empty() {
            match &mut self.state {
                FilterState::Done => {
                    out.extend_from_slice(input);
                    return;
                }
                FilterState::Payload { remaining } => {
                    let n = (*remaining).min(input.len());
                    out.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    *remaining -= n;
                    if *remaining == 0 {
                        self.state = FilterState::Header {
                            header: [0; FRAME_HEADER_LEN],
                            filled: 0,
                        };
                    }
                }
                FilterState::Header { header, filled } => {
                    let n = (FRAME_HEADER_LEN - *filled).min(input.len());
                    header[*filled..*filled + n].copy_from_slice(&input[..n]);
                    *filled += n;
                    input = &input[n..];
                    if *filled < FRAME_HEADER_LEN {
                        continue;
                    }
                    let header = *header;
                    if is_settings_ack(&header) {
                        self.state = FilterState::Done;
                        continue;
                    }
                    out.extend_from_slice(&header);
                    let length = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
                    self.state = if length == 0 {
                        FilterState::Header {
                            header: [0; FRAME_HEADER_LEN],
                            filled: 0,
                        }
                    } else {
                        FilterState::Payload { remaining: length }
                    };
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SniffedStream
// ─────────────────────────────────────────────────────────────────────────────

/// A classified connection: replayed prefix first, then the socket.
#[derive(Debug)]
pub struct SniffedStream {
    replay: BytesMut,
    inner: TcpStream,
    filter: Option<AckFilter>,
}

impl SniffedStream {
    /// Replay `prefix` verbatim before reading from `inner`.
    pub fn new(prefix: BytesMut, inner: TcpStream) -> Self {
        Self {
            replay: prefix,
            inner,
            filter: None,
        }
    }

    /// Replay `prefix`, then run `rest` (which starts on a frame boundary)
    /// and the live socket through an [`AckFilter`].
    pub fn with_ack_filter(mut prefix: BytesMut, rest: &[u8], inner: TcpStream) -> Self {
        let mut filter = AckFilter::default();
        filter.feed(rest, &mut prefix);
        Self {
            replay: prefix,
            inner,
            filter: Some(filter).filter(|f| !f.is_done()),
        }
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.inner
    }
}

impl AsyncRead for SniffedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.replay.is_empty() {
                let n = this.replay.len().min(buf.remaining());
                buf.put_slice(&this.replay[..n]);
                this.replay.advance(n);
                return Poll::Ready(Ok(()));
            }

            let Some(filter) = this.filter.as_mut() else {
                return Pin::new(&mut this.inner).poll_read(cx, buf);
            };

            let mut scratch = [0u8; 8 * 1024];
            let mut read = ReadBuf::new(&mut scratch);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read))?;
            if read.filled().is_empty() {
                return Poll::Ready(Ok(()));
            }
            filter.feed(read.filled(), &mut this.replay);
            if filter.is_done() {
                this.filter = None;
            }
            // The chunk may have been the acknowledgement alone; read again
            // rather than report end of stream.
        }
    }
}

impl AsyncWrite for SniffedStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
