//! Preread: hold the first client bytes back until the tenant is known.
//!
//! The client stream is read into a cumulative buffer and the whole buffer is
//! handed to the [`ConnectionInspector`] after every read, until it stops
//! asking for more. Three conditions end the wait early and fall back to the
//! default routing key:
//! 1. the preread timeout expires
//! 2. the buffer reaches its size cap
//! 3. the client closes its side
//!
//! The buffered bytes are not consumed from the client's point of view:
//! [`Rewind`] replays them ahead of the live stream when proxying starts.

use crate::engine::inspector::{ConnectionInspector, Direction, Verdict};
use crate::parser::mqtt::PacketDecoder;
use bytes::{Buf, Bytes, BytesMut};
use pin_project_lite::pin_project;
use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::time::{timeout, Instant};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrereadOutcome {
    /// The inspector classified the first packet.
    Classified,
    TimedOut,
    LimitExceeded,
    /// The client closed before the first packet was classified.
    ClosedEarly,
}

/// Reads from an AsyncRead with a timeout.
///
/// Returns `Err(io::Error)` with kind `TimedOut` if the read doesn't complete
/// within the specified duration.
pub async fn read_with_timeout<R>(
    reader: &mut R,
    buf: &mut [u8],
    timeout_duration: Duration,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match timeout(timeout_duration, reader.read(buf)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "read operation timed out",
        )),
    }
}

/// Drives `inspector` with everything the client sends until it proceeds.
///
/// # Arguments
/// * `reader` - Client side of the connection
/// * `inspector` - The connection's inspector
/// * `buf` - Receives every byte read; forward it upstream afterwards
/// * `total_timeout` - Maximum time to wait for a classifiable first packet
/// * `max_bytes` - Maximum number of bytes buffered while waiting
///
/// I/O errors other than the timeout are returned as-is.
pub async fn preread<R, D>(
    reader: &mut R,
    inspector: &mut ConnectionInspector<D>,
    buf: &mut BytesMut,
    total_timeout: Duration,
    max_bytes: usize,
) -> io::Result<PrereadOutcome>
where
    R: AsyncRead + Unpin,
    D: PacketDecoder,
{
    let deadline = Instant::now() + total_timeout;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if inspector.inspect(Direction::ClientToServer, &buf[..]) == Verdict::Proceed {
            return Ok(PrereadOutcome::Classified);
        }

        if buf.len() >= max_bytes {
            inspector.abandon("preread buffer limit reached");
            return Ok(PrereadOutcome::LimitExceeded);
        }

        let room = cmp::min(max_bytes - buf.len(), READ_CHUNK);
        let remaining = deadline.saturating_duration_since(Instant::now());

        match read_with_timeout(reader, &mut chunk[..room], remaining).await {
            Ok(0) => {
                inspector.abandon("client closed during preread");
                return Ok(PrereadOutcome::ClosedEarly);
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                inspector.abandon("preread timeout");
                return Ok(PrereadOutcome::TimedOut);
            }
            Err(e) => return Err(e),
        }
    }
}

pin_project! {
    /// A reader that yields `prefix` before reading from `inner`.
    ///
    /// Used to hand the preread bytes to the upstream copy loop without a
    /// separate write.
    pub struct Rewind<R> {
        prefix: Bytes,
        #[pin]
        inner: R,
    }
}

impl<R> Rewind<R> {
    pub fn new(prefix: Bytes, inner: R) -> Self {
        Self { prefix, inner }
    }

    /// Bytes of the prefix not yet read.
    pub fn pending(&self) -> usize {
        self.prefix.len()
    }

    /// Consumes the wrapper and returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead> AsyncRead for Rewind<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if !this.prefix.is_empty() {
            let n = cmp::min(this.prefix.len(), buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        this.inner.poll_read(cx, buf)
    }
}
