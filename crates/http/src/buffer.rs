//! Growable socket read buffer with budgeted refill.
//!
//! [`SourceBuf`] is the single buffer a connection parses from. It grows
//! on demand up to a configured maximum, refills from the socket with a
//! timeout budget that is decremented across successive refills, and
//! detaches a fully parsed request head as a frozen [`HeaderBlock`] while
//! leaving any pipelined bytes in place for the next parse.

use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::protocol::ParseError;
use crate::span::HeaderBlock;

/// Maximum size in bytes allowed for one request head by default.
pub const DEFAULT_MAX_HEAD_BYTES: usize = 8 * 1024;

const INIT_CAPACITY: usize = 1024;

/// A growable read buffer backed by a socket.
///
/// Bytes in the buffer are always the not-yet-consumed tail of the
/// stream: consuming a parsed head via [`split_headers`](Self::split_headers)
/// shifts the buffer start, so a pipelined follow-up request begins at
/// offset zero of the next parse.
#[derive(Debug)]
pub struct SourceBuf {
    buf: BytesMut,
    max_size: usize,
}

impl SourceBuf {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_HEAD_BYTES)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self { buf: BytesMut::with_capacity(INIT_CAPACITY.min(max_size)), max_size }
    }

    /// Number of valid (unconsumed) bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Appends bytes directly, as if they had been read from the socket.
    /// Intended for tests and for replaying already-received data.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Reads more bytes from `io`, charging the elapsed wall-clock time
    /// against `budget`.
    ///
    /// Outcomes are distinct so callers can map them to distinct parse
    /// failures: an exhausted budget is [`ParseError::Timeout`], a read
    /// error is [`ParseError::Io`], a clean peer close before the head
    /// completed is [`ParseError::Eof`], and a buffer already grown to
    /// `max_size` is [`ParseError::TooLarge`].
    pub async fn refill<R>(&mut self, io: &mut R, budget: &mut TimeoutBudget) -> Result<usize, ParseError>
    where
        R: AsyncRead + Unpin,
    {
        let room = self.max_size - self.buf.len().min(self.max_size);
        if room == 0 {
            return Err(ParseError::too_large(self.max_size));
        }

        let window = budget.remaining()?;
        let started = Instant::now();
        let read = tokio::time::timeout(window, io.read_buf(&mut (&mut self.buf).limit(room))).await;
        budget.charge(started.elapsed());

        match read {
            Err(_elapsed) => Err(ParseError::Timeout),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(0)) => Err(ParseError::Eof),
            Ok(Ok(n)) => Ok(n),
        }
    }

    /// Detaches the parsed head `[0, end)` as a frozen block, leaving any
    /// pipelined bytes in the buffer for the next parse.
    pub(crate) fn split_headers(&mut self, end: usize) -> HeaderBlock {
        HeaderBlock::new(self.buf.split_to(end).freeze())
    }
}

impl Default for SourceBuf {
    fn default() -> Self {
        Self::new()
    }
}

/// A wall-clock budget shared by every refill of one parse.
///
/// Each refill consumes part of the budget; the remainder carries over to
/// the next refill. An exhausted budget maps to [`ParseError::Timeout`].
#[derive(Debug, Clone, Copy)]
pub struct TimeoutBudget {
    remaining: Duration,
}

impl TimeoutBudget {
    pub fn new(total: Duration) -> Self {
        Self { remaining: total }
    }

    pub fn remaining(&self) -> Result<Duration, ParseError> {
        if self.remaining.is_zero() { Err(ParseError::Timeout) } else { Ok(self.remaining) }
    }

    pub fn charge(&mut self, spent: Duration) {
        self.remaining = self.remaining.saturating_sub(spent);
    }
}
