//! Response transmission: the synchronous replay path and the
//! asynchronous per-connection state machine.
//!
//! The synchronous path blocks the worker on socket/disk I/O, delegated
//! to the file entry's blocking transmit. The asynchronous path never
//! blocks: every write is a readiness-style attempt, and a connection
//! whose socket is not writable is parked on a retry list with its own
//! generation reference, so a worker thread is never held hostage by a
//! slow client and a rebuild can never destroy a generation that still
//! has bytes in flight.
//!
//! Per-connection states: `Idle → HeadersPending → BodyPending → Done`.
//! A connection whose very first attempt fails outright goes back to
//! `Idle` with no generation reference taken; the caller serves it
//! synchronously instead.

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::{Bytes, BytesMut};
use http::StatusCode;
use tracing::{trace, warn};

use strand_http::prefix::encode_prefix;
use strand_http::protocol::Request;

use crate::cache::AccelCache;
use crate::config::VirtualServer;
use crate::data::AccelData;
use crate::date::DateService;
use crate::generation::{AccelHandle, Generation};
use crate::log::{LogRecord, flush_batched};
use crate::store::{NonBlockingSink, TransmitStatus};

/// Result of the synchronous replay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The response was replayed from the cache.
    Served { status: StatusCode, bytes_sent: u64 },
    /// No cached response applies; run full request processing.
    NotHandled,
}

impl AccelCache {
    /// Synchronous replay: looks the request up in the handle's current
    /// generation and, on a hit, transmits the cached response through
    /// the entry's blocking transmit.
    pub fn serve_blocking(
        &self,
        handle: &AccelHandle,
        request: &Request,
        vs: &Arc<VirtualServer>,
        sink: &mut dyn io::Write,
    ) -> io::Result<ServeOutcome> {
        let Some(generation) = handle.take() else {
            self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(ServeOutcome::NotHandled);
        };

        let outcome = self.serve_from(&generation, request, vs, sink);
        handle.put_back(generation);
        outcome
    }

    fn serve_from(
        &self,
        generation: &Generation,
        request: &Request,
        vs: &Arc<VirtualServer>,
        sink: &mut dyn io::Write,
    ) -> io::Result<ServeOutcome> {
        let data = generation
            .resource_for(vs, request.path())
            .and_then(|resource| self.get_data(resource, request, false));
        let Some(data) = data else {
            self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(ServeOutcome::NotHandled);
        };

        let prefix = format_prefix(&data, request.keep_alive());
        let bytes_sent = if data.status() == StatusCode::NOT_MODIFIED {
            // A 304 has no body; only the head is replayed.
            sink.write_all(&prefix)?;
            prefix.len() as u64
        } else {
            data.entry().transmit(&prefix, sink)?
        };
        self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
        trace!(uri = data.uri(), status = data.status().as_u16(), bytes_sent, "served from accelerator");

        if let Some(log) = data.log() {
            log.append(&[hit_record(&data, bytes_sent, false)]);
        }
        Ok(ServeOutcome::Served { status: data.status(), bytes_sent })
    }

    /// Begins an asynchronous service batch over this handle's current
    /// generation. `None` when the handle holds no generation; the
    /// caller falls back to the synchronous path.
    pub fn begin_async(&self, handle: &Arc<AccelHandle>) -> Option<AsyncBatch> {
        let generation = handle.take()?;
        Some(AsyncBatch {
            cache: self.clone(),
            handle: Arc::clone(handle),
            generation: Some(generation),
            retry: Vec::new(),
            finished: Vec::new(),
        })
    }
}

/// Per-connection transmission phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncPhase {
    Idle,
    HeadersPending,
    BodyPending,
    Done,
}

/// One connection's in-flight asynchronous replay.
#[derive(Debug)]
pub struct AsyncConn {
    data: Arc<AccelData>,
    phase: AsyncPhase,
    prefix: Bytes,
    prefix_sent: usize,
    body_offset: u64,
    bytes_sent: u64,
    /// Granted on first suspension so the generation outlives the
    /// transmission even if every handle has moved on.
    generation: Option<Arc<Generation>>,
    aborted: bool,
    failed: bool,
}

impl AsyncConn {
    pub fn phase(&self) -> AsyncPhase {
        self.phase
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn status(&self) -> StatusCode {
        self.data.status()
    }
}

/// Outcome of one [`AsyncBatch::service`] attempt.
#[derive(Debug)]
pub enum Serviced {
    /// Partial write; the connection was parked on the retry list.
    Again,
    /// Fully sent (or failed after progress); parked on the finished
    /// list for log and cleanup.
    Done,
    /// The mechanism cannot service this connection at all. State is
    /// back to `Idle` and no generation reference was taken; serve it
    /// synchronously.
    Unserviceable(AsyncConn),
}

/// One asynchronous service batch: the generation reference borrowed
/// from the owning handle, plus the retry and finished lists.
pub struct AsyncBatch {
    cache: AccelCache,
    handle: Arc<AccelHandle>,
    generation: Option<Arc<Generation>>,
    retry: Vec<AsyncConn>,
    finished: Vec<AsyncConn>,
}

impl std::fmt::Debug for AsyncBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncBatch")
            .field("generation", &self.generation.as_ref().map(|g| g.seq()))
            .field("retry", &self.retry.len())
            .field("finished", &self.finished.len())
            .finish_non_exhaustive()
    }
}

enum Progress {
    Complete,
    Blocked,
}

impl AsyncBatch {
    /// Looks the request up in the batch generation and prepares a
    /// connection state for replay, with the response prefix formatted
    /// once up front.
    pub fn lookup(&self, request: &Request, vs: &Arc<VirtualServer>) -> Option<AsyncConn> {
        let generation = self.generation.as_ref()?;
        let data = generation
            .resource_for(vs, request.path())
            .and_then(|resource| self.cache.get_data(resource, request, false));
        let Some(data) = data else {
            self.cache.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.cache.inner.stats.hits.fetch_add(1, Ordering::Relaxed);

        let prefix = format_prefix(&data, request.keep_alive());
        Some(AsyncConn {
            data,
            phase: AsyncPhase::Idle,
            prefix,
            prefix_sent: 0,
            body_offset: 0,
            bytes_sent: 0,
            generation: None,
            aborted: false,
            failed: false,
        })
    }

    /// Drives one readiness-style write attempt for `conn`.
    pub fn service(&mut self, mut conn: AsyncConn, sink: &mut dyn NonBlockingSink) -> Serviced {
        let first_attempt = conn.phase == AsyncPhase::Idle && conn.generation.is_none();
        if conn.phase == AsyncPhase::Idle {
            conn.phase = AsyncPhase::HeadersPending;
        }

        match drive(&mut conn, sink) {
            Ok(Progress::Complete) => {
                conn.phase = AsyncPhase::Done;
                self.finished.push(conn);
                Serviced::Done
            }
            Ok(Progress::Blocked) => {
                if conn.generation.is_none() {
                    // First suspension: grant the dedicated generation
                    // reference that keeps the snapshot alive for the
                    // remainder of this transmission.
                    conn.generation.clone_from(&self.generation);
                }
                self.retry.push(conn);
                Serviced::Again
            }
            Err(e) if first_attempt && conn.bytes_sent == 0 => {
                trace!(cause = %e, "async replay unserviceable, falling back to sync");
                self.cache.inner.stats.async_unserviceable.fetch_add(1, Ordering::Relaxed);
                conn.phase = AsyncPhase::Idle;
                Serviced::Unserviceable(conn)
            }
            Err(e) => {
                warn!(cause = %e, uri = conn.data.uri(), "async replay failed mid-transmission");
                conn.failed = true;
                conn.phase = AsyncPhase::Done;
                self.finished.push(conn);
                Serviced::Done
            }
        }
    }

    /// Takes the connections waiting for another write attempt; each
    /// carries its own generation reference, so they stay valid across
    /// batches.
    pub fn take_retries(&mut self) -> Vec<AsyncConn> {
        std::mem::take(&mut self.retry)
    }

    /// Externally torn-down connections must come through here so their
    /// cleanup (log record, reference release) still happens.
    pub fn abort(&mut self, mut conn: AsyncConn) {
        conn.aborted = true;
        conn.phase = AsyncPhase::Done;
        self.finished.push(conn);
    }

    /// Flushes the finished list (access-log records batched per log),
    /// releases every per-connection reference, and returns the batch
    /// generation reference to the owning handle. Idempotent.
    pub fn end(&mut self) {
        let records: Vec<_> = self
            .finished
            .drain(..)
            .map(|conn| {
                let record = hit_record(&conn.data, conn.bytes_sent, conn.aborted || conn.failed);
                (conn.data.log().cloned(), record)
            })
            .collect();
        flush_batched(records);

        if let Some(generation) = self.generation.take() {
            self.handle.put_back(generation);
        }
    }
}

impl Drop for AsyncBatch {
    fn drop(&mut self) {
        self.end();
    }
}

fn drive(conn: &mut AsyncConn, sink: &mut dyn NonBlockingSink) -> io::Result<Progress> {
    if conn.phase == AsyncPhase::HeadersPending {
        while conn.prefix_sent < conn.prefix.len() {
            match sink.try_write(&conn.prefix[conn.prefix_sent..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    conn.prefix_sent += n;
                    conn.bytes_sent += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::Blocked),
                Err(e) => return Err(e),
            }
        }
        if conn.data.status() == StatusCode::NOT_MODIFIED {
            return Ok(Progress::Complete);
        }
        conn.phase = AsyncPhase::BodyPending;
    }

    while conn.phase == AsyncPhase::BodyPending {
        let before = conn.body_offset;
        let status = conn.data.entry().try_transmit(sink, &mut conn.body_offset)?;
        conn.bytes_sent += conn.body_offset - before;
        match status {
            TransmitStatus::Done => return Ok(Progress::Complete),
            TransmitStatus::Again => {}
            TransmitStatus::WouldBlock => return Ok(Progress::Blocked),
        }
    }
    Ok(Progress::Complete)
}

/// Formats the replay prefix: fresh status line, Date and Connection,
/// then the cached header tail byte-for-byte.
fn format_prefix(data: &AccelData, keep_alive: bool) -> Bytes {
    let mut prefix = BytesMut::new();
    let date = DateService::global().current();
    encode_prefix(&mut prefix, data.status(), data.status_text(), &date, keep_alive, data.header_tail());
    prefix.freeze()
}

fn hit_record(data: &AccelData, bytes_sent: u64, aborted: bool) -> LogRecord {
    LogRecord {
        vs: data.vs().name().into(),
        uri: data.uri().into(),
        status: data.status(),
        bytes_sent,
        aborted,
    }
}
