//! The file-content cache contract.
//!
//! The accelerator does not own file bytes; it piggybacks on the
//! server's file-content cache, which memory-maps static files and
//! tracks their freshness. These traits are the minimal surface the
//! accelerator depends on: enumeration for rebuilds, per-entry private
//! data slots for the cached 200/304 responses, freshness checks, and
//! blocking plus readiness-style transmission of entry bytes.

use std::io;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::data::AccelData;

/// Which cached response variant a private-data slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// The full `200 OK` response.
    Ok200,
    /// The `304 Not Modified` response.
    NotModified304,
}

/// Result of one readiness-style transmission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitStatus {
    /// Everything sent.
    Done,
    /// Partial progress; call again immediately.
    Again,
    /// No progress possible now; wait for socket writability.
    WouldBlock,
}

/// A sink accepting readiness-style writes that never block.
///
/// Implemented for `tokio::net::TcpStream` via its `try_write`; an
/// attempt that would block must return `io::ErrorKind::WouldBlock`.
pub trait NonBlockingSink {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl NonBlockingSink for tokio::net::TcpStream {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        tokio::net::TcpStream::try_write(self, buf)
    }
}

/// One entry of the file-content cache.
pub trait FileEntry: Send + Sync {
    /// Accelerator private data attached under `kind`, if any.
    fn accel_data(&self, kind: DataKind) -> Option<Arc<AccelData>>;

    /// Attaches accelerator data under `kind`. The first writer wins: if
    /// a prior attach exists it is left untouched and `false` is
    /// returned.
    fn attach_accel_data(&self, kind: DataKind, data: Arc<AccelData>) -> bool;

    /// Detaches (and thereby destroys, once unreferenced) the data under
    /// `kind`.
    fn detach_accel_data(&self, kind: DataKind);

    /// Revalidates the entry against the underlying file. `false` means
    /// the cached bytes are stale and must not be served.
    fn check(&self) -> bool;

    /// Blocking transmit: writes `prefix` then the entry's bytes to
    /// `sink`, returning the total byte count.
    fn transmit(&self, prefix: &[u8], sink: &mut dyn io::Write) -> io::Result<u64>;

    /// Readiness-style transmit of the entry's bytes starting at
    /// `*offset`; advances `*offset` by whatever was sent.
    fn try_transmit(&self, sink: &mut dyn NonBlockingSink, offset: &mut u64) -> io::Result<TransmitStatus>;

    /// Total body length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The file-content cache itself.
#[cfg_attr(test, automock)]
pub trait FileCache: Send + Sync {
    /// A finite snapshot of the current entries, for one rebuild pass.
    fn entries(&self) -> Vec<Arc<dyn FileEntry>>;
}
