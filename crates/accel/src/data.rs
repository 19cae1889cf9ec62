//! Cached response records.
//!
//! [`AccelData`] is one fully formatted HTTP response ready for replay;
//! [`AccelResource`] is one cached URI holding up to two of them (the
//! `200 OK` and the `304 Not Modified` variant) over the same
//! file-cache entry, sharing one last-modified time and ETag.

use bytes::Bytes;
use http::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::VirtualServer;
use crate::log::AccessLog;
use crate::store::FileEntry;

/// HTTP dates are second-granular; all freshness comparisons truncate.
pub(crate) fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// One cached, fully formatted HTTP response.
///
/// Valid only under a configuration whose id equals [`config_id`]
/// (`AccelData::config_id`); the rebuild cycle discards records tagged
/// with any other id. The record owns everything it needs for replay:
/// the pre-formatted header tail, the file-cache entry holding the body
/// bytes, and the access-log handle for the hit record.
pub struct AccelData {
    pub(crate) config_id: u64,
    pub(crate) vs: Arc<VirtualServer>,
    pub(crate) uri: Box<str>,
    pub(crate) last_modified: SystemTime,
    pub(crate) status: StatusCode,
    pub(crate) status_text: Box<str>,
    pub(crate) etag: Option<Box<str>>,
    /// Pre-formatted headers after the regenerated Date and Connection,
    /// including the terminating blank line.
    pub(crate) header_tail: Bytes,
    pub(crate) log: Option<Arc<dyn AccessLog>>,
    pub(crate) internal: bool,
    /// Browser User-Agent pattern for which TLS close-notify is skipped.
    pub(crate) unclean_shutdown_pattern: Option<Box<str>>,
    pub(crate) entry: Arc<dyn FileEntry>,
}

impl AccelData {
    pub fn config_id(&self) -> u64 {
        self.config_id
    }

    pub fn vs(&self) -> &Arc<VirtualServer> {
        &self.vs
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn header_tail(&self) -> &[u8] {
        &self.header_tail
    }

    pub fn log(&self) -> Option<&Arc<dyn AccessLog>> {
        self.log.as_ref()
    }

    /// Data stored for an internal request must never be served to an
    /// external HTTP client.
    pub fn internal(&self) -> bool {
        self.internal
    }

    pub fn unclean_shutdown_pattern(&self) -> Option<&str> {
        self.unclean_shutdown_pattern.as_deref()
    }

    pub fn entry(&self) -> &Arc<dyn FileEntry> {
        &self.entry
    }
}

impl fmt::Debug for AccelData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccelData")
            .field("config_id", &self.config_id)
            .field("vs", &self.vs.name())
            .field("uri", &self.uri)
            .field("status", &self.status)
            .field("internal", &self.internal)
            .finish_non_exhaustive()
    }
}

/// One cached URI: the shared file-cache entry plus up to two response
/// variants agreeing on last-modified and ETag.
pub struct AccelResource {
    pub(crate) uri: Box<str>,
    pub(crate) entry: Arc<dyn FileEntry>,
    pub(crate) last_modified: SystemTime,
    pub(crate) etag: Option<Box<str>>,
    pub(crate) data200: Option<Arc<AccelData>>,
    pub(crate) data304: Option<Arc<AccelData>>,
}

impl AccelResource {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn entry(&self) -> &Arc<dyn FileEntry> {
        &self.entry
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn data200(&self) -> Option<&Arc<AccelData>> {
        self.data200.as_ref()
    }

    pub fn data304(&self) -> Option<&Arc<AccelData>> {
        self.data304.as_ref()
    }
}

impl fmt::Debug for AccelResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccelResource")
            .field("uri", &self.uri)
            .field("has_200", &self.data200.is_some())
            .field("has_304", &self.data304.is_some())
            .finish_non_exhaustive()
    }
}
