//! The accelerator cache engine.
//!
//! [`AccelCache`] owns the generation lifecycle: a background cycle
//! enumerates the file-content cache, validates every cached response
//! record against the current configuration, builds a brand-new
//! [`Generation`] and installs it atomically into every live handle.
//! Worker threads never take a lock: they move their handle's generation
//! reference out, serve from the immutable snapshot, and put the
//! reference back.
//!
//! All internal inconsistency is non-fatal and self-healing: stale or
//! mismatched records are discarded (never served), the cache is marked
//! dirty, and the next cycle rebuilds. A live request sees at worst a
//! cache miss where a hit was theoretically possible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;
use tracing::{debug, trace, warn};

use strand_http::keyword::method;
use strand_http::protocol::{HeaderId, Request};

use crate::config::{ConfigRegistry, VirtualServer};
use crate::data::{AccelData, AccelResource, unix_secs};
use crate::generation::{AccelHandle, AccelSet, Generation};
use crate::log::AccessLog;
use crate::store::{DataKind, FileCache, FileEntry};

/// Why a finished response was not stored into the accelerator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreReject {
    #[error("response was not marked cacheable")]
    NotEnabled,
    #[error("method is not GET")]
    NotGet,
    #[error("request has a query string")]
    HasQuery,
    #[error("request resolved with extra path info")]
    HasPathInfo,
    #[error("response is content-encoded")]
    ContentEncoded,
    #[error("response is transfer-encoded")]
    TransferEncoded,
    #[error("status {0} is not cacheable")]
    Status(u16),
    #[error("request path is not valid utf-8")]
    PathNotUtf8,
    #[error("a response of this kind is already attached to the entry")]
    AlreadyCached,
}

/// A finished response offered to the accelerator for caching.
///
/// `enabled` is set by the request processor once it decides the
/// response is an accelerator candidate; everything else restates what
/// the response actually was, and [`AccelCache::store`] re-validates all
/// of it.
pub struct CacheableResponse<'a> {
    pub enabled: bool,
    pub request: &'a Request,
    pub vs: Arc<VirtualServer>,
    pub entry: Arc<dyn FileEntry>,
    pub status: StatusCode,
    pub status_text: &'a str,
    pub last_modified: SystemTime,
    pub etag: Option<&'a str>,
    /// Formatted response headers after Date/Connection, including the
    /// terminating blank line; replayed byte-for-byte on every hit.
    pub header_tail: Bytes,
    pub content_encoded: bool,
    pub transfer_encoded: bool,
    pub path_info: bool,
    pub internal: bool,
    pub log: Option<Arc<dyn AccessLog>>,
    pub unclean_shutdown_pattern: Option<&'a str>,
}

/// Monotonic diagnostic counters.
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) stores: AtomicU64,
    pub(crate) store_rejects: AtomicU64,
    pub(crate) outdated: AtomicU64,
    pub(crate) inconsistent: AtomicU64,
    pub(crate) validate_failures: AtomicU64,
    pub(crate) rebuilds: AtomicU64,
    pub(crate) async_unserviceable: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub store_rejects: u64,
    pub outdated: u64,
    pub inconsistent: u64,
    pub validate_failures: u64,
    pub rebuilds: u64,
    pub async_unserviceable: u64,
}

pub(crate) struct CacheInner {
    pub(crate) registry: Arc<ConfigRegistry>,
    pub(crate) files: Arc<dyn FileCache>,
    pub(crate) current: ArcSwapOption<Generation>,
    pub(crate) handles: Mutex<Vec<Weak<AccelHandle>>>,
    pub(crate) dirty: AtomicBool,
    pub(crate) seq: AtomicU32,
    pub(crate) stats: CacheStats,
    pub(crate) maintainer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.maintainer.lock()
            && let Some(task) = guard.take()
        {
            task.abort();
        }
    }
}

/// The accelerator cache. Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct AccelCache {
    pub(crate) inner: Arc<CacheInner>,
}

impl std::fmt::Debug for AccelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccelCache")
            .field("generation", &self.inner.current.load().as_ref().map(|g| g.seq()))
            .field("dirty", &self.inner.dirty.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AccelCache {
    /// Creates an engine over the given configuration registry and
    /// file-content cache. No generation exists until the first
    /// [`rebuild`](Self::rebuild); start the background cycle with
    /// [`start_maintenance`](Self::start_maintenance).
    pub fn new(registry: Arc<ConfigRegistry>, files: Arc<dyn FileCache>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                registry,
                files,
                current: ArcSwapOption::const_empty(),
                handles: Mutex::new(Vec::new()),
                dirty: AtomicBool::new(true),
                seq: AtomicU32::new(0),
                stats: CacheStats::default(),
                maintainer: Mutex::new(None),
            }),
        }
    }

    /// Creates a new worker handle, pre-loaded with the current
    /// generation, and adds it to the rebuild broadcast list.
    pub fn create_handle(&self) -> Arc<AccelHandle> {
        let handle = Arc::new(AccelHandle::new(self.inner.current.load_full()));
        self.inner.handles.lock().expect("handle list poisoned").push(Arc::downgrade(&handle));
        handle
    }

    pub fn current_generation(&self) -> Option<Arc<Generation>> {
        self.inner.current.load_full()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> StatsSnapshot {
        let s = &self.inner.stats;
        StatsSnapshot {
            hits: s.hits.load(Ordering::Relaxed),
            misses: s.misses.load(Ordering::Relaxed),
            stores: s.stores.load(Ordering::Relaxed),
            store_rejects: s.store_rejects.load(Ordering::Relaxed),
            outdated: s.outdated.load(Ordering::Relaxed),
            inconsistent: s.inconsistent.load(Ordering::Relaxed),
            validate_failures: s.validate_failures.load(Ordering::Relaxed),
            rebuilds: s.rebuilds.load(Ordering::Relaxed),
            async_unserviceable: s.async_unserviceable.load(Ordering::Relaxed),
        }
    }

    /// Rebuilds the cache from the file-content cache and installs the
    /// new generation into every live handle.
    ///
    /// Runs on the background cycle, never on a request path. The new
    /// generation is complete before it is published anywhere; `ArcSwap`
    /// issues the release fence, so no reader can observe a
    /// partially-constructed snapshot.
    pub fn rebuild(&self) {
        let inner = &self.inner;
        inner.dirty.store(false, Ordering::SeqCst);
        let config = inner.registry.current();

        let mut resources: Vec<Arc<AccelResource>> = Vec::new();
        let mut sets: Vec<AccelSet> = Vec::new();
        let mut set_index: HashMap<usize, usize> = HashMap::new();
        let mut outdated = 0u64;
        let mut inconsistent = 0u64;

        for entry in inner.files.entries() {
            let mut data200 = entry.accel_data(DataKind::Ok200);
            let mut data304 = entry.accel_data(DataKind::NotModified304);
            if data200.is_none() && data304.is_none() {
                continue;
            }

            // Records built under any other configuration are stale.
            for (kind, slot) in [(DataKind::Ok200, &mut data200), (DataKind::NotModified304, &mut data304)] {
                if let Some(data) = slot.as_ref()
                    && data.config_id() != config.id()
                {
                    entry.detach_accel_data(kind);
                    *slot = None;
                    outdated += 1;
                }
            }

            // A 200/304 pair must describe the same resource.
            if let (Some(ok), Some(not_modified)) = (&data200, &data304) {
                let consistent = Arc::ptr_eq(ok.vs(), not_modified.vs())
                    && ok.uri() == not_modified.uri()
                    && unix_secs(ok.last_modified()) == unix_secs(not_modified.last_modified());
                if !consistent {
                    warn!(uri = ok.uri(), "discarding inconsistent 200/304 accelerator pair");
                    entry.detach_accel_data(DataKind::Ok200);
                    entry.detach_accel_data(DataKind::NotModified304);
                    data200 = None;
                    data304 = None;
                    inconsistent += 2;
                }
            }

            let (vs, uri, last_modified, etag) = {
                let Some(primary) = data200.as_ref().or(data304.as_ref()) else { continue };
                (
                    Arc::clone(primary.vs()),
                    Box::<str>::from(primary.uri()),
                    primary.last_modified(),
                    primary.etag().map(Box::<str>::from),
                )
            };

            // The virtual server must still exist in the current
            // configuration (id equality makes this near-tautological,
            // but a record must never outlive its server).
            if !config.virtual_servers().iter().any(|v| Arc::ptr_eq(v, &vs)) {
                entry.detach_accel_data(DataKind::Ok200);
                entry.detach_accel_data(DataKind::NotModified304);
                outdated += 1;
                continue;
            }

            let resource = Arc::new(AccelResource {
                uri,
                entry: Arc::clone(&entry),
                last_modified,
                etag,
                data200,
                data304,
            });

            let set_slot = *set_index.entry(Arc::as_ptr(&vs) as usize).or_insert_with(|| {
                sets.push(AccelSet::new(Arc::clone(&vs)));
                sets.len() - 1
            });
            let resource_id = resources.len() as u32;
            sets[set_slot].by_uri.entry(resource.uri.clone()).or_insert(resource_id);
            resources.push(resource);
        }

        let seq = inner.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let resource_count = resources.len();
        let set_count = sets.len();
        let generation = Arc::new(Generation::new(seq, config.id(), sets, resources));

        inner.current.store(Some(Arc::clone(&generation)));
        {
            let mut handles = inner.handles.lock().expect("handle list poisoned");
            handles.retain(|weak| match weak.upgrade() {
                Some(handle) => {
                    handle.install(Arc::clone(&generation));
                    true
                }
                None => false,
            });
        }

        inner.stats.outdated.fetch_add(outdated, Ordering::Relaxed);
        inner.stats.inconsistent.fetch_add(inconsistent, Ordering::Relaxed);
        inner.stats.rebuilds.fetch_add(1, Ordering::Relaxed);
        debug!(
            generation = seq,
            resources = resource_count,
            sets = set_count,
            outdated,
            inconsistent,
            "accelerator generation installed"
        );
    }

    /// Selects the cached response variant for this request, honoring
    /// conditional-GET semantics, after revalidating the file entry.
    ///
    /// Fails closed: a stale entry yields `None` (a cache miss for this
    /// request) and marks the cache dirty for the next cycle.
    pub fn get_data(&self, resource: &AccelResource, request: &Request, internal_ok: bool) -> Option<Arc<AccelData>> {
        if !resource.entry().check() {
            trace!(uri = resource.uri(), "file entry failed revalidation, declining cache hit");
            self.inner.stats.validate_failures.fetch_add(1, Ordering::Relaxed);
            self.mark_dirty();
            return None;
        }

        let not_modified = conditions_say_not_modified(resource, request);
        let data = if not_modified { resource.data304() } else { resource.data200() }?;
        if data.internal() && !internal_ok {
            return None;
        }
        Some(Arc::clone(data))
    }

    /// Offers a finished response for caching; re-validates every
    /// cacheability precondition and attaches the record to the file
    /// entry (first writer wins per entry and status kind).
    pub fn store(&self, response: CacheableResponse<'_>) -> Result<(), StoreReject> {
        let result = self.try_store(response);
        match &result {
            Ok(()) => {
                self.inner.stats.stores.fetch_add(1, Ordering::Relaxed);
                // The new record becomes visible at the next rebuild.
                self.mark_dirty();
            }
            Err(reject) => {
                trace!(%reject, "response not stored into accelerator");
                self.inner.stats.store_rejects.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    fn try_store(&self, response: CacheableResponse<'_>) -> Result<(), StoreReject> {
        if !response.enabled {
            return Err(StoreReject::NotEnabled);
        }
        if response.request.method_index() != Some(method::GET) {
            return Err(StoreReject::NotGet);
        }
        if response.request.query().is_some() {
            return Err(StoreReject::HasQuery);
        }
        if response.path_info {
            return Err(StoreReject::HasPathInfo);
        }
        if response.content_encoded {
            return Err(StoreReject::ContentEncoded);
        }
        if response.transfer_encoded {
            return Err(StoreReject::TransferEncoded);
        }
        let kind = match response.status {
            StatusCode::OK => DataKind::Ok200,
            StatusCode::NOT_MODIFIED => DataKind::NotModified304,
            other => return Err(StoreReject::Status(other.as_u16())),
        };
        let uri: Box<str> =
            std::str::from_utf8(response.request.path()).map_err(|_| StoreReject::PathNotUtf8)?.into();

        let config = self.inner.registry.current();
        let data = Arc::new(AccelData {
            config_id: config.id(),
            vs: response.vs,
            uri,
            last_modified: response.last_modified,
            status: response.status,
            status_text: response.status_text.into(),
            etag: response.etag.map(Into::into),
            header_tail: response.header_tail,
            log: response.log,
            internal: response.internal,
            unclean_shutdown_pattern: response.unclean_shutdown_pattern.map(Into::into),
            entry: Arc::clone(&response.entry),
        });

        if response.entry.attach_accel_data(kind, data) { Ok(()) } else { Err(StoreReject::AlreadyCached) }
    }

    /// Walks the current generation and rechecks every file entry; any
    /// failure marks the cache dirty so the next cycle rebuilds instead
    /// of patching in place.
    pub fn validate(&self) {
        let Some(generation) = self.current_generation() else { return };
        let mut failures = 0u64;
        for resource in generation.resources() {
            if !resource.entry().check() {
                failures += 1;
            }
        }
        if failures > 0 {
            self.inner.stats.validate_failures.fetch_add(failures, Ordering::Relaxed);
            self.mark_dirty();
            debug!(failures, "accelerator validation found stale entries");
        }
    }

    /// One background cycle: rebuild if needed, then validate. Rebuilds
    /// when the cache is dirty, when no generation exists yet, or when
    /// the configuration changed; validation failures mark the cache
    /// dirty for the *next* cycle.
    pub fn run_cycle(&self) {
        let needs_rebuild = match self.current_generation() {
            Some(generation) => self.is_dirty() || generation.config_id() != self.inner.registry.current().id(),
            None => true,
        };
        if needs_rebuild {
            self.rebuild();
        }
        self.validate();
    }
}

/// RFC conditional-GET evaluation against the cached validators:
/// If-None-Match takes precedence via ETag comparison; otherwise
/// If-Modified-Since is a (second-granular) later-than check.
fn conditions_say_not_modified(resource: &AccelResource, request: &Request) -> bool {
    if let Some(if_none_match) = request.header(HeaderId::IfNoneMatch) {
        return etag_matches(if_none_match, resource.etag());
    }
    if let Some(if_modified_since) = request.header(HeaderId::IfModifiedSince)
        && let Ok(text) = std::str::from_utf8(if_modified_since)
        && let Ok(since) = httpdate::parse_http_date(text)
    {
        return unix_secs(resource.last_modified()) <= unix_secs(since);
    }
    false
}

fn etag_matches(if_none_match: &[u8], etag: Option<&str>) -> bool {
    if if_none_match.trim_ascii() == b"*" {
        return true;
    }
    let Some(etag) = etag else { return false };
    if_none_match.split(|&b| b == b',').any(|candidate| candidate.trim_ascii() == etag.as_bytes())
}
