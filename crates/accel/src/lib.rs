//! The accelerator response cache.
//!
//! This crate is the back half of the strand server core: a cache of
//! fully formatted HTTP responses, keyed by virtual server and URI,
//! replayed with minimal per-request overhead and invalidated by
//! swapping in whole immutable generations rather than evicting entries
//! one by one.
//!
//! # How it fits together
//!
//! A connection handler parses a request with `strand-http`, then asks
//! the accelerator whether a precomputed response exists for this
//! virtual server and path. On a hit, the cached bytes go straight to
//! the socket, synchronously through the file entry's blocking
//! transmit, or through the non-blocking per-connection state machine in
//! [`transmit`], bypassing full request processing. On a miss, the
//! request proceeds normally, and the finished response may be offered
//! back to the cache with [`cache::AccelCache::store`].
//!
//! # Concurrency model
//!
//! - One immutable [`generation::Generation`] is active at a time;
//!   worker threads reach it through per-worker
//!   [`generation::AccelHandle`] cells with an atomic take / put-back
//!   protocol. Readers never take a lock.
//! - All mutation happens on one background task ([`maintain`]): it
//!   validates the current generation, and rebuilds a brand-new one when
//!   the cache is dirty or the configuration changed. A generation is
//!   fully constructed before it is published; it is destroyed only when
//!   its last holder (handle or in-flight transmission) lets go.
//! - Every inconsistency is self-healing: stale records are discarded,
//!   never served, and never fail a live request; the worst case is a
//!   cache miss where a hit was theoretically possible.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use strand_accel::cache::AccelCache;
//! use strand_accel::config::{ConfigRegistry, Configuration, VirtualServer};
//! use strand_accel::maintain::MaintenanceConfig;
//! use strand_accel::store::FileCache;
//!
//! fn start(files: Arc<dyn FileCache>) -> AccelCache {
//!     let vs = VirtualServer::new("default");
//!     let registry = ConfigRegistry::new(Configuration::new(1, vec![vs]));
//!     let cache = AccelCache::new(registry, files);
//!     cache.start_maintenance(MaintenanceConfig::default());
//!     cache
//! }
//! ```
//!
//! # Modules
//!
//! - [`cache`]: the engine: rebuild, lookup, conditional-GET data
//!   selection, store, validate, counters
//! - [`generation`]: immutable snapshots and the handle reference
//!   protocol
//! - [`transmit`]: synchronous replay and the async per-connection state
//!   machine
//! - [`maintain`]: the adaptive background cycle
//! - [`config`]: configuration snapshots and virtual servers
//! - [`store`]: the file-content cache contract
//! - [`data`]: cached response records
//! - [`date`]: the cached `Date` header value
//! - [`log`]: the access-log contract with batched appends

pub mod cache;
pub mod config;
pub mod data;
pub mod date;
pub mod generation;
pub mod log;
pub mod maintain;
pub mod store;
pub mod transmit;
