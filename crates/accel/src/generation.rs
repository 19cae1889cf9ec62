//! Generations and handles: the concurrency heart of the accelerator.
//!
//! A [`Generation`] is one immutable snapshot of everything the cache
//! knows: resources plus one URI→resource map per virtual server. It is
//! built off to the side by the rebuild cycle and only then published,
//! so no reader ever observes it partially constructed; `ArcSwap`'s
//! release store is the fence that makes the construct-then-publish
//! ordering hold.
//!
//! An [`AccelHandle`] is a per-worker cell holding (at most) one
//! reference to the current generation. [`take`](AccelHandle::take)
//! moves that reference out atomically, so no other thread can
//! concurrently finish the same reference; [`put_back`](AccelHandle::put_back)
//! returns it with a compare-and-swap that yields to any newer
//! generation a rebuild installed in the meantime. The "exactly one
//! outstanding reference per handle" protocol is thereby enforced by the
//! types: references only exist as `Arc`s, and a handle slot holds at
//! most one.

use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::sync::Arc;

use crate::config::VirtualServer;
use crate::data::AccelResource;

/// Per-virtual-server URI→resource map within one generation.
pub struct AccelSet {
    pub(crate) vs: Arc<VirtualServer>,
    /// Exact abs_path mapping; an unmapped suffix or parameter component
    /// simply misses.
    pub(crate) by_uri: HashMap<Box<str>, u32>,
}

impl AccelSet {
    pub(crate) fn new(vs: Arc<VirtualServer>) -> Self {
        Self { vs, by_uri: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.by_uri.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uri.is_empty()
    }
}

impl fmt::Debug for AccelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccelSet").field("vs", &self.vs.name()).field("uris", &self.by_uri.len()).finish()
    }
}

/// One immutable snapshot of the accelerator cache.
pub struct Generation {
    seq: u32,
    config_id: u64,
    sets: Vec<AccelSet>,
    resources: Vec<Arc<AccelResource>>,
}

impl Generation {
    pub(crate) fn new(seq: u32, config_id: u64, sets: Vec<AccelSet>, resources: Vec<Arc<AccelResource>>) -> Self {
        Self { seq, config_id, sets, resources }
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn config_id(&self) -> u64 {
        self.config_id
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn resources(&self) -> impl Iterator<Item = &AccelResource> {
        self.resources.iter().map(|r| &**r)
    }

    /// Exact-path resource lookup for one virtual server.
    pub fn resource_for(&self, vs: &Arc<VirtualServer>, path: &[u8]) -> Option<&AccelResource> {
        let set = self.set_for(vs)?;
        let path = std::str::from_utf8(path).ok()?;
        set.by_uri.get(path).map(|&i| &*self.resources[i as usize])
    }

    /// Finds this server's set, going through the server's slot cache so
    /// the steady state needs no scan.
    fn set_for(&self, vs: &Arc<VirtualServer>) -> Option<&AccelSet> {
        let packed = vs.slot();
        if (packed >> 32) as u32 == self.seq {
            let low = (packed & u64::from(u32::MAX)) as usize;
            if low != 0 {
                return self.sets.get(low - 1);
            }
        }
        let index = self.sets.iter().position(|s| Arc::ptr_eq(&s.vs, vs))?;
        vs.set_slot((u64::from(self.seq) << 32) | (index as u64 + 1));
        Some(&self.sets[index])
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("seq", &self.seq)
            .field("config_id", &self.config_id)
            .field("sets", &self.sets.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// A per-worker cell holding at most one generation reference; all live
/// handles sit on the cache's broadcast list so a rebuild can install
/// the new generation into each.
#[derive(Debug)]
pub struct AccelHandle {
    slot: ArcSwapOption<Generation>,
}

impl AccelHandle {
    pub(crate) fn new(initial: Option<Arc<Generation>>) -> Self {
        Self { slot: ArcSwapOption::new(initial) }
    }

    /// Atomically moves the handle's generation reference out. The
    /// caller owns the returned reference and must eventually
    /// [`put_back`](Self::put_back) it.
    pub fn take(&self) -> Option<Arc<Generation>> {
        self.slot.swap(None)
    }

    /// Returns a taken reference. If a rebuild installed a newer
    /// generation while the reference was out, the returned reference is
    /// simply dropped instead (its refcount falls; the generation dies
    /// with its last holder).
    pub fn put_back(&self, generation: Arc<Generation>) {
        let _previous = self.slot.compare_and_swap(ptr::null::<Generation>(), Some(generation));
    }

    /// Rebuild broadcast: unconditionally replaces whatever the slot
    /// holds with the freshly published generation.
    pub(crate) fn install(&self, generation: Arc<Generation>) {
        self.slot.store(Some(generation));
    }
}
