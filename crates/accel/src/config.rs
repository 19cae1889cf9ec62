//! Configuration snapshots and virtual servers.
//!
//! The server's configuration is an immutable snapshot with a stable
//! integer id, republished whole on every reconfiguration. Accelerator
//! data is tagged with the id of the configuration it was built under
//! and is only dereferenced while a configuration with that id is
//! current; the rebuild cycle discards data tagged with any other id.

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One virtual server. Carries an opaque accelerator slot caching which
/// per-generation set belongs to this server, so the per-request lookup
/// needs no hash once warmed.
#[derive(Debug)]
pub struct VirtualServer {
    name: Box<str>,
    accel_slot: AtomicU64,
}

impl VirtualServer {
    pub fn new(name: impl Into<Box<str>>) -> Arc<Self> {
        Arc::new(Self { name: name.into(), accel_slot: AtomicU64::new(0) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn slot(&self) -> u64 {
        self.accel_slot.load(Ordering::Acquire)
    }

    pub(crate) fn set_slot(&self, packed: u64) {
        self.accel_slot.store(packed, Ordering::Release);
    }
}

/// An immutable configuration snapshot: a stable id plus the virtual
/// servers defined by it.
#[derive(Debug)]
pub struct Configuration {
    id: u64,
    virtual_servers: Vec<Arc<VirtualServer>>,
}

impl Configuration {
    pub fn new(id: u64, virtual_servers: Vec<Arc<VirtualServer>>) -> Arc<Self> {
        Arc::new(Self { id, virtual_servers })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn virtual_servers(&self) -> &[Arc<VirtualServer>] {
        &self.virtual_servers
    }

    pub fn virtual_server(&self, name: &str) -> Option<&Arc<VirtualServer>> {
        self.virtual_servers.iter().find(|vs| vs.name() == name)
    }
}

/// Lock-free registry of the current configuration.
///
/// Readers take a cheap snapshot reference and hold it for exactly as
/// long as they dereference anything tagged with its id.
#[derive(Debug)]
pub struct ConfigRegistry {
    current: ArcSwap<Configuration>,
}

impl ConfigRegistry {
    pub fn new(initial: Arc<Configuration>) -> Arc<Self> {
        Arc::new(Self { current: ArcSwap::new(initial) })
    }

    pub fn current(&self) -> Arc<Configuration> {
        self.current.load_full()
    }

    /// Installs a new configuration snapshot. The id must differ from
    /// the previous one for staleness detection to work; ids are chosen
    /// by the caller (typically monotonic).
    pub fn install(&self, configuration: Arc<Configuration>) {
        self.current.store(configuration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_swaps_snapshots() {
        let vs = VirtualServer::new("default");
        let registry = ConfigRegistry::new(Configuration::new(1, vec![Arc::clone(&vs)]));
        assert_eq!(registry.current().id(), 1);
        assert!(registry.current().virtual_server("default").is_some());

        registry.install(Configuration::new(2, vec![]));
        assert_eq!(registry.current().id(), 2);
        assert!(registry.current().virtual_server("default").is_none());
    }

    #[test]
    fn slot_roundtrip() {
        let vs = VirtualServer::new("a");
        assert_eq!(vs.slot(), 0);
        vs.set_slot((7 << 32) | 3);
        assert_eq!(vs.slot(), (7 << 32) | 3);
    }
}
