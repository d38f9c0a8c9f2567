use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// The network identifier of each namespace, as last observed in the
/// registry. Shared between the loops that maintain and consume it.
#[derive(Clone, Debug, Default)]
pub struct VnidMap(Arc<RwLock<HashMap<String, u32>>>);

// === impl VnidMap ===

impl VnidMap {
    pub fn get(&self, namespace: &str) -> Option<u32> {
        self.0.read().get(namespace).copied()
    }

    pub fn insert(&self, namespace: impl Into<String>, net_id: u32) -> Option<u32> {
        self.0.write().insert(namespace.into(), net_id)
    }

    pub fn remove(&self, namespace: &str) -> Option<u32> {
        self.0.write().remove(namespace)
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}
