use super::*;
use bundle_pack::BundlePack;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store backend failed: {0}")]
    Backend(String),
}

/// Persistence of bundles in transit. Implementations are opaque to the
/// core; the core only relies on [`Store::push`] being idempotent per
/// bundle id.
pub trait Store: Send + Sync {
    /// Inserts a pack. Re-inserting an already known bundle id is a no-op.
    fn push(&self, pack: &BundlePack) -> Result<(), StoreError>;

    /// Overwrites the stored state of a known pack.
    fn update(&self, pack: &BundlePack) -> Result<(), StoreError>;

    fn query(&self, id: &str) -> Option<BundlePack>;

    /// Every pack that still holds constraints, i.e. requires processing.
    fn pending(&self) -> Vec<BundlePack>;

    fn knows(&self, id: &str) -> bool;
}

/// An in-memory store, sufficient for tests and volatile nodes.
#[derive(Default)]
pub struct MemoryStore {
    packs: Mutex<HashMap<String, BundlePack>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packs.lock().expect("failed to lock mutex").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn push(&self, pack: &BundlePack) -> Result<(), StoreError> {
        self.packs
            .lock()
            .expect("failed to lock mutex")
            .entry(pack.id())
            .or_insert_with(|| pack.clone());
        Ok(())
    }

    fn update(&self, pack: &BundlePack) -> Result<(), StoreError> {
        self.packs
            .lock()
            .expect("failed to lock mutex")
            .insert(pack.id(), pack.clone());
        Ok(())
    }

    fn query(&self, id: &str) -> Option<BundlePack> {
        self.packs
            .lock()
            .expect("failed to lock mutex")
            .get(id)
            .cloned()
    }

    fn pending(&self) -> Vec<BundlePack> {
        self.packs
            .lock()
            .expect("failed to lock mutex")
            .values()
            .filter(|pack| pack.has_constraints())
            .cloned()
            .collect()
    }

    fn knows(&self, id: &str) -> bool {
        self.packs
            .lock()
            .expect("failed to lock mutex")
            .contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundle_pack::Constraint;
    use bpv7::builder::Builder;

    fn test_pack() -> BundlePack {
        let bundle = Builder::new()
            .source("dtn://src/")
            .destination("dtn://dest/")
            .creation_timestamp(bpv7::CreationTimestamp::new(bpv7::DtnTime::new(1), 0))
            .lifetime("60s")
            .payload_block(b"x".to_vec())
            .build()
            .unwrap();
        BundlePack::new_local(bundle)
    }

    #[test]
    fn test_push_is_idempotent() {
        let store = MemoryStore::new();
        let mut pack = test_pack();
        pack.add_constraint(Constraint::DispatchPending);
        store.push(&pack).unwrap();

        // A second push of the same id must not clobber stored state
        let fresh = test_pack();
        store.push(&fresh).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store
            .query(&pack.id())
            .unwrap()
            .has_constraint(Constraint::DispatchPending));
    }

    #[test]
    fn test_pending_filters_settled_packs() {
        let store = MemoryStore::new();
        let mut pack = test_pack();
        pack.add_constraint(Constraint::ForwardPending);
        store.push(&pack).unwrap();
        assert_eq!(store.pending().len(), 1);

        pack.purge_constraints();
        store.update(&pack).unwrap();
        assert!(store.pending().is_empty());
        assert!(store.knows(&pack.id()));
    }
}
