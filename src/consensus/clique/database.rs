//! Storage seam for authority snapshots.
//!
//! The engine only needs a hash-keyed map of persisted snapshots; production
//! plugs the node's key-value store in behind [`SnapshotDatabase`], tests
//! run on the in-memory implementation.

use super::{CliqueError, Snapshot};
use alloy_primitives::B256;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Hash-keyed store of persisted authority snapshots.
///
/// Failures surface as [`CliqueError::SnapshotStore`] and abort whatever
/// snapshot walk triggered the access.
pub trait SnapshotDatabase: Send + Sync {
    /// Fetch the snapshot anchored at `hash`, if one was persisted.
    fn get(&self, hash: B256) -> Result<Option<Snapshot>, CliqueError>;

    /// Persist `snapshot` under its own block hash.
    fn insert(&self, snapshot: &Snapshot) -> Result<(), CliqueError>;

    /// Drop the snapshot anchored at `hash`.
    fn remove(&self, hash: B256) -> Result<(), CliqueError>;

    /// Whether a snapshot is persisted under `hash`.
    fn contains(&self, hash: B256) -> Result<bool, CliqueError>;
}

/// In-memory snapshot store.
#[derive(Debug, Default)]
pub struct MemorySnapshotDatabase {
    snapshots: RwLock<HashMap<B256, Snapshot>>,
}

impl MemorySnapshotDatabase {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store behind an `Arc`, ready to share with an engine.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of snapshots held.
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Whether the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }

    /// Drop every snapshot.
    pub fn clear(&self) {
        self.snapshots.write().clear();
    }
}

impl SnapshotDatabase for MemorySnapshotDatabase {
    fn get(&self, hash: B256) -> Result<Option<Snapshot>, CliqueError> {
        Ok(self.snapshots.read().get(&hash).cloned())
    }

    fn insert(&self, snapshot: &Snapshot) -> Result<(), CliqueError> {
        self.snapshots
            .write()
            .insert(snapshot.hash, snapshot.clone());
        Ok(())
    }

    fn remove(&self, hash: B256) -> Result<(), CliqueError> {
        self.snapshots.write().remove(&hash);
        Ok(())
    }

    fn contains(&self, hash: B256) -> Result<bool, CliqueError> {
        Ok(self.snapshots.read().contains_key(&hash))
    }
}

/// Store that forgets everything, for callers that cache snapshots
/// elsewhere or accept re-deriving them from headers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSnapshotDatabase;

impl SnapshotDatabase for NoopSnapshotDatabase {
    fn get(&self, _hash: B256) -> Result<Option<Snapshot>, CliqueError> {
        Ok(None)
    }

    fn insert(&self, _snapshot: &Snapshot) -> Result<(), CliqueError> {
        Ok(())
    }

    fn remove(&self, _hash: B256) -> Result<(), CliqueError> {
        Ok(())
    }

    fn contains(&self, _hash: B256) -> Result<bool, CliqueError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::clique::CliqueConfig;
    use alloy_primitives::Address;

    #[test]
    fn test_memory_store_roundtrip() {
        let db = MemorySnapshotDatabase::new();

        let signers = vec![Address::repeat_byte(0x01), Address::repeat_byte(0x02)];
        let snapshot = Snapshot::new(
            CliqueConfig::default(),
            100,
            B256::repeat_byte(0xaa),
            signers,
        );

        db.insert(&snapshot).unwrap();
        assert_eq!(db.len(), 1);

        let fetched = db.get(snapshot.hash).unwrap().unwrap();
        assert_eq!(fetched.number, 100);
        assert_eq!(fetched.hash, B256::repeat_byte(0xaa));
        assert_eq!(fetched.signer_count(), 2);

        assert!(db.contains(snapshot.hash).unwrap());
        assert!(!db.contains(B256::ZERO).unwrap());

        db.remove(snapshot.hash).unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn test_noop_store_forgets() {
        let db = NoopSnapshotDatabase;
        let snapshot = Snapshot::new(CliqueConfig::default(), 0, B256::ZERO, vec![]);

        db.insert(&snapshot).unwrap();
        assert!(!db.contains(B256::ZERO).unwrap());
        assert!(db.get(B256::ZERO).unwrap().is_none());
    }
}
