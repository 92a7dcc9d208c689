//! Volatile in-memory store backend
//!
//! Offers no durability; records vanish with the process. Used by tests
//! and by deployments that accept losing in-flight LRAs on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{ObjectStore, RecordKind, StoreError, StoreResult};

/// In-memory `ObjectStore` backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<(RecordKind, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<(RecordKind, String), Vec<u8>>> {
        // A poisoned lock means a writer panicked mid-update; the map
        // itself is still structurally sound, so keep serving.
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl ObjectStore for MemoryStore {
    fn write(&self, kind: RecordKind, uid: &str, bytes: &[u8]) -> StoreResult<()> {
        self.records().insert((kind, uid.to_string()), bytes.to_vec());
        Ok(())
    }

    fn read(&self, kind: RecordKind, uid: &str) -> StoreResult<Option<Vec<u8>>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(&(kind, uid.to_string())).cloned())
    }

    fn remove(&self, kind: RecordKind, uid: &str) -> StoreResult<()> {
        self.records().remove(&(kind, uid.to_string()));
        Ok(())
    }

    fn list(&self, kind: RecordKind) -> StoreResult<Vec<String>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, uid)| uid.clone())
            .collect())
    }

    fn relocate(&self, from: RecordKind, to: RecordKind, uid: &str) -> StoreResult<()> {
        let mut records = self.records();
        match records.remove(&(from, uid.to_string())) {
            Some(bytes) => {
                records.insert((to, uid.to_string()), bytes);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: from,
                uid: uid.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let store = MemoryStore::new();
        store
            .write(RecordKind::LongRunningAction, "u1", b"payload")
            .unwrap();
        assert_eq!(
            store.read(RecordKind::LongRunningAction, "u1").unwrap(),
            Some(b"payload".to_vec())
        );
        store.remove(RecordKind::LongRunningAction, "u1").unwrap();
        assert_eq!(store.read(RecordKind::LongRunningAction, "u1").unwrap(), None);
        // Removing again is fine
        store.remove(RecordKind::LongRunningAction, "u1").unwrap();
    }

    #[test]
    fn test_kinds_are_disjoint() {
        let store = MemoryStore::new();
        store
            .write(RecordKind::LongRunningAction, "u1", b"live")
            .unwrap();
        assert_eq!(
            store.read(RecordKind::FailedLongRunningAction, "u1").unwrap(),
            None
        );
    }

    #[test]
    fn test_relocate_moves_between_kinds() {
        let store = MemoryStore::new();
        store
            .write(RecordKind::LongRunningAction, "u1", b"payload")
            .unwrap();
        store
            .relocate(
                RecordKind::LongRunningAction,
                RecordKind::FailedLongRunningAction,
                "u1",
            )
            .unwrap();
        assert_eq!(store.read(RecordKind::LongRunningAction, "u1").unwrap(), None);
        assert_eq!(
            store.read(RecordKind::FailedLongRunningAction, "u1").unwrap(),
            Some(b"payload".to_vec())
        );
    }

    #[test]
    fn test_relocate_missing_record_fails() {
        let store = MemoryStore::new();
        let err = store
            .relocate(
                RecordKind::LongRunningAction,
                RecordKind::FailedLongRunningAction,
                "ghost",
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
