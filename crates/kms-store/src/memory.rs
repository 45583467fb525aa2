//! BTreeMap-backed `ObjectStore`, used in tests and for the browser-embedded
//! ephemeral deployment mode that never touches disk.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::model::LogicalStore;
use crate::traits::{IndexEntry, ObjectStore};

#[derive(Default)]
struct Table {
    records: BTreeMap<String, Vec<u8>>,
    /// index_name -> index_value -> set of primary keys
    indexes: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<BTreeMap<&'static str, Table>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<R>(&self, store: LogicalStore, f: impl FnOnce(&mut Table) -> R) -> Result<R> {
        let mut guard = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        let table = guard.entry(store.table_name()).or_default();
        Ok(f(table))
    }
}

impl ObjectStore for InMemoryStore {
    fn get(&self, store: LogicalStore, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_table(store, |t| t.records.get(key).cloned())
    }

    fn put(&self, store: LogicalStore, key: &str, value: &[u8], indexed_by: &[IndexEntry<'_>]) -> Result<()> {
        self.with_table(store, |t| {
            t.records.insert(key.to_string(), value.to_vec());
            for (name, val) in indexed_by {
                let index = t.indexes.entry(name.to_string()).or_default();
                let keys = index.entry(val.to_string()).or_default();
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
            }
        })
    }

    fn delete(&self, store: LogicalStore, key: &str) -> Result<()> {
        self.with_table(store, |t| {
            t.records.remove(key);
            for index in t.indexes.values_mut() {
                for keys in index.values_mut() {
                    keys.retain(|k| k != key);
                }
            }
        })
    }

    fn scan_by_index(&self, store: LogicalStore, index_name: &str, index_value: &str) -> Result<Vec<Vec<u8>>> {
        self.with_table(store, |t| {
            let Some(index) = t.indexes.get(index_name) else {
                return Vec::new();
            };
            let Some(keys) = index.get(index_value) else {
                return Vec::new();
            };
            keys.iter().filter_map(|k| t.records.get(k).cloned()).collect()
        })
    }

    fn scan_all(&self, store: LogicalStore) -> Result<Vec<Vec<u8>>> {
        self.with_table(store, |t| t.records.values().cloned().collect())
    }

    fn transaction(&self, f: &mut dyn FnMut(&dyn ObjectStore) -> Result<()>) -> Result<()> {
        // The in-memory store has no partial-write modes to unwind; a single
        // mutex serializes all access so no other caller observes a
        // half-applied sequence of puts.
        f(self)
    }

    fn reset_all(&self) -> Result<()> {
        let mut guard = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        guard.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_roundtrip() {
        let store = InMemoryStore::new();
        store.put(LogicalStore::Enrollments, "k1", b"value", &[]).unwrap();
        assert_eq!(store.get(LogicalStore::Enrollments, "k1").unwrap(), Some(b"value".to_vec()));
        store.delete(LogicalStore::Enrollments, "k1").unwrap();
        assert_eq!(store.get(LogicalStore::Enrollments, "k1").unwrap(), None);
    }

    #[test]
    fn scan_by_index_finds_matching_records() {
        let store = InMemoryStore::new();
        store
            .put(LogicalStore::Enrollments, "e1", b"passphrase-record", &[("method", "passphrase")])
            .unwrap();
        store
            .put(LogicalStore::Enrollments, "e2", b"passkey-record", &[("method", "passkeyPrf")])
            .unwrap();

        let matches = store.scan_by_index(LogicalStore::Enrollments, "method", "passphrase").unwrap();
        assert_eq!(matches, vec![b"passphrase-record".to_vec()]);
    }

    #[test]
    fn delete_removes_from_index() {
        let store = InMemoryStore::new();
        store
            .put(LogicalStore::WrappedKeys, "w1", b"key", &[("purpose", "vapid")])
            .unwrap();
        store.delete(LogicalStore::WrappedKeys, "w1").unwrap();
        let matches = store.scan_by_index(LogicalStore::WrappedKeys, "purpose", "vapid").unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn reset_all_clears_every_logical_store() {
        let store = InMemoryStore::new();
        store.put(LogicalStore::Enrollments, "e1", b"x", &[]).unwrap();
        store.put(LogicalStore::Counters, "c", b"y", &[]).unwrap();
        store.reset_all().unwrap();
        assert_eq!(store.scan_all(LogicalStore::Enrollments).unwrap(), Vec::<Vec<u8>>::new());
        assert_eq!(store.scan_all(LogicalStore::Counters).unwrap(), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn put_overwrites_existing_key() {
        let store = InMemoryStore::new();
        store.put(LogicalStore::AuditEntries, "1", b"first", &[]).unwrap();
        store.put(LogicalStore::AuditEntries, "1", b"second", &[]).unwrap();
        assert_eq!(store.get(LogicalStore::AuditEntries, "1").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn stores_are_isolated_by_logical_name() {
        let store = InMemoryStore::new();
        store.put(LogicalStore::Enrollments, "shared-key", b"enrollment", &[]).unwrap();
        store.put(LogicalStore::WrappedKeys, "shared-key", b"wrapped", &[]).unwrap();
        assert_eq!(store.get(LogicalStore::Enrollments, "shared-key").unwrap(), Some(b"enrollment".to_vec()));
        assert_eq!(store.get(LogicalStore::WrappedKeys, "shared-key").unwrap(), Some(b"wrapped".to_vec()));
    }
}
