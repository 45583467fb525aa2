//! The `ObjectStore` abstraction every backend implements.

use crate::error::Result;
use crate::model::LogicalStore;

/// A single secondary-index entry attached to a record at `put` time.
pub type IndexEntry<'a> = (&'a str, &'a str);

/// Key/value object store with per-record secondary indexes and
/// whole-database reset, backing the four logical stores.
///
/// Every method takes and returns opaque bytes — callers (kms-keys,
/// kms-master-secret, kms-audit, kms-lease) own serialization so this
/// crate never depends on their types.
pub trait ObjectStore: Send + Sync {
    /// Fetch a record by primary key.
    fn get(&self, store: LogicalStore, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a record, indexed by the given secondary index
    /// pairs (e.g. `[("method", "passphrase")]` for an enrollment record).
    fn put(&self, store: LogicalStore, key: &str, value: &[u8], indexed_by: &[IndexEntry<'_>]) -> Result<()>;

    /// Remove a record by primary key. No error if absent.
    fn delete(&self, store: LogicalStore, key: &str) -> Result<()>;

    /// Return every record whose secondary index `index_name` was given
    /// the value `index_value` at `put` time.
    fn scan_by_index(&self, store: LogicalStore, index_name: &str, index_value: &str) -> Result<Vec<Vec<u8>>>;

    /// Return every record currently in the given logical store.
    fn scan_all(&self, store: LogicalStore) -> Result<Vec<Vec<u8>>>;

    /// Run `f` against a store reference that commits atomically: either
    /// every `put`/`delete` inside `f` lands, or none do. Backs the "one
    /// logical transaction per RPC" requirement for multi-record writes
    /// like MS rewrap (new Pbkdf2Params + re-encrypted MS together) and
    /// audit append (entry + counter advance together).
    fn transaction(&self, f: &mut dyn FnMut(&dyn ObjectStore) -> Result<()>) -> Result<()>;

    /// Destroy every logical store. Backs `resetKMS`.
    fn reset_all(&self) -> Result<()>;
}
