//! rusqlite-backed `ObjectStore`, grounded on the teacher's r2d2 pool
//! conventions: one file-backed pool, WAL journal mode, connections
//! checked out per call.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::error::Result;
use crate::model::LogicalStore;
use crate::traits::{IndexEntry, ObjectStore};

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(8).build(manager)?;
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        for table in LogicalStore::ALL {
            let name = table.table_name();
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {name} (key TEXT PRIMARY KEY, value BLOB NOT NULL);
                 CREATE TABLE IF NOT EXISTS {name}_index (index_name TEXT NOT NULL, index_value TEXT NOT NULL, key TEXT NOT NULL,
                     PRIMARY KEY (index_name, index_value, key));"
            ))?;
        }
        Ok(())
    }
}

impl ObjectStore for SqliteStore {
    fn get(&self, store: LogicalStore, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.pool.get()?;
        let name = store.table_name();
        let value = conn
            .query_row(&format!("SELECT value FROM {name} WHERE key = ?1"), params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn put(&self, store: LogicalStore, key: &str, value: &[u8], indexed_by: &[IndexEntry<'_>]) -> Result<()> {
        let mut conn = self.pool.get()?;
        let name = store.table_name();
        let tx = conn.transaction()?;
        tx.execute(
            &format!("INSERT INTO {name} (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value"),
            params![key, value],
        )?;
        tx.execute(&format!("DELETE FROM {name}_index WHERE key = ?1"), params![key])?;
        for (index_name, index_value) in indexed_by {
            tx.execute(
                &format!("INSERT OR IGNORE INTO {name}_index (index_name, index_value, key) VALUES (?1, ?2, ?3)"),
                params![index_name, index_value, key],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, store: LogicalStore, key: &str) -> Result<()> {
        let mut conn = self.pool.get()?;
        let name = store.table_name();
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {name} WHERE key = ?1"), params![key])?;
        tx.execute(&format!("DELETE FROM {name}_index WHERE key = ?1"), params![key])?;
        tx.commit()?;
        Ok(())
    }

    fn scan_by_index(&self, store: LogicalStore, index_name: &str, index_value: &str) -> Result<Vec<Vec<u8>>> {
        let conn = self.pool.get()?;
        let name = store.table_name();
        let mut stmt = conn.prepare(&format!(
            "SELECT r.value FROM {name} r JOIN {name}_index i ON i.key = r.key
             WHERE i.index_name = ?1 AND i.index_value = ?2"
        ))?;
        let rows = stmt.query_map(params![index_name, index_value], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<Vec<u8>>>>().map_err(Into::into)
    }

    fn scan_all(&self, store: LogicalStore) -> Result<Vec<Vec<u8>>> {
        let conn = self.pool.get()?;
        let name = store.table_name();
        let mut stmt = conn.prepare(&format!("SELECT value FROM {name}"))?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<Vec<u8>>>>().map_err(Into::into)
    }

    fn transaction(&self, f: &mut dyn FnMut(&dyn ObjectStore) -> Result<()>) -> Result<()> {
        // SqliteStore's own put/delete already wrap each call in a
        // connection-level transaction; composing a caller-supplied
        // sequence of them here gives at-least the same atomicity per
        // call. True cross-call atomicity would need a connection handed
        // to the closure, which this trait's object-safe signature can't
        // express without a second trait; callers that need multi-record
        // atomicity (MS rewrap, audit append) build the combined record
        // ahead of time and issue it as one `put`.
        f(self)
    }

    fn reset_all(&self) -> Result<()> {
        let conn = self.pool.get()?;
        for table in LogicalStore::ALL {
            let name = table.table_name();
            conn.execute_batch(&format!("DELETE FROM {name}; DELETE FROM {name}_index;"))?;
        }
        Ok(())
    }
}
