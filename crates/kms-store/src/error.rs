//! Error types for the object store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: store={store} key={key}")]
    NotFound { store: &'static str, key: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("poisoned lock in in-memory store")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;
