//! Facade-level errors: everything that can go wrong wiring up a [`Kms`](crate::Kms)
//! instance, as opposed to the per-request errors `Dispatcher::dispatch` returns.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("store error: {0}")]
    Store(#[from] kms_store::StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("sqlite store path is not valid UTF-8: {0}")]
    InvalidStorePath(PathBuf),
}

pub type Result<T> = std::result::Result<T, KmsError>;
