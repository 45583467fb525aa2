//! Error types for the unlock-context manager.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum UnlockError {
    #[error("no active unlock context for user {0}")]
    NotUnlocked(String),

    #[error("unlock context for user {0} has expired")]
    Expired(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Unlock(#[from] UnlockError),

    #[error("master secret error: {0}")]
    MasterSecret(#[from] kms_master_secret::Error),

    #[error("keys error: {0}")]
    Keys(#[from] kms_keys::KeysError),

    #[error("kdf error: {0}")]
    Kdf(#[from] kms_kdf::KdfError),
}
