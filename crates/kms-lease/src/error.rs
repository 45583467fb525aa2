//! Error types for lease creation, JWT issuance, and quota enforcement.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum LeaseError {
    #[error("lease TTL must be between 1 and 720 hours")]
    TtlOutOfRange,

    #[error("lease {0} not found")]
    NotFound(String),

    #[error("lease {0} is not active ({1})")]
    Invalid(String, &'static str),

    #[error("lease's kid no longer matches the current VAPID key")]
    KeyRotated,

    #[error("quota exceeded: {0}")]
    QuotaExceeded(&'static str),

    #[error("jti {0} replayed within the sliding window")]
    ReplayDetected(String),

    #[error("invalid JWT payload: {0}")]
    InvalidPayload(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("codec error: {0}")]
    Codec(#[from] kms_codec::CodecError),

    #[error("kdf error: {0}")]
    Kdf(#[from] kms_kdf::KdfError),

    #[error("keys error: {0}")]
    Keys(#[from] kms_keys::KeysError),

    #[error("audit error: {0}")]
    Audit(#[from] kms_audit::AuditError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("signature error")]
    Signature,
}
