//! Error types for the audit chain.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("LAK/KIAK entry requires a delegation cert")]
    MissingCert,

    #[error("delegation cert does not cover op {op} at the entry's timestamp")]
    CertDoesNotCover { op: String },

    #[error("delegation cert's delegatePub does not match signerId")]
    SignerIdMismatch,

    #[error("audit chain broken at seqNum {first_bad_seq}")]
    ChainBroken { first_bad_seq: u64 },

    #[error("codec error: {0}")]
    Codec(#[from] kms_codec::CodecError),

    #[error("store error: {0}")]
    Store(#[from] kms_store::StoreError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
