//! Error types for Master Secret enrollment, unlock, and rewrap.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum MasterSecretError {
    #[error("passphrase must be at least 12 characters")]
    WeakPassphrase,

    #[error("the KMS already has at least one enrollment")]
    AlreadySetup,

    #[error("the KMS has no enrollments")]
    NotSetup,

    #[error("credentials did not match any enrollment")]
    BadCredentials,

    #[error("key-check value mismatch")]
    KcvMismatch,

    #[error("master secret decryption failed authentication")]
    MsAuthFailed,

    #[error("no unlocked master secret available")]
    NotUnlocked,

    #[error("cannot remove the last remaining enrollment")]
    LastEnrollment,

    #[error("WebAuthn PRF extension unavailable for this credential")]
    PrfUnavailable,

    #[error("passkey-gate pepper custody is not implemented by this deployment")]
    GateCustodyNotImplemented,

    #[error("enrollment not found")]
    EnrollmentNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    MasterSecret(#[from] MasterSecretError),

    #[error("codec error: {0}")]
    Codec(#[from] kms_codec::CodecError),

    #[error("kdf error: {0}")]
    Kdf(#[from] kms_kdf::KdfError),

    #[error("store error: {0}")]
    Store(#[from] kms_store::StoreError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
