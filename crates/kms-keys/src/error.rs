//! Error types for key wrapping and VAPID key management.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeysError {
    #[error("AEAD authentication failed while unwrapping key {kid}")]
    UnwrapFailed { kid: String },

    #[error("no key found for kid {0}")]
    KeyNotFound(String),

    #[error("push subscription endpoint not allowed: {0}")]
    EndpointNotAllowed(String),

    #[error("malformed push subscription endpoint: {0}")]
    MalformedEndpoint(String),

    #[error("codec error: {0}")]
    Codec(#[from] kms_codec::CodecError),

    #[error("store error: {0}")]
    Store(#[from] kms_store::StoreError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("ECDSA key generation failed")]
    KeyGeneration,
}

pub type Result<T> = std::result::Result<T, KeysError>;
