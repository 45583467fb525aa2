//! Error types for codec operations

use thiserror::Error;

/// Errors that can occur while encoding or decoding KMS wire formats
#[derive(Debug, Error)]
pub enum CodecError {
    /// Base64url input contained characters outside the unpadded alphabet
    #[error("invalid base64url: {0}")]
    InvalidBase64(String),

    /// Hex input had an odd length or non-hex characters
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// DER signature did not match the strict ECDSA encoding this codec accepts
    #[error("invalid DER signature: {0}")]
    InvalidDer(String),

    /// P-1363 signature was not exactly 64 bytes
    #[error("invalid P-1363 signature: expected 64 bytes, got {0}")]
    InvalidP1363Length(usize),

    /// Raw EC point was not a 65-byte uncompressed point starting with 0x04
    #[error("invalid raw P-256 point: {0}")]
    InvalidEcPoint(String),

    /// A value could not be serialized into canonical AAD form
    #[error("AAD canonicalization failed: {0}")]
    Canonicalization(String),
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
