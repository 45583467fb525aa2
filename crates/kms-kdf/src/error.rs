//! Error types for key-derivation operations

use thiserror::Error;

/// Errors that can occur while deriving or calibrating key material
#[derive(Debug, Error)]
pub enum KdfError {
    /// HKDF's expand step was asked for more output than SHA-256 HKDF allows
    /// (255 * 32 bytes); this should never happen for the fixed-size keys
    /// this KMS derives, so seeing it indicates a programming error.
    #[error("HKDF expand failed: requested length {0} is not achievable")]
    HkdfExpand(usize),
}

/// Result type for key-derivation operations
pub type Result<T> = std::result::Result<T, KdfError>;
