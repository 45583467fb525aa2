//! PBKDF2 calibration and HKDF derivation chains.
//!
//! Everything a passphrase/passkey enrollment needs to turn a secret a user
//! holds (a password, a WebAuthn PRF output) or a secret the KMS already
//! holds (the Master Secret) into a key material it can wrap/unwrap with.

pub mod error;
pub mod hkdf;
pub mod pbkdf2;

pub use error::{KdfError, Result};
pub use hkdf::{derive_mkek, derive_ms_wrapping_key, derive_session_kek, hkdf_sha256};
pub use pbkdf2::{calibrate, calibrate_default, derive_kek as derive_kek_pbkdf2, needs_recalibration, Pbkdf2Params, MAX_ITERATIONS, MIN_ITERATIONS};
