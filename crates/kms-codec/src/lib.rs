//! Wire codecs and canonical encoding shared by every other KMS crate.
//!
//! This is the one crate with no in-workspace dependencies: base64url/hex,
//! DER<->P-1363 ECDSA signature conversion, raw-P-256<->JWK, RFC 7638
//! thumbprints, canonical AAD/signed-payload construction, constant-time
//! comparison, and the `Clock` time source all live here so every other
//! crate binds bytes, time, and JSON the same way.

pub mod aad;
pub mod base64url;
pub mod clock;
pub mod ct;
pub mod ecdsa_codec;
pub mod error;
pub mod hex_codec;

pub use aad::{Canonical, Field};
pub use clock::{Clock, FixedClock, SystemClock};
pub use ct::ct_eq;
pub use ecdsa_codec::{der_to_p1363, jwk_thumbprint, p1363_to_der, raw_p256_to_jwk, Jwk};
pub use error::{CodecError, Result};
