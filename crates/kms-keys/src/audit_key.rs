//! UAK (user audit key) generation and storage. Persisted the same way a
//! VAPID key is — wrapped under the Master KEK, addressable by `kid` — but
//! signs audit entries instead of push JWTs.

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use kms_codec::base64url;

use crate::error::{KeysError, Result};
use crate::model::{KeyAlg, Purpose, WrappedKey};
use crate::wrap::{unwrap_private_key, wrap_private_key};

/// Generate a fresh UAK, wrap it under MKEK. `kid` is the base64url
/// encoding of the public key, since UAK has no JWK thumbprint convention
/// to borrow (it is never exported as a JWK).
pub fn generate_uak(mkek: &[u8; 32], created_at: DateTime<Utc>) -> Result<(WrappedKey, SigningKey)> {
    let signing_key = SigningKey::generate(&mut rand_core::OsRng);
    let public = signing_key.verifying_key().to_bytes();
    let kid = base64url::encode(public);

    let wrapped = wrap_private_key(mkek, signing_key.to_bytes().as_slice(), &kid, Purpose::AuditUser, KeyAlg::Ed25519, created_at, public.to_vec())?;

    Ok((wrapped, signing_key))
}

/// Unwrap a persisted UAK back into a usable signing key.
pub fn load_uak(mkek: &[u8; 32], wrapped: &WrappedKey) -> Result<SigningKey> {
    let plaintext = unwrap_private_key(mkek, wrapped)?;
    let bytes: [u8; 32] = plaintext.as_slice().try_into().map_err(|_| KeysError::KeyGeneration)?;
    Ok(SigningKey::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_uak_round_trips_through_wrap() {
        let mkek = [3u8; 32];
        let (wrapped, original) = generate_uak(&mkek, Utc::now()).unwrap();
        let loaded = load_uak(&mkek, &wrapped).unwrap();
        assert_eq!(loaded.verifying_key(), original.verifying_key());
    }

    #[test]
    fn kid_matches_base64url_of_public_key() {
        let mkek = [4u8; 32];
        let (wrapped, original) = generate_uak(&mkek, Utc::now()).unwrap();
        assert_eq!(wrapped.kid, base64url::encode(original.verifying_key().to_bytes()));
    }
}
