//! AES-256-GCM key wrapping under the Master KEK.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use kms_codec::aad::Canonical;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{KeysError, Result};
use crate::model::{KeyAlg, Purpose, WrappedKey};

const KEY_TYPE_PRIVATE: &str = "private";
const KMS_VERSION: u32 = 2;

fn build_aad(kid: &str, alg: KeyAlg, purpose: Purpose, created_at: DateTime<Utc>) -> Result<Vec<u8>> {
    let bytes = Canonical::new()
        .field("kmsVersion", KMS_VERSION as u64)
        .field("kid", kid)
        .field("alg", alg.as_str())
        .field("purpose", purpose.as_str())
        .field("createdAt", created_at.timestamp() as u64)
        .field("keyType", KEY_TYPE_PRIVATE)
        .build()?;
    Ok(bytes)
}

/// Wrap a private key's raw bytes under the Master KEK.
pub fn wrap_private_key(
    mkek: &[u8; 32],
    plaintext_key: &[u8],
    kid: &str,
    purpose: Purpose,
    alg: KeyAlg,
    created_at: DateTime<Utc>,
    public_raw: Vec<u8>,
) -> Result<WrappedKey> {
    let cipher = Aes256Gcm::new_from_slice(mkek).map_err(|_| KeysError::KeyGeneration)?;
    let mut iv = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);
    let aad = build_aad(kid, alg, purpose, created_at)?;

    let ciphertext = cipher
        .encrypt(nonce, aes_gcm::aead::Payload { msg: plaintext_key, aad: &aad })
        .map_err(|_| KeysError::UnwrapFailed { kid: kid.to_string() })?;

    Ok(WrappedKey {
        kid: kid.to_string(),
        purpose,
        alg,
        key_type: KEY_TYPE_PRIVATE.to_string(),
        iv,
        ciphertext,
        created_at,
        kms_version: KMS_VERSION,
        public_raw,
        subscription: None,
    })
}

/// Unwrap a private key. Returns a zeroizing buffer; callers must never let
/// the plaintext cross into an RPC response.
pub fn unwrap_private_key(mkek: &[u8; 32], wrapped: &WrappedKey) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new_from_slice(mkek).map_err(|_| KeysError::KeyGeneration)?;
    let nonce = Nonce::from_slice(&wrapped.iv);
    let aad = build_aad(&wrapped.kid, wrapped.alg, wrapped.purpose, wrapped.created_at)?;

    let plaintext = cipher
        .decrypt(nonce, aes_gcm::aead::Payload { msg: &wrapped.ciphertext, aad: &aad })
        .map_err(|_| KeysError::UnwrapFailed { kid: wrapped.kid.clone() })?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkek() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let key = mkek();
        let plaintext = b"a 32-byte ECDSA private key.....";
        let wrapped = wrap_private_key(&key, plaintext, "kid-1", Purpose::Vapid, KeyAlg::EcdsaP256, Utc::now(), vec![4u8; 65]).unwrap();
        let unwrapped = unwrap_private_key(&key, &wrapped).unwrap();
        assert_eq!(&*unwrapped, plaintext);
    }

    #[test]
    fn unwrap_rejects_wrong_mkek() {
        let plaintext = b"secret-key-bytes";
        let wrapped = wrap_private_key(&mkek(), plaintext, "kid-1", Purpose::Vapid, KeyAlg::EcdsaP256, Utc::now(), vec![4u8; 65]).unwrap();
        let wrong_key = [9u8; 32];
        assert!(unwrap_private_key(&wrong_key, &wrapped).is_err());
    }

    #[test]
    fn unwrap_rejects_tampered_ciphertext() {
        let plaintext = b"secret-key-bytes";
        let mut wrapped = wrap_private_key(&mkek(), plaintext, "kid-1", Purpose::Vapid, KeyAlg::EcdsaP256, Utc::now(), vec![4u8; 65]).unwrap();
        wrapped.ciphertext[0] ^= 0xFF;
        assert!(unwrap_private_key(&mkek(), &wrapped).is_err());
    }

    #[test]
    fn unwrap_rejects_tampered_aad_field() {
        let plaintext = b"secret-key-bytes";
        let wrapped = wrap_private_key(&mkek(), plaintext, "kid-1", Purpose::Vapid, KeyAlg::EcdsaP256, Utc::now(), vec![4u8; 65]).unwrap();
        let mut tampered = wrapped.clone();
        tampered.kid = "kid-2".to_string();
        assert!(unwrap_private_key(&mkek(), &tampered).is_err());
    }

    #[test]
    fn each_wrap_uses_a_fresh_iv() {
        let plaintext = b"secret-key-bytes";
        let a = wrap_private_key(&mkek(), plaintext, "kid-1", Purpose::Vapid, KeyAlg::EcdsaP256, Utc::now(), vec![4u8; 65]).unwrap();
        let b = wrap_private_key(&mkek(), plaintext, "kid-1", Purpose::Vapid, KeyAlg::EcdsaP256, Utc::now(), vec![4u8; 65]).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
