//! VAPID (ECDSA P-256) key generation and rotation.

use chrono::{DateTime, Utc};
use ecdsa::signature::Signer as _;
use kms_codec::{jwk_thumbprint, raw_p256_to_jwk};
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

use crate::error::{KeysError, Result};
use crate::model::{KeyAlg, Purpose, PublicKeyRaw, WrappedKey};
use crate::wrap::wrap_private_key;

/// Generate a fresh VAPID signing key, wrap it under the Master KEK, and
/// derive its `kid` from the RFC 7638 thumbprint of its public JWK.
pub fn generate_vapid(mkek: &[u8; 32], created_at: DateTime<Utc>) -> Result<(WrappedKey, PublicKeyRaw)> {
    let signing_key = SigningKey::random(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    let encoded_point = verifying_key.to_encoded_point(false);
    let raw_arr: [u8; 65] = encoded_point.as_bytes().try_into().map_err(|_| KeysError::KeyGeneration)?;
    let raw = raw_arr.to_vec();

    let jwk = raw_p256_to_jwk(&raw_arr)?;
    let kid = jwk_thumbprint(&jwk);

    let wrapped = wrap_private_key(
        mkek,
        signing_key.to_bytes().as_slice(),
        &kid,
        Purpose::Vapid,
        KeyAlg::EcdsaP256,
        created_at,
        raw.clone(),
    )?;

    Ok((wrapped, PublicKeyRaw { kid, raw }))
}

/// Rotate a VAPID key: generate a fresh one. Callers (the facade) persist
/// the new `WrappedKey`, invalidate leases whose `kid` equals the prior
/// one, and append an audit entry for `op="regenerateVAPID"`; this
/// function only does the atomic part this crate owns — key generation.
pub fn regenerate_vapid(mkek: &[u8; 32], created_at: DateTime<Utc>) -> Result<(WrappedKey, PublicKeyRaw)> {
    generate_vapid(mkek, created_at)
}

/// Sign a payload with an unwrapped VAPID private key, as used when
/// issuing a lease's JWT.
pub fn sign_with_vapid_key(private_key_bytes: &[u8], payload: &[u8]) -> Result<Signature> {
    let signing_key = SigningKey::from_slice(private_key_bytes).map_err(|_| KeysError::KeyGeneration)?;
    Ok(signing_key.sign(payload))
}
