//! Ed25519 signer helpers and UAK rotation state.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer as Ed25519Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

/// Generate a fresh Ed25519 keypair, used for UAK/LAK/KIAK creation.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn verifying_key_bytes(key: &SigningKey) -> [u8; 32] {
    key.verifying_key().to_bytes()
}

pub fn sign(key: &SigningKey, payload: &[u8]) -> [u8; 64] {
    key.sign(payload).to_bytes()
}

pub fn verify(pubkey: &[u8; 32], payload: &[u8], sig: &[u8; 64]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(pubkey) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(sig);
    verifying_key.verify(payload, &signature).is_ok()
}

/// Tracks the active UAK plus, during a rotation overlap window, the
/// just-retired UAK whose signatures are still accepted.
pub struct UakRotationState {
    pub current: SigningKey,
    pub previous: Option<(VerifyingKey, DateTime<Utc>)>,
}

impl UakRotationState {
    pub fn new(current: SigningKey) -> Self {
        Self { current, previous: None }
    }

    /// Rotate to `new_uak`; signatures from the outgoing key remain
    /// acceptable (as `sig`, alongside `sigNew` from the new key) until
    /// `now + overlap`.
    pub fn rotate(&mut self, new_uak: SigningKey, overlap_seconds: i64, now: DateTime<Utc>) {
        let outgoing = std::mem::replace(&mut self.current, new_uak);
        self.previous = Some((outgoing.verifying_key(), now + chrono::Duration::seconds(overlap_seconds)));
    }

    pub fn in_overlap(&self, now: DateTime<Utc>) -> bool {
        self.previous.as_ref().map(|(_, deadline)| now <= *deadline).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let key = generate_signing_key();
        let sig = sign(&key, b"payload");
        assert!(verify(&verifying_key_bytes(&key), b"payload", &sig));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let key = generate_signing_key();
        let sig = sign(&key, b"payload");
        assert!(!verify(&verifying_key_bytes(&key), b"tampered", &sig));
    }

    #[test]
    fn rotation_tracks_overlap_window() {
        let mut state = UakRotationState::new(generate_signing_key());
        let now = Utc::now();
        state.rotate(generate_signing_key(), 3600, now);
        assert!(state.in_overlap(now));
        assert!(!state.in_overlap(now + chrono::Duration::hours(2)));
    }
}
