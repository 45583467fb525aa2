//! Data model for wrapped keys and push subscriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a wrapped key is used for. `AuditUser` covers the UAK, which is
/// persisted the same way a VAPID key is (wrapped under MKEK, addressable
/// by a content-derived id) even though it signs audit entries, not push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Purpose {
    Vapid,
    AuditUser,
}

impl Purpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Vapid => "vapid",
            Purpose::AuditUser => "audit-user",
        }
    }
}

/// The signature algorithm a wrapped key was generated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyAlg {
    EcdsaP256,
    Ed25519,
}

impl KeyAlg {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlg::EcdsaP256 => "ES256",
            KeyAlg::Ed25519 => "Ed25519",
        }
    }
}

/// A private key wrapped (AES-256-GCM) under the Master KEK, as persisted
/// in the `wrapped_keys` store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKey {
    pub kid: String,
    pub purpose: Purpose,
    pub alg: KeyAlg,
    pub key_type: String,
    pub iv: [u8; 12],
    /// AES-GCM ciphertext with the 16-byte tag appended.
    pub ciphertext: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub kms_version: u32,
    /// The public half, stored alongside so callers can fetch it without
    /// unwrapping the private scalar. 65 bytes (SEC1 uncompressed point)
    /// for `EcdsaP256`, 32 bytes for `Ed25519`.
    pub public_raw: Vec<u8>,
    /// Set via `setPushSubscription`; VAPID keys only. Dropped on
    /// `regenerateVAPID` since a new key means a new `kid`.
    #[serde(default)]
    pub subscription: Option<StoredPushSubscription>,
}

/// A public key as handed back to callers (never wrapped, never secret).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyRaw {
    pub kid: String,
    pub raw: Vec<u8>,
}

/// A registered Web Push subscription, validated against the push-service
/// endpoint whitelist before being stored. Attached 1:1 to a VAPID
/// `WrappedKey`; lost on regeneration of that key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPushSubscription {
    pub endpoint: String,
    pub expiration_time: Option<DateTime<Utc>>,
    pub p256dh: Vec<u8>,
    pub auth: Vec<u8>,
    /// Opaque per-recipient identifier quota enforcement buckets by.
    pub eid: String,
    pub created_at: DateTime<Utc>,
}
