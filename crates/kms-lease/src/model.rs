//! Lease data model: records, quota configuration, and JWT payload shape.

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use kms_audit::AuditDelegationCert;
use kms_keys::{StoredPushSubscription, WrappedKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const MAX_TTL_HOURS: u32 = 720;

/// A lease's place in its state machine. All but `Active` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Active,
    Expired,
    Revoked,
    /// The bound `kid` was rotated out from under this lease; semantically
    /// an expiry, kept distinct so `verifyLease` can report `"wrong-key"`.
    Orphaned,
}

/// Per-lease rate limits, supplied by the caller at `createLease` time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub tokens_per_hour: u32,
    pub sends_per_minute: u32,
    pub burst_sends: u32,
    pub sends_per_minute_per_eid: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { tokens_per_hour: 100, sends_per_minute: 10, burst_sends: 20, sends_per_minute_per_eid: 5 }
    }
}

/// An in-memory-only lease: its SessionKEK-wrapped VAPID key, LAK signing
/// key, and UAK-issued delegation cert. Never persisted.
pub struct LeaseRecord {
    pub lease_id: String,
    pub user_id: String,
    pub kid: String,
    pub subs: Vec<StoredPushSubscription>,
    /// Derived once at `createLease` time (`HKDF(MS, leaseSalt)`) and held
    /// for the lease's lifetime so `signJWT` can unwrap `wrapped_lease_key`
    /// without the Master Secret.
    pub session_kek: Zeroizing<[u8; 32]>,
    pub wrapped_lease_key: WrappedKey,
    pub lak_signing_key: SigningKey,
    pub cert: AuditDelegationCert,
    pub created_at: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub status: LeaseStatus,
    pub quota: QuotaConfig,
}

/// RFC 8292 Web Push JWT claims, as handed to `signJWT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtPayload {
    pub aud: String,
    pub sub: String,
    pub exp: i64,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eid: Option<String>,
}

/// Result of `verifyLease`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseVerification {
    pub lease_id: String,
    pub valid: bool,
    pub reason: Option<&'static str>,
    pub kid: String,
}
