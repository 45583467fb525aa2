//! The live unlock context: MS, MKEK, and UAK held in memory for one user.

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use zeroize::Zeroizing;

pub const DEFAULT_TTL_MINUTES: i64 = 15;
pub const HARD_CAP_HOURS: i64 = 4;

/// One principal's unlocked state. Lives only in worker memory; never
/// persisted. Leases hold their own SessionKEK-wrapped copies of whatever
/// they need, so they outlive this context's lock/expiry.
pub struct UnlockContext {
    pub user_id: String,
    pub ms: Zeroizing<[u8; 32]>,
    pub mkek: Zeroizing<[u8; 32]>,
    pub uak_signing_key: SigningKey,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl UnlockContext {
    pub fn new(user_id: String, ms: Zeroizing<[u8; 32]>, mkek: Zeroizing<[u8; 32]>, uak_signing_key: SigningKey, now: DateTime<Utc>) -> Self {
        Self { user_id, ms, mkek, uak_signing_key, created_at: now, expires_at: now + Duration::minutes(DEFAULT_TTL_MINUTES), last_activity_at: now }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Extend the TTL window by `DEFAULT_TTL_MINUTES` from `now`, capped at
    /// `HARD_CAP_HOURS` from `created_at`. Called after every audited op.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let hard_cap = self.created_at + Duration::hours(HARD_CAP_HOURS);
        let extended = now + Duration::minutes(DEFAULT_TTL_MINUTES);
        self.expires_at = extended.min(hard_cap);
        self.last_activity_at = now;
    }
}
