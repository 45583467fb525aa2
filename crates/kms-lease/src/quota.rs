//! Per-lease quota enforcement: an hourly token bucket, a per-minute
//! global window with burst tolerance, and a per-`eid` keyed window —
//! three `governor` limiters stacked the way the donor SDK stacks one
//! limiter per identity, generalized from per-user to per-lease/per-eid.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::error::{LeaseError, Result};
use crate::model::QuotaConfig;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type EidLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

const REPLAY_WINDOW_SECONDS: i64 = 300;

fn nonzero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or_else(|| NonZeroU32::new(1).unwrap())
}

/// Quota state for a single lease. Lives as long as the `LeaseRecord` it's
/// paired with; dropped on revoke/expiry along with it.
pub struct LeaseQuota {
    hourly: DirectLimiter,
    per_minute: DirectLimiter,
    per_eid: EidLimiter,
    seen_jti: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl LeaseQuota {
    pub fn new(config: &QuotaConfig) -> Self {
        let hourly = RateLimiter::direct(Quota::per_hour(nonzero(config.tokens_per_hour)));
        let per_minute =
            RateLimiter::direct(Quota::per_minute(nonzero(config.sends_per_minute)).allow_burst(nonzero(config.burst_sends)));
        let per_eid = RateLimiter::dashmap(Quota::per_minute(nonzero(config.sends_per_minute_per_eid)));
        Self { hourly, per_minute, per_eid, seen_jti: Mutex::new(HashMap::new()) }
    }

    /// Reject a replayed `jti`, then consume one unit from every applicable
    /// limiter. A later limiter rejecting doesn't roll back an earlier
    /// one's consumption — `governor` tokens aren't transactional, and the
    /// request fails either way.
    pub fn consume(&self, jti: &str, eid: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        self.check_replay(jti, now)?;

        if self.hourly.check().is_err() {
            return Err(LeaseError::QuotaExceeded("tokensPerHour").into());
        }
        if self.per_minute.check().is_err() {
            return Err(LeaseError::QuotaExceeded("sendsPerMinute").into());
        }
        if let Some(eid) = eid {
            if self.per_eid.check_key(&eid.to_string()).is_err() {
                return Err(LeaseError::QuotaExceeded("sendsPerMinutePerEid").into());
            }
        }

        self.record_jti(jti, now);
        Ok(())
    }

    fn check_replay(&self, jti: &str, now: DateTime<Utc>) -> Result<()> {
        let seen = self.seen_jti.lock().unwrap();
        if let Some(&at) = seen.get(jti) {
            if now - at <= Duration::seconds(REPLAY_WINDOW_SECONDS) {
                return Err(LeaseError::ReplayDetected(jti.to_string()).into());
            }
        }
        Ok(())
    }

    fn record_jti(&self, jti: &str, now: DateTime<Utc>) {
        let mut seen = self.seen_jti.lock().unwrap();
        seen.retain(|_, at| now - *at <= Duration::seconds(REPLAY_WINDOW_SECONDS));
        seen.insert(jti.to_string(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> QuotaConfig {
        QuotaConfig { tokens_per_hour: 1000, sends_per_minute: 2, burst_sends: 2, sends_per_minute_per_eid: 1 }
    }

    #[test]
    fn per_minute_burst_then_exceeded() {
        let quota = LeaseQuota::new(&config());
        let now = Utc::now();
        quota.consume("jti-1", None, now).unwrap();
        quota.consume("jti-2", None, now).unwrap();
        let err = quota.consume("jti-3", None, now).unwrap_err();
        assert!(matches!(err, crate::error::Error::Lease(LeaseError::QuotaExceeded("sendsPerMinute"))));
    }

    #[test]
    fn per_eid_limits_independently_of_global() {
        let quota = LeaseQuota::new(&config());
        let now = Utc::now();
        quota.consume("jti-1", Some("eid-a"), now).unwrap();
        let err = quota.consume("jti-2", Some("eid-a"), now).unwrap_err();
        assert!(matches!(err, crate::error::Error::Lease(LeaseError::QuotaExceeded("sendsPerMinutePerEid"))));
    }

    #[test]
    fn distinct_eids_do_not_share_a_bucket() {
        let quota = LeaseQuota::new(&config());
        let now = Utc::now();
        quota.consume("jti-1", Some("eid-a"), now).unwrap();
        quota.consume("jti-2", Some("eid-b"), now).unwrap();
    }

    #[test]
    fn replayed_jti_within_window_is_rejected() {
        let quota = LeaseQuota::new(&config());
        let now = Utc::now();
        quota.consume("jti-1", None, now).unwrap();
        let err = quota.consume("jti-1", None, now + Duration::seconds(10)).unwrap_err();
        assert!(matches!(err, crate::error::Error::Lease(LeaseError::ReplayDetected(_))));
    }

    #[test]
    fn stale_jti_entries_are_pruned_on_next_record() {
        let quota = LeaseQuota::new(&config());
        let now = Utc::now();
        quota.seen_jti.lock().unwrap().insert("old-jti".to_string(), now - Duration::seconds(400));
        quota.record_jti("jti-new", now);
        assert!(!quota.seen_jti.lock().unwrap().contains_key("old-jti"));
    }
}
