//! Time source abstraction.
//!
//! Every "now"-dependent invariant in the spec — KCV/MS timestamps, lease
//! expiry, quota windows, unlock-context TTL — is expressed against a
//! `Clock` instead of `Utc::now()` directly, so tests (in this crate and
//! downstream ones) can advance time deterministically instead of sleeping
//! real wall-clock seconds.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock tests can advance by hand. Not `#[cfg(test)]` because every
/// downstream crate's test suite needs a shared, dependency-free fake clock.
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn at(ts: DateTime<Utc>) -> Self {
        Self(AtomicI64::new(ts.timestamp()))
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0.load(Ordering::SeqCst), 0).unwrap()
    }
}
