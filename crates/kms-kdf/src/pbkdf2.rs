//! PBKDF2-HMAC-SHA256 key derivation and iteration-count calibration.

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Lower bound on PBKDF2 iterations, regardless of calibration result.
pub const MIN_ITERATIONS: u32 = 50_000;
/// Upper bound on PBKDF2 iterations, regardless of calibration result.
pub const MAX_ITERATIONS: u32 = 2_000_000;
/// Iteration count used for the fixed calibration probe.
const PROBE_ITERATIONS: u32 = 100_000;
/// Re-calibrate if more than this long has passed since the last calibration.
const RECALIBRATION_AGE: Duration = Duration::days(30);

/// Stored PBKDF2 parameters for a passphrase enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pbkdf2Params {
    pub salt: [u8; 16],
    pub iterations: u32,
    pub platform_hash: [u8; 32],
    pub last_calibrated_at: DateTime<Utc>,
}

/// Derive a 32-byte KEK from a passphrase via PBKDF2-HMAC-SHA256.
pub fn derive_kek(passphrase: &[u8], salt: &[u8; 16], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut out = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, salt, iterations, out.as_mut());
    out
}

/// Measure how long `iterations` PBKDF2-HMAC-SHA256 rounds take on this
/// platform, scale linearly to land near `target_ms`, and clamp to
/// `[MIN_ITERATIONS, MAX_ITERATIONS]`.
///
/// Mirrors the spec's fixed probe: 100,000 iterations deriving 256 bits with
/// dummy password/salt, midpoint target 220ms within `[150, 300]`.
pub fn calibrate(target_ms: u32, bounds_ms: (u32, u32)) -> u32 {
    debug_assert!(bounds_ms.0 <= target_ms && target_ms <= bounds_ms.1);

    let dummy_password = b"ATS/KMS/calibration-probe";
    let dummy_salt = [0u8; 16];
    let mut out = [0u8; 32];

    let start = Instant::now();
    pbkdf2::pbkdf2_hmac::<Sha256>(dummy_password, &dummy_salt, PROBE_ITERATIONS, &mut out);
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    if elapsed_ms <= 0.0 {
        return PROBE_ITERATIONS.clamp(MIN_ITERATIONS, MAX_ITERATIONS);
    }

    let scaled = (PROBE_ITERATIONS as f64) * (target_ms as f64 / elapsed_ms);
    (scaled.round() as u32).clamp(MIN_ITERATIONS, MAX_ITERATIONS)
}

/// Default calibration target used when no explicit config is supplied.
pub fn calibrate_default() -> u32 {
    calibrate(220, (150, 300))
}

/// True if the stored parameters are stale: the platform fingerprint changed
/// (different CPU/engine, typically after a browser/OS upgrade) or more than
/// 30 days have passed since the last calibration.
pub fn needs_recalibration(
    stored: &Pbkdf2Params,
    live_platform_hash: [u8; 32],
    now: DateTime<Utc>,
) -> bool {
    stored.platform_hash != live_platform_hash || now - stored.last_calibrated_at > RECALIBRATION_AGE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_result_is_within_bounds() {
        let iterations = calibrate(220, (150, 300));
        assert!((MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations));
    }

    #[test]
    fn derive_kek_is_deterministic() {
        let salt = [7u8; 16];
        let a = derive_kek(b"correct-horse-battery", &salt, 1000);
        let b = derive_kek(b"correct-horse-battery", &salt, 1000);
        assert_eq!(*a, *b);
    }

    #[test]
    fn different_passphrases_derive_different_keks() {
        let salt = [7u8; 16];
        let a = derive_kek(b"correct-horse-battery", &salt, 1000);
        let b = derive_kek(b"WRONG", &salt, 1000);
        assert_ne!(*a, *b);
    }

    #[test]
    fn recalibration_triggers_on_platform_change() {
        let stored = Pbkdf2Params {
            salt: [0u8; 16],
            iterations: 100_000,
            platform_hash: [1u8; 32],
            last_calibrated_at: Utc::now(),
        };
        assert!(needs_recalibration(&stored, [2u8; 32], Utc::now()));
        assert!(!needs_recalibration(&stored, [1u8; 32], Utc::now()));
    }

    #[test]
    fn recalibration_triggers_after_30_days() {
        let stored = Pbkdf2Params {
            salt: [0u8; 16],
            iterations: 100_000,
            platform_hash: [1u8; 32],
            last_calibrated_at: Utc::now() - Duration::days(31),
        };
        assert!(needs_recalibration(&stored, [1u8; 32], Utc::now()));
    }

    #[test]
    fn recalibration_not_needed_when_fresh_and_same_platform() {
        let stored = Pbkdf2Params {
            salt: [0u8; 16],
            iterations: 100_000,
            platform_hash: [1u8; 32],
            last_calibrated_at: Utc::now() - Duration::days(1),
        };
        assert!(!needs_recalibration(&stored, [1u8; 32], Utc::now()));
    }
}
