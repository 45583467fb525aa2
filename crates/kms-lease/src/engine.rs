//! The Lease Engine: `createLease`, `signJWT`, `extendLease`, `revokeLease`,
//! `verifyLease`, and the in-memory lease table backing all five.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use ecdsa::signature::Signer as _;
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use kms_audit::{AppendRequest, AuditChain, AuditDelegationCert, Signer as AuditSigner};
use kms_codec::base64url;
use kms_keys::{unwrap_private_key, wrap_private_key, sign_with_vapid_key, KeyAlg, KeyManager, Purpose, StoredPushSubscription};
use kms_kdf::derive_session_kek;
use rand::RngCore;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cert::issue_lak_cert;
use crate::error::{LeaseError, Result};
use crate::model::{JwtPayload, LeaseRecord, LeaseStatus, LeaseVerification, QuotaConfig, MAX_TTL_HOURS};
use crate::quota::LeaseQuota;

const KMS_VERSION: u32 = 2;

pub struct LeaseCreated {
    pub lease_id: String,
    pub exp: DateTime<Utc>,
    pub lak_public: [u8; 32],
    pub cert: AuditDelegationCert,
}

pub struct SignedJwt {
    pub jwt: String,
    pub exp: i64,
}

pub struct LeaseEngine {
    key_manager: Arc<KeyManager>,
    audit: Arc<AuditChain>,
    instance_id: String,
    leases: Mutex<HashMap<String, LeaseRecord>>,
    quotas: Mutex<HashMap<String, LeaseQuota>>,
}

impl LeaseEngine {
    pub fn new(key_manager: Arc<KeyManager>, audit: Arc<AuditChain>, instance_id: impl Into<String>) -> Self {
        Self { key_manager, audit, instance_id: instance_id.into(), leases: Mutex::new(HashMap::new()), quotas: Mutex::new(HashMap::new()) }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_lease(
        &self,
        user_id: &str,
        subs: Vec<StoredPushSubscription>,
        ttl_hours: u32,
        requested_kid: Option<&str>,
        quota_config: QuotaConfig,
        ms: &[u8; 32],
        mkek: &[u8; 32],
        uak_signing_key: &Ed25519SigningKey,
        uak_signer_id: &str,
        code_hash: [u8; 32],
        manifest_hash: [u8; 32],
        now: DateTime<Utc>,
    ) -> Result<LeaseCreated> {
        if ttl_hours == 0 || ttl_hours as u64 > MAX_TTL_HOURS as u64 {
            return Err(LeaseError::TtlOutOfRange.into());
        }

        let wrapped = match requested_kid {
            Some(kid) => self.key_manager.get_wrapped(kid)?,
            None => self
                .key_manager
                .list_keys(Some(Purpose::Vapid))?
                .into_iter()
                .max_by_key(|k| k.created_at)
                .ok_or_else(|| kms_keys::KeysError::KeyNotFound("<default>".to_string()))?,
        };

        let vapid_private = unwrap_private_key(mkek, &wrapped)?;

        let mut lease_salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut lease_salt);
        let session_kek = derive_session_kek(ms, &lease_salt)?;

        let wrapped_lease_key = wrap_private_key(&session_kek, &vapid_private, &wrapped.kid, Purpose::Vapid, KeyAlg::EcdsaP256, now, wrapped.public_raw)?;

        let lak_signing_key = kms_audit::generate_signing_key();
        let lak_public = lak_signing_key.verifying_key().to_bytes();

        let exp = now + Duration::hours(ttl_hours as i64);
        let lease_id = Uuid::new_v4().to_string();

        let cert = issue_lak_cert(uak_signing_key, &lease_id, lak_public, now, exp, code_hash, manifest_hash, KMS_VERSION);

        let record = LeaseRecord {
            lease_id: lease_id.clone(),
            user_id: user_id.to_string(),
            kid: wrapped.kid.clone(),
            subs,
            session_kek: Zeroizing::new(*session_kek),
            wrapped_lease_key,
            lak_signing_key,
            cert: cert.clone(),
            created_at: now,
            exp,
            status: LeaseStatus::Active,
            quota: quota_config,
        };

        self.leases.lock().unwrap().insert(lease_id.clone(), record);
        self.quotas.lock().unwrap().insert(lease_id.clone(), LeaseQuota::new(&quota_config));

        self.audit.append(
            AppendRequest {
                op: "createLease",
                user_id,
                kid: Some(wrapped.kid.clone()),
                origin: None,
                lease_id: Some(lease_id.clone()),
                unlock_time: None,
                lock_time: None,
                duration: None,
                details: Some(serde_json::json!({ "ttlHours": ttl_hours })),
                cert: None,
            },
            AuditSigner::Uak,
            uak_signer_id,
            uak_signing_key,
            &self.instance_id,
            now,
        )?;

        Ok(LeaseCreated { lease_id, exp, lak_public, cert })
    }

    pub fn sign_jwt(&self, lease_id: &str, payload: &JwtPayload, current_kid: &str, now: DateTime<Utc>) -> Result<SignedJwt> {
        self.validate_payload(payload, now)?;

        let mut leases = self.leases.lock().unwrap();
        let lease = leases.get_mut(lease_id).ok_or_else(|| LeaseError::NotFound(lease_id.to_string()))?;

        refresh_status(lease, current_kid, now);
        match lease.status {
            LeaseStatus::Expired | LeaseStatus::Revoked => return Err(LeaseError::Invalid(lease_id.to_string(), "not active").into()),
            LeaseStatus::Orphaned => return Err(LeaseError::KeyRotated.into()),
            LeaseStatus::Active => {}
        }

        let quotas = self.quotas.lock().unwrap();
        let quota = quotas.get(lease_id).expect("quota tracked for every active lease");
        quota.consume(&payload.jti, payload.eid.as_deref(), now)?;
        drop(quotas);

        let header = serde_json::json!({ "typ": "JWT", "alg": "ES256", "kid": lease.kid });
        let header_b64 = base64url::encode(serde_json::to_vec(&header)?);
        let payload_b64 = base64url::encode(serde_json::to_vec(payload)?);
        let signing_input = format!("{header_b64}.{payload_b64}");

        let vapid_private = unwrap_private_key(&lease.session_kek, &lease.wrapped_lease_key)?;
        // p256's `Signature` already encodes as fixed-width r||s (P-1363);
        // unlike a DER-speaking backend this never needs der_to_p1363.
        let signature = sign_with_vapid_key(&vapid_private, signing_input.as_bytes())?;
        let sig_b64 = base64url::encode(signature.to_bytes());
        let jwt = format!("{signing_input}.{sig_b64}");

        let lak_signer_id = base64url::encode(lease.lak_signing_key.verifying_key().to_bytes());
        let cert = lease.cert.clone();
        let lease_user_id = lease.user_id.clone();

        self.audit.append(
            AppendRequest {
                op: "signJWT",
                user_id: &lease_user_id,
                kid: Some(current_kid.to_string()),
                origin: Some(payload.aud.clone()),
                lease_id: Some(lease_id.to_string()),
                unlock_time: None,
                lock_time: None,
                duration: None,
                details: None,
                cert: Some(cert),
            },
            AuditSigner::Lak,
            &lak_signer_id,
            &lease.lak_signing_key,
            &self.instance_id,
            now,
        )?;
        drop(leases);

        Ok(SignedJwt { jwt, exp: payload.exp })
    }

    fn validate_payload(&self, payload: &JwtPayload, now: DateTime<Utc>) -> Result<()> {
        if !payload.aud.starts_with("https://") {
            return Err(LeaseError::InvalidPayload("aud must be an HTTPS origin".to_string()).into());
        }
        if !(payload.sub.starts_with("mailto:") || payload.sub.starts_with("https://")) {
            return Err(LeaseError::InvalidPayload("sub must be mailto: or HTTPS".to_string()).into());
        }
        if payload.jti.is_empty() {
            return Err(LeaseError::InvalidPayload("jti is required".to_string()).into());
        }
        let exp_at = DateTime::<Utc>::from_timestamp(payload.exp, 0)
            .ok_or_else(|| LeaseError::InvalidPayload("exp is not a valid timestamp".to_string()))?;
        if exp_at - now > Duration::hours(24) {
            return Err(LeaseError::InvalidPayload("exp exceeds 24h per RFC 8292".to_string()).into());
        }
        Ok(())
    }

    /// Audit entry is LAK-signed per spec (`extendLease` is in the LAK's
    /// delegated scope); the cert itself is UAK's claim, so its updated
    /// `notAfter` still needs a fresh UAK signature.
    pub fn extend_lease(&self, lease_id: &str, additional_hours: u32, uak_signing_key: &Ed25519SigningKey, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut leases = self.leases.lock().unwrap();
        let lease = leases.get_mut(lease_id).ok_or_else(|| LeaseError::NotFound(lease_id.to_string()))?;
        if lease.status != LeaseStatus::Active {
            return Err(LeaseError::Invalid(lease_id.to_string(), "not active").into());
        }

        let hard_cap = lease.created_at + Duration::hours(MAX_TTL_HOURS as i64);
        let requested = now + Duration::hours(additional_hours as i64);
        let new_exp = requested.min(hard_cap);
        lease.exp = new_exp;
        lease.cert = crate::cert::resign_with_new_expiry(uak_signing_key, &lease.cert, new_exp);

        let user_id = lease.user_id.clone();
        let cert = lease.cert.clone();
        let lak_signer_id = base64url::encode(lease.lak_signing_key.verifying_key().to_bytes());

        self.audit.append(
            AppendRequest {
                op: "extendLease",
                user_id: &user_id,
                kid: None,
                origin: None,
                lease_id: Some(lease_id.to_string()),
                unlock_time: None,
                lock_time: None,
                duration: None,
                details: Some(serde_json::json!({ "additionalHours": additional_hours })),
                cert: Some(cert),
            },
            AuditSigner::Lak,
            &lak_signer_id,
            &lease.lak_signing_key,
            &self.instance_id,
            now,
        )?;
        drop(leases);

        Ok(new_exp)
    }

    pub fn revoke_lease(&self, lease_id: &str, uak_signing_key: &Ed25519SigningKey, uak_signer_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut leases = self.leases.lock().unwrap();
        let lease = leases.remove(lease_id).ok_or_else(|| LeaseError::NotFound(lease_id.to_string()))?;
        self.quotas.lock().unwrap().remove(lease_id);
        drop(leases);

        self.audit.append(
            AppendRequest {
                op: "revokeLease",
                user_id: &lease.user_id,
                kid: None,
                origin: None,
                lease_id: Some(lease_id.to_string()),
                unlock_time: None,
                lock_time: None,
                duration: None,
                details: None,
                cert: None,
            },
            AuditSigner::Uak,
            uak_signer_id,
            uak_signing_key,
            &self.instance_id,
            now,
        )?;

        Ok(())
    }

    /// Drops every in-memory lease and quota tracker. Used by `resetKMS`;
    /// the leases themselves have no persisted form, so this is the whole
    /// of their teardown.
    pub fn clear_all(&self) {
        self.leases.lock().unwrap().clear();
        self.quotas.lock().unwrap().clear();
    }

    pub fn verify_lease(&self, lease_id: &str, current_kid: &str, now: DateTime<Utc>) -> LeaseVerification {
        let mut leases = self.leases.lock().unwrap();
        match leases.get_mut(lease_id) {
            None => LeaseVerification { lease_id: lease_id.to_string(), valid: false, reason: Some("not-found"), kid: String::new() },
            Some(lease) => {
                refresh_status(lease, current_kid, now);
                let (valid, reason) = match lease.status {
                    LeaseStatus::Active => (true, None),
                    LeaseStatus::Expired => (false, Some("expired")),
                    LeaseStatus::Orphaned => (false, Some("wrong-key")),
                    LeaseStatus::Revoked => (false, Some("expired")),
                };
                LeaseVerification { lease_id: lease_id.to_string(), valid, reason, kid: lease.kid.clone() }
            }
        }
    }
}

/// Terminal states are sticky; `Active` is re-derived from time and the
/// current `kid` on every touch, matching the state machine's definition
/// that expiry/rotation are observed, not transitioned by a timer.
fn refresh_status(lease: &mut LeaseRecord, current_kid: &str, now: DateTime<Utc>) {
    if lease.status != LeaseStatus::Active {
        return;
    }
    if lease.kid != current_kid {
        lease.status = LeaseStatus::Orphaned;
    } else if now >= lease.exp {
        lease.status = LeaseStatus::Expired;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kms_keys::KeyManager;
    use kms_store::InMemoryStore;

    struct Harness {
        engine: LeaseEngine,
        ms: [u8; 32],
        mkek: [u8; 32],
        uak: Ed25519SigningKey,
        uak_id: String,
        kid: String,
    }

    fn harness() -> Harness {
        let store: Arc<dyn kms_store::ObjectStore> = Arc::new(InMemoryStore::new());
        let key_manager = Arc::new(KeyManager::new(store.clone()));
        let audit = Arc::new(AuditChain::new(store, 2));
        let mkek = [11u8; 32];
        let public = key_manager.generate_and_store_vapid(&mkek).unwrap();
        let uak = kms_audit::generate_signing_key();
        let uak_id = base64url::encode(uak.verifying_key().to_bytes());
        let engine = LeaseEngine::new(key_manager, audit, "instance-1");
        Harness { engine, ms: [5u8; 32], mkek, uak, uak_id, kid: public.kid }
    }

    fn payload(now: DateTime<Utc>, jti: &str, eid: Option<&str>) -> JwtPayload {
        JwtPayload {
            aud: "https://push.example.com".to_string(),
            sub: "mailto:ops@example.com".to_string(),
            exp: (now + Duration::hours(1)).timestamp(),
            jti: jti.to_string(),
            eid: eid.map(str::to_string),
        }
    }

    #[test]
    fn create_lease_persists_record_and_audit_entry() {
        let h = harness();
        let now = Utc::now();
        let created = h
            .engine
            .create_lease(
                "user-1",
                vec![],
                24,
                None,
                QuotaConfig::default(),
                &h.ms,
                &h.mkek,
                &h.uak,
                &h.uak_id,
                [1u8; 32],
                [2u8; 32],
                now,
            )
            .unwrap();

        assert_eq!(created.exp, now + Duration::hours(24));
        assert!(created.cert.covers("signJWT", now));

        let verified = h.engine.audit.verify_chain(Some(h.uak.verifying_key().to_bytes())).unwrap();
        assert!(verified.ok);
        let _ = created.lak_public;
    }

    #[test]
    fn sign_jwt_produces_three_part_token() {
        let h = harness();
        let now = Utc::now();
        let created = h
            .engine
            .create_lease("user-1", vec![], 24, None, QuotaConfig::default(), &h.ms, &h.mkek, &h.uak, &h.uak_id, [1u8; 32], [2u8; 32], now)
            .unwrap();

        let signed = h.engine.sign_jwt(&created.lease_id, &payload(now, "jti-1", None), &h.kid, now).unwrap();
        assert_eq!(signed.jwt.split('.').count(), 3);
    }

    #[test]
    fn sign_jwt_rejects_replayed_jti() {
        let h = harness();
        let now = Utc::now();
        let created = h
            .engine
            .create_lease("user-1", vec![], 24, None, QuotaConfig::default(), &h.ms, &h.mkek, &h.uak, &h.uak_id, [1u8; 32], [2u8; 32], now)
            .unwrap();

        h.engine.sign_jwt(&created.lease_id, &payload(now, "jti-replay", None), &h.kid, now).unwrap();
        let err = h.engine.sign_jwt(&created.lease_id, &payload(now, "jti-replay", None), &h.kid, now).unwrap_err();
        assert!(matches!(err, crate::error::Error::Lease(LeaseError::ReplayDetected(_))));
    }

    #[test]
    fn sign_jwt_enforces_quota() {
        let h = harness();
        let now = Utc::now();
        let quota = QuotaConfig { tokens_per_hour: 1000, sends_per_minute: 1, burst_sends: 1, sends_per_minute_per_eid: 5 };
        let created = h
            .engine
            .create_lease("user-1", vec![], 24, None, quota, &h.ms, &h.mkek, &h.uak, &h.uak_id, [1u8; 32], [2u8; 32], now)
            .unwrap();

        h.engine.sign_jwt(&created.lease_id, &payload(now, "jti-a", None), &h.kid, now).unwrap();
        let err = h.engine.sign_jwt(&created.lease_id, &payload(now, "jti-b", None), &h.kid, now).unwrap_err();
        assert!(matches!(err, crate::error::Error::Lease(LeaseError::QuotaExceeded("sendsPerMinute"))));
    }

    #[test]
    fn create_lease_rejects_zero_ttl() {
        let h = harness();
        let now = Utc::now();
        let err = h
            .engine
            .create_lease("user-1", vec![], 0, None, QuotaConfig::default(), &h.ms, &h.mkek, &h.uak, &h.uak_id, [1u8; 32], [2u8; 32], now)
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Lease(LeaseError::TtlOutOfRange)));
    }

    #[test]
    fn create_lease_rejects_ttl_over_max() {
        let h = harness();
        let now = Utc::now();
        let err = h
            .engine
            .create_lease("user-1", vec![], MAX_TTL_HOURS + 1, None, QuotaConfig::default(), &h.ms, &h.mkek, &h.uak, &h.uak_id, [1u8; 32], [2u8; 32], now)
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Lease(LeaseError::TtlOutOfRange)));
    }

    #[test]
    fn extend_lease_pushes_exp_and_respects_hard_cap() {
        let h = harness();
        let now = Utc::now();
        let created = h
            .engine
            .create_lease("user-1", vec![], 1, None, QuotaConfig::default(), &h.ms, &h.mkek, &h.uak, &h.uak_id, [1u8; 32], [2u8; 32], now)
            .unwrap();

        let new_exp = h.engine.extend_lease(&created.lease_id, 5, &h.uak, now).unwrap();
        assert_eq!(new_exp, now + Duration::hours(5));

        let far_future_exp = h.engine.extend_lease(&created.lease_id, MAX_TTL_HOURS + 100, &h.uak, now).unwrap();
        assert_eq!(far_future_exp, now + Duration::hours(MAX_TTL_HOURS as i64));
    }

    #[test]
    fn revoke_lease_removes_it_and_fails_subsequent_sign() {
        let h = harness();
        let now = Utc::now();
        let created = h
            .engine
            .create_lease("user-1", vec![], 24, None, QuotaConfig::default(), &h.ms, &h.mkek, &h.uak, &h.uak_id, [1u8; 32], [2u8; 32], now)
            .unwrap();

        h.engine.revoke_lease(&created.lease_id, &h.uak, &h.uak_id, now).unwrap();

        let err = h.engine.sign_jwt(&created.lease_id, &payload(now, "jti-1", None), &h.kid, now).unwrap_err();
        assert!(matches!(err, crate::error::Error::Lease(LeaseError::NotFound(_))));

        let verification = h.engine.verify_lease(&created.lease_id, &h.kid, now);
        assert!(!verification.valid);
        assert_eq!(verification.reason, Some("not-found"));
    }

    #[test]
    fn verify_lease_reports_expired_and_wrong_key() {
        let h = harness();
        let now = Utc::now();
        let created = h
            .engine
            .create_lease("user-1", vec![], 1, None, QuotaConfig::default(), &h.ms, &h.mkek, &h.uak, &h.uak_id, [1u8; 32], [2u8; 32], now)
            .unwrap();

        let expired = h.engine.verify_lease(&created.lease_id, &h.kid, now + Duration::hours(2));
        assert!(!expired.valid);
        assert_eq!(expired.reason, Some("expired"));
    }

    #[test]
    fn verify_lease_reports_wrong_key_after_rotation() {
        let h = harness();
        let now = Utc::now();
        let created = h
            .engine
            .create_lease("user-1", vec![], 24, None, QuotaConfig::default(), &h.ms, &h.mkek, &h.uak, &h.uak_id, [1u8; 32], [2u8; 32], now)
            .unwrap();

        let rotated = h.engine.verify_lease(&created.lease_id, "some-other-kid", now);
        assert!(!rotated.valid);
        assert_eq!(rotated.reason, Some("wrong-key"));
    }
}
