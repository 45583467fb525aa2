//! Synchronous request handling: one method per RPC, a dispatch table, and
//! the helpers every handler shares (context lookup, error classification,
//! audit signing).

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use kms_audit::{AppendRequest, AuditChain, AuditDelegationCert, Signer as AuditSigner};
use kms_codec::{base64url, Clock};
use kms_kdf::derive_mkek;
use kms_keys::{validate_subscription, KeyManager, Purpose};
use kms_lease::{JwtPayload, LeaseEngine, QuotaConfig};
use kms_master_secret::model::Pbkdf2ParamsDto;
use kms_master_secret::{EnrollmentMethod, GateUnwrap, MasterSecretManager, PassphraseParams, PasskeyGateParams, PasskeyPrfParams, Secret};
use kms_store::ObjectStore;
use kms_unlock::{UnlockContext, UnlockContextManager};
use rand::RngCore;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use zeroize::Zeroizing;

use crate::error_code::{ErrorCode, IntoErrorCode};
use crate::kiak;
use crate::params::*;
use crate::protocol::{Request, Response};

const KMS_VERSION: u32 = 2;
const WEAK_PASSPHRASE_MIN_LEN: usize = 12;

/// Turn any leaf crate's error into the wire code plus a human message,
/// once, at the boundary, so handlers just `?`/`map_err(classify)`.
fn classify<E: IntoErrorCode + std::fmt::Display>(e: E) -> (ErrorCode, String) {
    (e.error_code(), e.to_string())
}

fn timeout_for(method: &str) -> StdDuration {
    match method {
        "createLease" | "setupPassphrase" | "setupPasskeyPRF" | "setupPasskeyGate" | "addEnrollment" => StdDuration::from_secs(120),
        _ => StdDuration::from_secs(60),
    }
}

pub struct Dispatcher {
    master_secret: Arc<MasterSecretManager>,
    key_manager: Arc<KeyManager>,
    audit: Arc<AuditChain>,
    lease_engine: Arc<LeaseEngine>,
    unlock: Arc<UnlockContextManager>,
    clock: Arc<dyn Clock>,
    instance_id: String,
    code_hash: [u8; 32],
    manifest_hash: [u8; 32],
    kiak: SigningKey,
    kiak_cert: Mutex<Option<AuditDelegationCert>>,
    /// Every request runs start-to-finish before the next begins; there is
    /// no concurrent mutation of lease/unlock/audit state to reason about.
    request_lock: AsyncMutex<()>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        instance_id: impl Into<String>,
        code_hash: [u8; 32],
        manifest_hash: [u8; 32],
        gate: Arc<dyn GateUnwrap>,
    ) -> Self {
        let instance_id = instance_id.into();
        let master_secret = Arc::new(MasterSecretManager::new(store.clone(), gate));
        let key_manager = Arc::new(KeyManager::new(store.clone()));
        let audit = Arc::new(AuditChain::new(store.clone(), KMS_VERSION));
        let lease_engine = Arc::new(LeaseEngine::new(key_manager.clone(), audit.clone(), instance_id.clone()));
        let unlock = Arc::new(UnlockContextManager::new(master_secret.clone(), key_manager.clone()));
        let kiak = kms_audit::generate_signing_key();

        Self {
            master_secret,
            key_manager,
            audit,
            lease_engine,
            unlock,
            clock,
            instance_id,
            code_hash,
            manifest_hash,
            kiak,
            kiak_cert: Mutex::new(None),
            request_lock: AsyncMutex::new(()),
        }
    }

    /// Serializes all requests behind a per-method timeout. Every handler
    /// below is synchronous; the async boundary exists to bound wall-clock
    /// time and give the browser-side caller an `await`-able surface.
    pub async fn dispatch(&self, req: Request) -> Response {
        let _guard = self.request_lock.lock().await;
        let timeout = timeout_for(&req.method);
        let id = req.id.clone();
        let method = req.method.clone();
        match tokio::time::timeout(timeout, async { self.dispatch_sync(req) }).await {
            Ok(response) => response,
            Err(_) => Response::err(id, ErrorCode::Timeout, format!("{method} timed out")),
        }
    }

    fn dispatch_sync(&self, req: Request) -> Response {
        let now = self.clock.now();
        let result = match req.method.as_str() {
            "isSetup" => self.handle_is_setup(),
            "setupPassphrase" => self.handle_setup_passphrase(req.params.clone(), now),
            "setupPasskeyPRF" => self.handle_setup_passkey_prf(req.params.clone(), now),
            "setupPasskeyGate" => self.handle_setup_passkey_gate(req.params.clone(), now),
            "unlock" => self.handle_unlock(req.params.clone(), now),
            "addEnrollment" => self.handle_add_enrollment(req.params.clone(), now),
            "removeEnrollment" => self.handle_remove_enrollment(req.params.clone(), now),
            "generateVAPID" => self.handle_generate_vapid(req.params.clone(), now),
            "regenerateVAPID" => self.handle_regenerate_vapid(req.params.clone(), now),
            "listKeys" => self.handle_list_keys(req.params.clone()),
            "setPushSubscription" => self.handle_set_push_subscription(req.params.clone()),
            "getPushSubscription" => self.handle_get_push_subscription(req.params.clone()),
            "createLease" => self.handle_create_lease(req.params.clone(), now),
            "verifyLease" => self.handle_verify_lease(req.params.clone(), now),
            "extendLease" => self.handle_extend_lease(req.params.clone(), now),
            "revokeLease" => self.handle_revoke_lease(req.params.clone(), now),
            "signJWT" => self.handle_sign_jwt(req.params.clone(), now),
            "getAuditLog" => self.handle_get_audit_log(req.params.clone()),
            "verifyAuditLog" => self.handle_verify_audit_log(),
            "resetKMS" => self.handle_reset_kms(),
            other => Err((ErrorCode::InvalidMethod, format!("unknown method \"{other}\""))),
        };
        match result {
            Ok(value) => Response::ok(req.id, value),
            Err((code, message)) => {
                tracing::warn!(method = %req.method, code = ?code, "rpc call failed");
                Response::err(req.id, code, message)
            }
        }
    }

    // ---- shared helpers ---------------------------------------------

    fn active_user_id(&self) -> Result<String, (ErrorCode, String)> {
        self.master_secret.primary_user_id().map_err(classify)
    }

    fn current_vapid_kid(&self) -> Result<String, (ErrorCode, String)> {
        let keys = self.key_manager.list_keys(Some(Purpose::Vapid)).map_err(classify)?;
        keys.into_iter()
            .max_by_key(|k| k.created_at)
            .map(|k| k.kid)
            .ok_or_else(|| (ErrorCode::KeyNotFound, "no VAPID key has been generated yet".to_string()))
    }

    fn run_unlocked<R>(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&UnlockContext) -> Result<R, (ErrorCode, String)>,
    ) -> Result<R, (ErrorCode, String)> {
        match self.unlock.with_unlocked(user_id, now, f) {
            Ok(inner) => inner,
            Err(e) => Err(classify(e)),
        }
    }

    fn audit_uak(
        &self,
        uak: &SigningKey,
        op: &'static str,
        user_id: &str,
        kid: Option<String>,
        details: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<(), (ErrorCode, String)> {
        let signer_id = base64url::encode(uak.verifying_key().to_bytes());
        self.audit
            .append(
                AppendRequest {
                    op,
                    user_id,
                    kid,
                    origin: None,
                    lease_id: None,
                    unlock_time: None,
                    lock_time: None,
                    duration: None,
                    details,
                    cert: None,
                },
                AuditSigner::Uak,
                &signer_id,
                uak,
                &self.instance_id,
                now,
            )
            .map_err(classify)?;
        Ok(())
    }

    /// Issues the KIAK's own delegation cert on the first call after
    /// construction (the first successful setup or unlock), flushing any
    /// `auth.failed` entries queued before a cert existed. A no-op after
    /// that: the cert has no expiry and is reissued only per worker start.
    fn ensure_kiak_cert(&self, uak: &SigningKey, now: DateTime<Utc>) -> Result<(), (ErrorCode, String)> {
        let mut guard = self.kiak_cert.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }
        let cert = kiak::issue_kiak_cert(uak, self.kiak.verifying_key().to_bytes(), &self.instance_id, now, self.code_hash, self.manifest_hash);
        let signer_id = base64url::encode(self.kiak.verifying_key().to_bytes());
        self.audit.flush_pending_kiak(&cert, &signer_id, &self.kiak, &self.instance_id, now).map_err(classify)?;
        *guard = Some(cert);
        Ok(())
    }

    /// Records an `auth.failed` event: KIAK-signed if its cert already
    /// exists, queued for retroactive signing otherwise. Best-effort — a
    /// failure here never overrides the caller's real error.
    fn record_auth_failure(&self, user_id: &str, now: DateTime<Utc>) {
        let guard = self.kiak_cert.lock().unwrap();
        match &*guard {
            Some(cert) => {
                let signer_id = base64url::encode(self.kiak.verifying_key().to_bytes());
                let _ = self.audit.append(
                    AppendRequest {
                        op: "auth.failed",
                        user_id,
                        kid: None,
                        origin: None,
                        lease_id: None,
                        unlock_time: None,
                        lock_time: None,
                        duration: None,
                        details: None,
                        cert: Some(cert.clone()),
                    },
                    AuditSigner::Kiak,
                    &signer_id,
                    &self.kiak,
                    &self.instance_id,
                    now,
                );
            }
            None => self.audit.queue_pending_kiak("auth.failed", user_id, None),
        }
    }

    fn credentials_to_secret(&self, dto: &CredentialsDto) -> Result<Secret, (ErrorCode, String)> {
        match dto.method.as_str() {
            "passphrase" => {
                let passphrase = dto.passphrase.clone().ok_or_else(|| bad_params("passphrase required"))?;
                Ok(Secret::Passphrase(Zeroizing::new(passphrase)))
            }
            "passkeyPrf" => {
                let raw = dto.prf_output.as_deref().ok_or_else(|| bad_params("prfOutput required"))?;
                let bytes = base64url::decode(raw).map_err(|_| bad_params("prfOutput must be base64url"))?;
                Ok(Secret::PasskeyPrf { prf_output: Zeroizing::new(bytes) })
            }
            "passkeyGate" => {
                let unwrapped_pepper = self.master_secret.unwrap_gate_pepper().map_err(classify)?;
                Ok(Secret::PasskeyGate { unwrapped_pepper })
            }
            other => Err(bad_params(format!("unknown credentials method \"{other}\""))),
        }
    }

    /// Builds a brand-new `EnrollmentMethod` (with freshly generated salts)
    /// plus the matching `Secret` for `addEnrollment`'s `newMethod`. Mirrors
    /// the params each `setupX` generates for itself, since `addEnrollment`
    /// has no equivalent on `MasterSecretManager` to call into directly.
    fn build_new_method(
        &self,
        new_method: &NewMethodDto,
        new_credentials: &CredentialsDto,
        now: DateTime<Utc>,
    ) -> Result<(EnrollmentMethod, Secret), (ErrorCode, String)> {
        match new_method.method.as_str() {
            "passphrase" => {
                let passphrase = new_credentials.passphrase.clone().ok_or_else(|| bad_params("passphrase required"))?;
                if passphrase.chars().count() < WEAK_PASSPHRASE_MIN_LEN {
                    return Err((ErrorCode::WeakPassphrase, "passphrase must be at least 12 characters".to_string()));
                }
                let mut salt = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut salt);
                let method = EnrollmentMethod::Passphrase(PassphraseParams {
                    kdf: Pbkdf2ParamsDto { salt, iterations: kms_kdf::calibrate_default(), platform_hash: [0u8; 32], last_calibrated_at: now },
                });
                Ok((method, Secret::Passphrase(Zeroizing::new(passphrase))))
            }
            "passkeyPrf" => {
                let rp_id = new_method.rp_id.clone().ok_or_else(|| bad_params("rpId required"))?;
                let credential_id = base64url::decode(new_method.credential_id.as_deref().ok_or_else(|| bad_params("credentialId required"))?)
                    .map_err(|_| bad_params("credentialId must be base64url"))?;
                let prf_output = base64url::decode(new_credentials.prf_output.as_deref().ok_or_else(|| bad_params("prfOutput required"))?)
                    .map_err(|_| bad_params("prfOutput must be base64url"))?;
                let mut app_salt = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut app_salt);
                let mut hkdf_salt = vec![0u8; 16];
                rand::thread_rng().fill_bytes(&mut hkdf_salt);
                let method = EnrollmentMethod::PasskeyPrf(PasskeyPrfParams { credential_id, rp_id, app_salt, hkdf_salt });
                Ok((method, Secret::PasskeyPrf { prf_output: Zeroizing::new(prf_output) }))
            }
            "passkeyGate" => {
                let rp_id = new_method.rp_id.clone().ok_or_else(|| bad_params("rpId required"))?;
                let credential_id = base64url::decode(new_method.credential_id.as_deref().ok_or_else(|| bad_params("credentialId required"))?)
                    .map_err(|_| bad_params("credentialId must be base64url"))?;
                let (pepper_wrapped, unwrapped_pepper) = self.master_secret.mint_gate_pepper().map_err(classify)?;
                let method = EnrollmentMethod::PasskeyGate(PasskeyGateParams { credential_id, rp_id, pepper_wrapped });
                Ok((method, Secret::PasskeyGate { unwrapped_pepper }))
            }
            other => Err(bad_params(format!("unknown enrollment method \"{other}\""))),
        }
    }

    // ---- handlers -----------------------------------------------------

    fn handle_is_setup(&self) -> Result<Value, (ErrorCode, String)> {
        let is_setup = self.master_secret.is_setup().map_err(classify)?;
        let methods: Vec<&'static str> = if is_setup { self.master_secret.enrollment_methods().map_err(classify)? } else { Vec::new() };
        Ok(json!({ "isSetup": is_setup, "methods": methods }))
    }

    fn handle_setup_passphrase(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: SetupPassphraseParams = parse(params)?;
        let outcome = self.master_secret.setup_passphrase(&p.user_id, &p.passphrase, now).map_err(classify)?;
        let mkek = derive_mkek(&outcome.ms).map_err(|e| (ErrorCode::CryptoError, e.to_string()))?;
        let uak = self.key_manager.generate_and_store_uak(&mkek).map_err(classify)?;
        let public = self.key_manager.generate_and_store_vapid(&mkek).map_err(classify)?;
        self.ensure_kiak_cert(&uak, now)?;
        self.audit_uak(&uak, "setupPassphrase", &p.user_id, Some(public.kid.clone()), None, now)?;
        Ok(json!({ "enrollmentId": outcome.enrollment_id, "vapidKid": public.kid, "vapidPublicKey": base64url::encode(&public.raw) }))
    }

    fn handle_setup_passkey_prf(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: SetupPasskeyPrfParams = parse(params)?;
        let credential_id = base64url::decode(&p.credential_id).map_err(|_| bad_params("credentialId must be base64url"))?;
        let prf_output = base64url::decode(&p.prf_output).map_err(|_| bad_params("prfOutput must be base64url"))?;
        let outcome = self
            .master_secret
            .setup_passkey_prf(&p.user_id, &p.rp_id, credential_id, Zeroizing::new(prf_output), now)
            .map_err(classify)?;
        let mkek = derive_mkek(&outcome.ms).map_err(|e| (ErrorCode::CryptoError, e.to_string()))?;
        let uak = self.key_manager.generate_and_store_uak(&mkek).map_err(classify)?;
        let public = self.key_manager.generate_and_store_vapid(&mkek).map_err(classify)?;
        self.ensure_kiak_cert(&uak, now)?;
        self.audit_uak(&uak, "setupPasskeyPRF", &p.user_id, Some(public.kid.clone()), None, now)?;
        Ok(json!({ "enrollmentId": outcome.enrollment_id, "vapidKid": public.kid, "vapidPublicKey": base64url::encode(&public.raw) }))
    }

    fn handle_setup_passkey_gate(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: SetupPasskeyGateParams = parse(params)?;
        let credential_id = base64url::decode(&p.credential_id).map_err(|_| bad_params("credentialId must be base64url"))?;
        let outcome = self.master_secret.setup_passkey_gate(&p.user_id, &p.rp_id, credential_id, now).map_err(classify)?;
        let mkek = derive_mkek(&outcome.ms).map_err(|e| (ErrorCode::CryptoError, e.to_string()))?;
        let uak = self.key_manager.generate_and_store_uak(&mkek).map_err(classify)?;
        let public = self.key_manager.generate_and_store_vapid(&mkek).map_err(classify)?;
        self.ensure_kiak_cert(&uak, now)?;
        self.audit_uak(&uak, "setupPasskeyGate", &p.user_id, Some(public.kid.clone()), None, now)?;
        Ok(json!({ "enrollmentId": outcome.enrollment_id, "vapidKid": public.kid, "vapidPublicKey": base64url::encode(&public.raw) }))
    }

    fn handle_unlock(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: UnlockParams = parse(params)?;
        let secret = self.credentials_to_secret(&p.credentials)?;
        if let Err(e) = self.unlock.unlock(&p.user_id, &secret, now) {
            let classified = classify(e);
            if matches!(classified.0, ErrorCode::BadCredentials | ErrorCode::KcvMismatch) {
                self.record_auth_failure(&p.user_id, now);
            }
            return Err(classified);
        }
        let user_id = p.user_id.clone();
        self.run_unlocked(&user_id, now, |ctx| {
            self.ensure_kiak_cert(&ctx.uak_signing_key, now)?;
            self.audit_uak(&ctx.uak_signing_key, "unlock", &user_id, None, None, now)?;
            Ok(ctx.expires_at)
        })
        .map(|expires_at| json!({ "success": true, "expiresAt": expires_at }))
    }

    fn handle_add_enrollment(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: AddEnrollmentParams = parse(params)?;
        let current_secret = self.credentials_to_secret(&p.current_credentials)?;
        let user_id = self.active_user_id()?;

        let ms = match self.master_secret.unlock(&current_secret) {
            Ok(ms) => ms,
            Err(e) => {
                let classified = classify(e);
                if matches!(classified.0, ErrorCode::BadCredentials | ErrorCode::KcvMismatch) {
                    self.record_auth_failure(&user_id, now);
                }
                return Err(classified);
            }
        };
        let mkek = derive_mkek(&ms).map_err(|e| (ErrorCode::CryptoError, e.to_string()))?;
        let uak = self.key_manager.load_uak(&mkek).map_err(classify)?;

        let (new_method, new_secret) = self.build_new_method(&p.new_method, &p.new_credentials, now)?;
        let enrollment_id = self.master_secret.add_enrollment(&user_id, &current_secret, new_method, new_secret, now).map_err(classify)?;
        self.audit_uak(&uak, "addEnrollment", &user_id, None, Some(json!({ "enrollmentId": enrollment_id })), now)?;
        Ok(json!({ "enrollmentId": enrollment_id }))
    }

    fn handle_remove_enrollment(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: RemoveEnrollmentParams = parse(params)?;
        let current_secret = self.credentials_to_secret(&p.current_credentials)?;
        let user_id = self.active_user_id()?;

        let ms = match self.master_secret.unlock(&current_secret) {
            Ok(ms) => ms,
            Err(e) => {
                let classified = classify(e);
                if matches!(classified.0, ErrorCode::BadCredentials | ErrorCode::KcvMismatch) {
                    self.record_auth_failure(&user_id, now);
                }
                return Err(classified);
            }
        };
        let mkek = derive_mkek(&ms).map_err(|e| (ErrorCode::CryptoError, e.to_string()))?;
        let uak = self.key_manager.load_uak(&mkek).map_err(classify)?;

        self.master_secret.remove_enrollment(&p.enrollment_id).map_err(classify)?;
        self.audit_uak(&uak, "removeEnrollment", &user_id, None, Some(json!({ "enrollmentId": p.enrollment_id })), now)?;
        Ok(json!({ "removed": true }))
    }

    fn handle_generate_vapid(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: UserIdParams = parse(params)?;
        let public = self.run_unlocked(&p.user_id, now, |ctx| {
            let public = self.key_manager.generate_and_store_vapid(&ctx.mkek).map_err(classify)?;
            self.audit_uak(&ctx.uak_signing_key, "generateVAPID", &p.user_id, Some(public.kid.clone()), None, now)?;
            Ok(public)
        })?;
        Ok(json!({ "kid": public.kid, "publicKey": base64url::encode(&public.raw) }))
    }

    fn handle_regenerate_vapid(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: UserIdParams = parse(params)?;
        let (public, prior_kid) = self.run_unlocked(&p.user_id, now, |ctx| {
            let (public, prior_kid) = self.key_manager.regenerate_and_store_vapid(&ctx.mkek).map_err(classify)?;
            self.audit_uak(
                &ctx.uak_signing_key,
                "regenerateVAPID",
                &p.user_id,
                Some(public.kid.clone()),
                Some(json!({ "oldKid": prior_kid })),
                now,
            )?;
            Ok((public, prior_kid))
        })?;
        Ok(json!({ "oldKid": prior_kid, "newKid": public.kid, "publicKey": base64url::encode(&public.raw) }))
    }

    fn handle_list_keys(&self, params: Option<Value>) -> Result<Value, (ErrorCode, String)> {
        let p: ListKeysParams = parse(params)?;
        let purpose = match p.purpose.as_deref() {
            None => None,
            Some("vapid") => Some(Purpose::Vapid),
            Some("audit-user") => Some(Purpose::AuditUser),
            Some(other) => return Err(bad_params(format!("unknown purpose \"{other}\""))),
        };
        let keys = self.key_manager.list_keys(purpose).map_err(classify)?;
        let entries: Vec<Value> = keys
            .into_iter()
            .map(|k| json!({ "kid": k.kid, "alg": k.alg.as_str(), "purpose": k.purpose.as_str(), "createdAt": k.created_at }))
            .collect();
        Ok(json!({ "keys": entries }))
    }

    fn handle_set_push_subscription(&self, params: Option<Value>) -> Result<Value, (ErrorCode, String)> {
        let p: SetPushSubscriptionParams = parse(params)?;
        let p256dh = base64url::decode(&p.subscription.keys.p256dh).map_err(|_| bad_params("p256dh must be base64url"))?;
        let auth = base64url::decode(&p.subscription.keys.auth).map_err(|_| bad_params("auth must be base64url"))?;
        self.key_manager
            .set_push_subscription(&p.kid, &p.subscription.endpoint, p.subscription.expiration_time, p256dh, auth, p.subscription.eid)
            .map_err(classify)?;
        Ok(json!({ "ok": true }))
    }

    fn handle_get_push_subscription(&self, params: Option<Value>) -> Result<Value, (ErrorCode, String)> {
        let p: GetPushSubscriptionParams = parse(params)?;
        let sub = self.key_manager.get_push_subscription(&p.kid).map_err(classify)?;
        Ok(match sub {
            Some(s) => json!({
                "endpoint": s.endpoint,
                "expirationTime": s.expiration_time,
                "keys": { "p256dh": base64url::encode(&s.p256dh), "auth": base64url::encode(&s.auth) },
                "eid": s.eid,
            }),
            None => Value::Null,
        })
    }

    fn handle_create_lease(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: CreateLeaseParams = parse(params)?;
        let mut subs = Vec::with_capacity(p.subs.len());
        for s in &p.subs {
            let sub = validate_subscription(&s.aud, None, Vec::new(), Vec::new(), s.eid.clone()).map_err(classify)?;
            subs.push(sub);
        }
        let quota = QuotaConfig::default();
        let ttl_hours = p.ttl_hours;
        let user_id = p.user_id.clone();
        let lease_user_id = user_id.clone();

        let created = self.run_unlocked(&user_id, now, move |ctx| {
            let signer_id = base64url::encode(ctx.uak_signing_key.verifying_key().to_bytes());
            self.lease_engine
                .create_lease(
                    &lease_user_id,
                    subs,
                    ttl_hours,
                    None,
                    quota,
                    &ctx.ms,
                    &ctx.mkek,
                    &ctx.uak_signing_key,
                    &signer_id,
                    self.code_hash,
                    self.manifest_hash,
                    now,
                )
                .map_err(classify)
        })?;

        Ok(json!({
            "leaseId": created.lease_id,
            "exp": created.exp,
            "lakPublicKey": base64url::encode(created.lak_public),
            "cert": created.cert,
        }))
    }

    fn handle_verify_lease(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: LeaseIdParams = parse(params)?;
        let current_kid = self.current_vapid_kid()?;
        let verification = self.lease_engine.verify_lease(&p.lease_id, &current_kid, now);
        serde_json::to_value(&verification).map_err(|e| (ErrorCode::CryptoError, e.to_string()))
    }

    fn handle_extend_lease(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: ExtendLeaseParams = parse(params)?;
        let user_id = self.active_user_id()?;
        let lease_id = p.lease_id.clone();
        let additional_hours = p.additional_hours;
        let new_exp = self.run_unlocked(&user_id, now, move |ctx| {
            self.lease_engine.extend_lease(&lease_id, additional_hours, &ctx.uak_signing_key, now).map_err(classify)
        })?;
        Ok(json!({ "exp": new_exp }))
    }

    fn handle_revoke_lease(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: LeaseIdParams = parse(params)?;
        let user_id = self.active_user_id()?;
        let lease_id = p.lease_id.clone();
        self.run_unlocked(&user_id, now, move |ctx| {
            let signer_id = base64url::encode(ctx.uak_signing_key.verifying_key().to_bytes());
            self.lease_engine.revoke_lease(&lease_id, &ctx.uak_signing_key, &signer_id, now).map_err(classify)
        })?;
        Ok(json!({ "revoked": true }))
    }

    /// No unlock context needed: the lease already carries its own
    /// `session_kek`-wrapped key and LAK signing key.
    fn handle_sign_jwt(&self, params: Option<Value>, now: DateTime<Utc>) -> Result<Value, (ErrorCode, String)> {
        let p: SignJwtParams = parse(params)?;
        let current_kid = self.current_vapid_kid()?;
        let payload = JwtPayload { aud: p.payload.aud, sub: p.payload.sub, exp: p.payload.exp, jti: p.payload.jti, eid: p.payload.eid };
        let signed = self.lease_engine.sign_jwt(&p.lease_id, &payload, &current_kid, now).map_err(classify)?;
        Ok(json!({ "jwt": signed.jwt, "exp": signed.exp }))
    }

    fn handle_get_audit_log(&self, params: Option<Value>) -> Result<Value, (ErrorCode, String)> {
        let p: GetAuditLogParams = parse(params)?;
        let entries = self.audit.list_entries(p.since_seq, p.limit).map_err(classify)?;
        Ok(json!({ "entries": entries }))
    }

    fn handle_verify_audit_log(&self) -> Result<Value, (ErrorCode, String)> {
        let verification = self.audit.verify_chain(None).map_err(classify)?;
        Ok(json!({ "ok": verification.ok, "firstBadSeq": verification.first_bad_seq }))
    }

    fn handle_reset_kms(&self) -> Result<Value, (ErrorCode, String)> {
        self.master_secret.reset_kms().map_err(classify)?;
        self.unlock.lock_all();
        self.lease_engine.clear_all();
        *self.kiak_cert.lock().unwrap() = None;
        Ok(json!({ "ok": true }))
    }
}
