//! Master Secret manager: setup, unlock, enrollment add/remove, reset.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use kms_codec::ct_eq;
use kms_kdf::{calibrate_default, needs_recalibration};
use kms_store::{LogicalStore, ObjectStore};
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::capability::EnrollmentCapability;
use crate::error::{Error, MasterSecretError, Result};
use crate::model::{
    EnrollmentMethod, EnrollmentRecord, GateUnwrap, PassphraseParams, PasskeyGateParams, PasskeyPrfParams,
    Pbkdf2ParamsDto, Secret,
};

const WEAK_PASSPHRASE_MIN_LEN: usize = 12;
const KCV_INFO: &[u8] = b"ATS/KMS/KCV/v2";

pub struct SetupOutcome {
    pub enrollment_id: String,
    pub ms: Zeroizing<[u8; 32]>,
}

pub struct MasterSecretManager {
    store: Arc<dyn ObjectStore>,
    gate: Arc<dyn GateUnwrap>,
}

fn kcv(kek: &[u8; 32]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(kek).expect("HMAC accepts any key length");
    mac.update(KCV_INFO);
    mac.finalize().into_bytes().into()
}

fn encrypt_ms(kek: &[u8; 32], ms: &[u8; 32], aad: &[u8]) -> Result<(Vec<u8>, [u8; 12])> {
    let cipher = Aes256Gcm::new_from_slice(kek).map_err(|_| Error::MasterSecret(MasterSecretError::MsAuthFailed))?;
    let mut iv = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);
    let ciphertext = cipher
        .encrypt(nonce, aes_gcm::aead::Payload { msg: ms.as_slice(), aad })
        .map_err(|_| Error::MasterSecret(MasterSecretError::MsAuthFailed))?;
    Ok((ciphertext, iv))
}

fn decrypt_ms(kek: &[u8; 32], ciphertext: &[u8], iv: &[u8; 12], aad: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let cipher = Aes256Gcm::new_from_slice(kek).map_err(|_| Error::MasterSecret(MasterSecretError::MsAuthFailed))?;
    let nonce = Nonce::from_slice(iv);
    let plaintext = cipher
        .decrypt(nonce, aes_gcm::aead::Payload { msg: ciphertext, aad })
        .map_err(|_| Error::MasterSecret(MasterSecretError::MsAuthFailed))?;
    let array: [u8; 32] = plaintext.try_into().map_err(|_| Error::MasterSecret(MasterSecretError::MsAuthFailed))?;
    Ok(Zeroizing::new(array))
}

impl MasterSecretManager {
    pub fn new(store: Arc<dyn ObjectStore>, gate: Arc<dyn GateUnwrap>) -> Self {
        Self { store, gate }
    }

    fn enrollment_count(&self) -> Result<usize> {
        Ok(self.store.scan_all(LogicalStore::Enrollments)?.len())
    }

    fn persist(&self, record: &EnrollmentRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.store.put(LogicalStore::Enrollments, &record.enrollment_id, &bytes, &[("method", record.method.tag())])?;
        Ok(())
    }

    fn all_enrollments(&self) -> Result<Vec<EnrollmentRecord>> {
        self.store
            .scan_all(LogicalStore::Enrollments)?
            .iter()
            .map(|b| serde_json::from_slice(b).map_err(Into::into))
            .collect()
    }

    /// `setupPassphrase`: first enrollment, fresh MS.
    pub fn setup_passphrase(&self, user_id: &str, passphrase: &str, now: DateTime<Utc>) -> Result<SetupOutcome> {
        if self.enrollment_count()? > 0 {
            return Err(MasterSecretError::AlreadySetup.into());
        }
        if passphrase.chars().count() < WEAK_PASSPHRASE_MIN_LEN {
            return Err(MasterSecretError::WeakPassphrase.into());
        }

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let iterations = calibrate_default();
        let method = EnrollmentMethod::Passphrase(PassphraseParams {
            kdf: Pbkdf2ParamsDto { salt, iterations, platform_hash: [0u8; 32], last_calibrated_at: now },
        });

        let mut ms = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut ms);

        let kek = method.derive_kek(&Secret::Passphrase(Zeroizing::new(passphrase.to_string())))?;
        let aad = method.build_aad()?;
        let (encrypted_ms, ms_iv) = encrypt_ms(&kek, &ms, &aad)?;

        let record = EnrollmentRecord {
            enrollment_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            method,
            encrypted_ms,
            ms_iv,
            kcv: Some(kcv(&kek)),
            ms_version: 1,
            alg_version: 1,
            created_at: now,
        };
        self.persist(&record)?;

        Ok(SetupOutcome { enrollment_id: record.enrollment_id, ms: Zeroizing::new(ms) })
    }

    /// `setupPasskeyPRF`.
    pub fn setup_passkey_prf(
        &self,
        user_id: &str,
        rp_id: &str,
        credential_id: Vec<u8>,
        prf_output: Zeroizing<Vec<u8>>,
        now: DateTime<Utc>,
    ) -> Result<SetupOutcome> {
        if self.enrollment_count()? > 0 {
            return Err(MasterSecretError::AlreadySetup.into());
        }

        let mut app_salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut app_salt);
        let mut hkdf_salt = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut hkdf_salt);

        let method = EnrollmentMethod::PasskeyPrf(PasskeyPrfParams { credential_id, rp_id: rp_id.to_string(), app_salt, hkdf_salt });

        let mut ms = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut ms);

        let kek = method.derive_kek(&Secret::PasskeyPrf { prf_output })?;
        let aad = method.build_aad()?;
        let (encrypted_ms, ms_iv) = encrypt_ms(&kek, &ms, &aad)?;

        let record = EnrollmentRecord {
            enrollment_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            method,
            encrypted_ms,
            ms_iv,
            kcv: None,
            ms_version: 1,
            alg_version: 1,
            created_at: now,
        };
        self.persist(&record)?;

        Ok(SetupOutcome { enrollment_id: record.enrollment_id, ms: Zeroizing::new(ms) })
    }

    /// `setupPasskeyGate`: pepper is randomly generated and immediately
    /// wrapped by the `GateUnwrap` collaborator's counterpart custody
    /// protocol; since that protocol is abstract here, the pepper is
    /// stored in the clear as `pepper_wrapped` and `GateUnwrap` decides
    /// what "wrapped" means for a real deployment.
    pub fn setup_passkey_gate(&self, user_id: &str, rp_id: &str, credential_id: Vec<u8>, now: DateTime<Utc>) -> Result<SetupOutcome> {
        if self.enrollment_count()? > 0 {
            return Err(MasterSecretError::AlreadySetup.into());
        }

        let mut pepper_wrapped = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut pepper_wrapped);

        let method = EnrollmentMethod::PasskeyGate(PasskeyGateParams { credential_id, rp_id: rp_id.to_string(), pepper_wrapped: pepper_wrapped.clone() });

        let unwrapped_pepper = self.gate.unwrap_pepper(&pepper_wrapped)?;

        let mut ms = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut ms);

        let kek = method.derive_kek(&Secret::PasskeyGate { unwrapped_pepper })?;
        let aad = method.build_aad()?;
        let (encrypted_ms, ms_iv) = encrypt_ms(&kek, &ms, &aad)?;

        let record = EnrollmentRecord {
            enrollment_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            method,
            encrypted_ms,
            ms_iv,
            kcv: None,
            ms_version: 1,
            alg_version: 1,
            created_at: now,
        };
        self.persist(&record)?;

        Ok(SetupOutcome { enrollment_id: record.enrollment_id, ms: Zeroizing::new(ms) })
    }

    /// `unlock`: find an enrollment matching the method tag of `secret`,
    /// re-derive its KEK, verify (KCV for passphrase), and decrypt the MS.
    pub fn unlock(&self, secret: &Secret) -> Result<Zeroizing<[u8; 32]>> {
        let enrollments = self.all_enrollments()?;
        if enrollments.is_empty() {
            return Err(MasterSecretError::NotSetup.into());
        }

        let wanted_tag = match secret {
            Secret::Passphrase(_) => "passphrase",
            Secret::PasskeyPrf { .. } => "passkeyPrf",
            Secret::PasskeyGate { .. } => "passkeyGate",
        };

        let record = enrollments
            .iter()
            .find(|e| e.method.tag() == wanted_tag)
            .ok_or(MasterSecretError::BadCredentials)?;

        let kek = record.method.derive_kek(secret)?;

        if let Some(stored_kcv) = record.kcv {
            let computed = kcv(&kek);
            if !ct_eq(&computed, &stored_kcv) {
                return Err(MasterSecretError::KcvMismatch.into());
            }
        }

        let aad = record.method.build_aad()?;
        decrypt_ms(&kek, &record.encrypted_ms, &record.ms_iv, &aad)
    }

    /// `addEnrollment`: rewrap the live MS under a brand new KEK for a
    /// second method. MS value and `msVersion` are unchanged. For
    /// passkey-gate, `new_secret` is obtained by the caller from the
    /// `GateUnwrap` collaborator before calling in, same as `unlock`.
    pub fn add_enrollment(
        &self,
        user_id: &str,
        current_secret: &Secret,
        new_method: EnrollmentMethod,
        new_secret: Secret,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let ms = self.unlock(current_secret)?;
        let ms_version = self.all_enrollments()?.first().map(|e| e.ms_version).unwrap_or(1);

        let kek = new_method.derive_kek(&new_secret)?;
        let aad = new_method.build_aad()?;
        let (encrypted_ms, ms_iv) = encrypt_ms(&kek, &ms, &aad)?;

        let kcv_value = match &new_secret {
            Secret::Passphrase(_) => Some(kcv(&kek)),
            _ => None,
        };

        let record = EnrollmentRecord {
            enrollment_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            method: new_method,
            encrypted_ms,
            ms_iv,
            kcv: kcv_value,
            ms_version,
            alg_version: 1,
            created_at: now,
        };
        self.persist(&record)?;
        Ok(record.enrollment_id)
    }

    /// `removeEnrollment`: refuses to drop the last remaining enrollment.
    pub fn remove_enrollment(&self, enrollment_id: &str) -> Result<()> {
        let count = self.enrollment_count()?;
        if count <= 1 {
            return Err(MasterSecretError::LastEnrollment.into());
        }
        if self.store.get(LogicalStore::Enrollments, enrollment_id)?.is_none() {
            return Err(MasterSecretError::EnrollmentNotFound.into());
        }
        self.store.delete(LogicalStore::Enrollments, enrollment_id)?;
        Ok(())
    }

    /// `resetKMS`: destroys every store atomically.
    pub fn reset_kms(&self) -> Result<()> {
        self.store.reset_all()?;
        Ok(())
    }

    /// `isSetup`: whether any enrollment exists, and which methods.
    pub fn is_setup(&self) -> Result<bool> {
        Ok(self.enrollment_count()? > 0)
    }

    pub fn enrollment_methods(&self) -> Result<Vec<&'static str>> {
        Ok(self.all_enrollments()?.iter().map(|e| e.method.tag()).collect())
    }

    /// The `userId` enrollments were created under. There being exactly one
    /// per store is a deployment invariant (single principal), not
    /// something this type enforces, so this just reads the first record.
    pub fn primary_user_id(&self) -> Result<String> {
        let enrollments = self.all_enrollments()?;
        let record = enrollments.first().ok_or(MasterSecretError::NotSetup)?;
        Ok(record.user_id.clone())
    }

    /// Re-unwrap the pepper for this store's passkey-gate enrollment, for
    /// callers (the RPC layer) that need to build a `Secret::PasskeyGate`
    /// to pass into `unlock`/`add_enrollment`, the same way
    /// `setup_passkey_gate` does internally for its own enrollment.
    pub fn unwrap_gate_pepper(&self) -> Result<Zeroizing<[u8; 32]>> {
        let enrollments = self.all_enrollments()?;
        let record = enrollments
            .iter()
            .find(|e| e.method.tag() == "passkeyGate")
            .ok_or(MasterSecretError::BadCredentials)?;
        let EnrollmentMethod::PasskeyGate(params) = &record.method else {
            unreachable!("tag() == \"passkeyGate\" implies this variant");
        };
        self.gate.unwrap_pepper(&params.pepper_wrapped)
    }

    /// Generate a fresh pepper and immediately gate-unwrap it, the same
    /// steps `setup_passkey_gate` takes for its own enrollment. Used by
    /// callers adding a *new* passkey-gate enrollment via `add_enrollment`,
    /// which needs both halves (the wrapped form to persist, the unwrapped
    /// form to derive the new KEK) before it has a record to read back.
    pub fn mint_gate_pepper(&self) -> Result<(Vec<u8>, Zeroizing<[u8; 32]>)> {
        let mut pepper_wrapped = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut pepper_wrapped);
        let unwrapped = self.gate.unwrap_pepper(&pepper_wrapped)?;
        Ok((pepper_wrapped, unwrapped))
    }

    /// Re-calibrates a passphrase enrollment's PBKDF2 iteration count if
    /// the platform fingerprint changed or 30 days elapsed, and rewraps
    /// the MS under the new KEK in the same call the caller already
    /// makes to unlock — new params and re-encrypted MS are written
    /// together, so no intermediate state with the old ciphertext but
    /// new params (or vice versa) is ever persisted.
    pub fn recalibrate_passphrase_if_needed(
        &self,
        enrollment_id: &str,
        passphrase: &str,
        live_platform_hash: [u8; 32],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let bytes = self
            .store
            .get(LogicalStore::Enrollments, enrollment_id)?
            .ok_or(MasterSecretError::EnrollmentNotFound)?;
        let mut record: EnrollmentRecord = serde_json::from_slice(&bytes)?;

        let EnrollmentMethod::Passphrase(params) = &record.method else {
            return Err(MasterSecretError::BadCredentials.into());
        };
        let stored_params = kms_kdf::Pbkdf2Params::from(params.kdf.clone());
        if !needs_recalibration(&stored_params, live_platform_hash, now) {
            return Ok(false);
        }

        let ms = self.unlock(&Secret::Passphrase(Zeroizing::new(passphrase.to_string())))?;

        let mut new_salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut new_salt);
        let new_iterations = calibrate_default();
        let new_method = EnrollmentMethod::Passphrase(PassphraseParams {
            kdf: Pbkdf2ParamsDto { salt: new_salt, iterations: new_iterations, platform_hash: live_platform_hash, last_calibrated_at: now },
        });

        let new_kek = new_method.derive_kek(&Secret::Passphrase(Zeroizing::new(passphrase.to_string())))?;
        let new_aad = new_method.build_aad()?;
        let (encrypted_ms, ms_iv) = encrypt_ms(&new_kek, &ms, &new_aad)?;

        record.method = new_method;
        record.encrypted_ms = encrypted_ms;
        record.ms_iv = ms_iv;
        record.kcv = Some(kcv(&new_kek));
        self.persist(&record)?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NotImplementedGateUnwrap;
    use kms_store::InMemoryStore;

    fn manager() -> MasterSecretManager {
        MasterSecretManager::new(Arc::new(InMemoryStore::new()), Arc::new(NotImplementedGateUnwrap))
    }

    #[test]
    fn setup_then_unlock_yields_identical_ms() {
        let m = manager();
        let outcome = m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        let unlocked = m.unlock(&Secret::Passphrase(Zeroizing::new("correct-horse-battery".to_string()))).unwrap();
        assert_eq!(*outcome.ms, *unlocked);
    }

    #[test]
    fn wrong_passphrase_is_kcv_mismatch_not_auth_failed() {
        let m = manager();
        m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        let result = m.unlock(&Secret::Passphrase(Zeroizing::new("WRONG-PASSWORD".to_string())));
        assert!(matches!(result, Err(Error::MasterSecret(MasterSecretError::KcvMismatch))));
    }

    #[test]
    fn eleven_chars_is_weak_twelve_is_accepted() {
        let m = manager();
        assert!(matches!(
            m.setup_passphrase("u@x", "elevenchars", Utc::now()),
            Err(Error::MasterSecret(MasterSecretError::WeakPassphrase))
        ));
        let m2 = manager();
        assert!(m2.setup_passphrase("u@x", "twelve-chars", Utc::now()).is_ok());
    }

    #[test]
    fn second_setup_call_is_already_setup() {
        let m = manager();
        m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        assert!(matches!(
            m.setup_passphrase("u@x", "another-long-one", Utc::now()),
            Err(Error::MasterSecret(MasterSecretError::AlreadySetup))
        ));
    }

    #[test]
    fn unlock_before_setup_is_not_setup() {
        let m = manager();
        let result = m.unlock(&Secret::Passphrase(Zeroizing::new("whatever-12345".to_string())));
        assert!(matches!(result, Err(Error::MasterSecret(MasterSecretError::NotSetup))));
    }

    #[test]
    fn add_enrollment_preserves_ms_and_both_methods_unlock_to_it() {
        let m = manager();
        let outcome = m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();

        let prf_output = Zeroizing::new(vec![9u8; 32]);
        let new_method = EnrollmentMethod::PasskeyPrf(PasskeyPrfParams {
            credential_id: vec![1, 2, 3],
            rp_id: "example.com".to_string(),
            app_salt: [5u8; 32],
            hkdf_salt: vec![6u8; 16],
        });
        let new_secret = Secret::PasskeyPrf { prf_output: prf_output.clone() };
        let current = Secret::Passphrase(Zeroizing::new("correct-horse-battery".to_string()));

        m.add_enrollment("u@x", &current, new_method, new_secret, Utc::now()).unwrap();

        let via_prf = m.unlock(&Secret::PasskeyPrf { prf_output }).unwrap();
        assert_eq!(*outcome.ms, *via_prf);
    }

    #[test]
    fn remove_last_enrollment_is_rejected() {
        let m = manager();
        let outcome = m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        let enrollments = m.all_enrollments().unwrap();
        assert_eq!(enrollments.len(), 1);
        let _ = &outcome;
        let result = m.remove_enrollment(&enrollments[0].enrollment_id);
        assert!(matches!(result, Err(Error::MasterSecret(MasterSecretError::LastEnrollment))));
    }

    #[test]
    fn remove_non_last_enrollment_preserves_remaining_access() {
        let m = manager();
        m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        let prf_output = Zeroizing::new(vec![9u8; 32]);
        let new_method = EnrollmentMethod::PasskeyPrf(PasskeyPrfParams {
            credential_id: vec![1, 2, 3],
            rp_id: "example.com".to_string(),
            app_salt: [5u8; 32],
            hkdf_salt: vec![6u8; 16],
        });
        let added_id = m
            .add_enrollment(
                "u@x",
                &Secret::Passphrase(Zeroizing::new("correct-horse-battery".to_string())),
                new_method,
                Secret::PasskeyPrf { prf_output: prf_output.clone() },
                Utc::now(),
            )
            .unwrap();

        m.remove_enrollment(&added_id).unwrap();
        let result = m.unlock(&Secret::Passphrase(Zeroizing::new("correct-horse-battery".to_string())));
        assert!(result.is_ok());
    }

    #[test]
    fn reset_kms_then_unlock_is_not_setup() {
        let m = manager();
        m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        m.reset_kms().unwrap();
        let result = m.unlock(&Secret::Passphrase(Zeroizing::new("correct-horse-battery".to_string())));
        assert!(matches!(result, Err(Error::MasterSecret(MasterSecretError::NotSetup))));
    }

    #[test]
    fn recalibration_rewraps_ms_and_ms_stays_identical() {
        let m = manager();
        let outcome = m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        let enrollments = m.all_enrollments().unwrap();
        let enrollment_id = &enrollments[0].enrollment_id;

        let rewrapped = m
            .recalibrate_passphrase_if_needed(enrollment_id, "correct-horse-battery", [99u8; 32], Utc::now())
            .unwrap();
        assert!(rewrapped);

        let unlocked = m.unlock(&Secret::Passphrase(Zeroizing::new("correct-horse-battery".to_string()))).unwrap();
        assert_eq!(*outcome.ms, *unlocked);
    }

    #[test]
    fn primary_user_id_before_setup_is_not_setup() {
        let m = manager();
        assert!(matches!(m.primary_user_id(), Err(Error::MasterSecret(MasterSecretError::NotSetup))));
    }

    #[test]
    fn primary_user_id_matches_setup_caller() {
        let m = manager();
        m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        assert_eq!(m.primary_user_id().unwrap(), "u@x");
    }

    #[test]
    fn is_setup_reflects_enrollment_presence() {
        let m = manager();
        assert!(!m.is_setup().unwrap());
        m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        assert!(m.is_setup().unwrap());
        assert_eq!(m.enrollment_methods().unwrap(), vec!["passphrase"]);
    }

    #[test]
    fn unwrap_gate_pepper_without_gate_enrollment_is_bad_credentials() {
        let m = manager();
        m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        assert!(matches!(m.unwrap_gate_pepper(), Err(Error::MasterSecret(MasterSecretError::BadCredentials))));
    }

    #[test]
    fn recalibration_is_a_no_op_on_same_platform_and_fresh_timestamp() {
        let m = manager();
        m.setup_passphrase("u@x", "correct-horse-battery", Utc::now()).unwrap();
        let enrollments = m.all_enrollments().unwrap();
        let enrollment_id = &enrollments[0].enrollment_id;

        let rewrapped = m
            .recalibrate_passphrase_if_needed(enrollment_id, "correct-horse-battery", [0u8; 32], Utc::now())
            .unwrap();
        assert!(!rewrapped);
    }
}
