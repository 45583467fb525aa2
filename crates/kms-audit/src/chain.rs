//! Hash-chain append and verification.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use kms_codec::aad::Canonical;
use kms_store::{LogicalStore, ObjectStore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AuditError, Result};
use crate::model::{AuditCounter, AuditDelegationCert, AuditEntry, ChainVerification, Signer};
use crate::signer::{sign, verify};

const COUNTER_KEY: &str = "counter";

/// Everything needed to build an entry except the chain linkage, which
/// `append` derives from the current counter.
pub struct AppendRequest<'a> {
    pub op: &'a str,
    pub user_id: &'a str,
    pub kid: Option<String>,
    pub origin: Option<String>,
    pub lease_id: Option<String>,
    pub unlock_time: Option<DateTime<Utc>>,
    pub lock_time: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub cert: Option<AuditDelegationCert>,
}

/// Builds a delegation cert's canonical form, nested under an entry's
/// `cert` field.
fn cert_to_canonical(cert: &AuditDelegationCert) -> Canonical {
    Canonical::new()
        .field("type", cert.cert_type.as_str())
        .field("version", cert.version as u64)
        .field("signerKind", cert.signer_kind.as_str())
        .field_opt("leaseId", cert.lease_id.clone())
        .field_opt("instanceId", cert.instance_id.clone())
        .field("delegatePub", cert.delegate_pub.to_vec())
        .field("scope", cert.scope.clone())
        .field("notBefore", cert.not_before.to_rfc3339())
        .field_opt("notAfter", cert.not_after.map(|t| t.to_rfc3339()))
        .field("codeHash", cert.code_hash.to_vec())
        .field("manifestHash", cert.manifest_hash.to_vec())
        .field("kmsVersion", cert.kms_version as u64)
        .field("sig", cert.sig.to_vec())
}

/// Every `AuditEntry` field except `sig`, `sigNew`, and `chainHash` itself,
/// lexicographically key-sorted per the chain's interoperability
/// requirement — the same `Canonical` builder used for AEAD AAD.
fn canonicalize(entry: &AuditEntry) -> Result<Vec<u8>> {
    let canonical = Canonical::new()
        .field("kmsVersion", entry.kms_version as u64)
        .field("seqNum", entry.seq_num)
        .field("timestamp", entry.timestamp.to_rfc3339())
        .field("op", entry.op.as_str())
        .field_opt("kid", entry.kid.clone())
        .field("requestId", entry.request_id.as_str())
        .field("userId", entry.user_id.as_str())
        .field_opt("origin", entry.origin.clone())
        .field_opt("leaseId", entry.lease_id.clone())
        .field_opt("unlockTime", entry.unlock_time.map(|t| t.to_rfc3339()))
        .field_opt("lockTime", entry.lock_time.map(|t| t.to_rfc3339()))
        .field_opt("duration", entry.duration)
        .field_opt("details", entry.details.clone())
        .field("previousHash", entry.previous_hash.to_vec())
        .field("signer", entry.signer.as_str())
        .field("signerId", entry.signer_id.as_str())
        .field_opt("cert", entry.cert.as_ref().map(cert_to_canonical));
    Ok(canonical.build()?)
}

pub struct AuditChain {
    store: Arc<dyn ObjectStore>,
    kms_version: u32,
    pending_kiak: Mutex<Vec<AppendRequestOwned>>,
}

struct AppendRequestOwned {
    op: String,
    user_id: String,
    kid: Option<String>,
    origin: Option<String>,
    lease_id: Option<String>,
    unlock_time: Option<DateTime<Utc>>,
    lock_time: Option<DateTime<Utc>>,
    duration: Option<i64>,
    details: Option<serde_json::Value>,
}

impl AuditChain {
    pub fn new(store: Arc<dyn ObjectStore>, kms_version: u32) -> Self {
        Self { store, kms_version, pending_kiak: Mutex::new(Vec::new()) }
    }

    fn read_counter(&self, instance_id: &str) -> Result<AuditCounter> {
        match self.store.get(LogicalStore::Counters, COUNTER_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(AuditCounter::genesis(instance_id.to_string(), self.kms_version)),
        }
    }

    /// One logical transaction: read `{seqNum, previousHash}`, build the
    /// entry, canonicalize (excluding `sig`/`sigNew`/`chainHash`), hash,
    /// sign, commit entry + advance counter.
    pub fn append(
        &self,
        req: AppendRequest<'_>,
        signer: Signer,
        signer_id: &str,
        signing_key: &ed25519_dalek::SigningKey,
        instance_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AuditEntry> {
        if !matches!(signer, Signer::Uak) {
            let cert = req.cert.as_ref().ok_or(AuditError::MissingCert)?;
            if !cert.covers(req.op, now) {
                return Err(AuditError::CertDoesNotCover { op: req.op.to_string() });
            }
            if kms_codec::base64url::encode(cert.delegate_pub) != signer_id {
                return Err(AuditError::SignerIdMismatch);
            }
        }

        let counter_exists = self.store.get(LogicalStore::Counters, COUNTER_KEY)?.is_some();
        let counter = self.read_counter(instance_id)?;
        // A fresh counter (genesis) means no entry has been written yet,
        // so the first real entry takes seq_num 0; otherwise each entry
        // bumps one past the last-assigned seq_num.
        let (seq_num, previous_hash) = if counter_exists { (counter.seq_num + 1, counter.previous_hash) } else { (0u64, [0u8; 32]) };

        let mut entry = AuditEntry {
            kms_version: self.kms_version,
            seq_num,
            timestamp: now,
            op: req.op.to_string(),
            kid: req.kid,
            request_id: Uuid::new_v4().to_string(),
            user_id: req.user_id.to_string(),
            origin: req.origin,
            lease_id: req.lease_id,
            unlock_time: req.unlock_time,
            lock_time: req.lock_time,
            duration: req.duration,
            details: req.details,
            previous_hash,
            chain_hash: [0u8; 32],
            signer,
            signer_id: signer_id.to_string(),
            cert: req.cert,
            sig: [0u8; 64],
            sig_new: None,
        };

        let canonical = canonicalize(&entry)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hasher.update(previous_hash);
        let chain_hash: [u8; 32] = hasher.finalize().into();

        entry.chain_hash = chain_hash;
        entry.sig = sign(signing_key, &canonical);

        let entry_bytes = serde_json::to_vec(&entry)?;
        let new_counter = AuditCounter { seq_num: entry.seq_num, previous_hash: chain_hash, ms_version: counter.ms_version, instance_id: instance_id.to_string() };
        let counter_bytes = serde_json::to_vec(&new_counter)?;

        self.store.transaction(&mut |tx| {
            tx.put(LogicalStore::AuditEntries, &entry.seq_num.to_string(), &entry_bytes, &[])?;
            tx.put(LogicalStore::Counters, COUNTER_KEY, &counter_bytes, &[])?;
            Ok(())
        })?;

        Ok(entry)
    }

    /// Queue a KIAK-signed event recorded before the user's first unlock,
    /// when no `kiakDelegationCert` exists yet to sign it with.
    pub fn queue_pending_kiak(&self, op: &str, user_id: &str, details: Option<serde_json::Value>) {
        self.pending_kiak.lock().unwrap().push(AppendRequestOwned {
            op: op.to_string(),
            user_id: user_id.to_string(),
            kid: None,
            origin: None,
            lease_id: None,
            unlock_time: None,
            lock_time: None,
            duration: None,
            details,
        });
    }

    /// Flush queued pre-unlock KIAK events once a `kiakDelegationCert`
    /// exists, signing them retroactively in original queue order.
    pub fn flush_pending_kiak(
        &self,
        cert: &AuditDelegationCert,
        signer_id: &str,
        signing_key: &ed25519_dalek::SigningKey,
        instance_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        let queued = std::mem::take(&mut *self.pending_kiak.lock().unwrap());
        let mut entries = Vec::with_capacity(queued.len());
        for q in queued {
            let req = AppendRequest {
                op: &q.op,
                user_id: &q.user_id,
                kid: q.kid,
                origin: q.origin,
                lease_id: q.lease_id,
                unlock_time: q.unlock_time,
                lock_time: q.lock_time,
                duration: q.duration,
                details: q.details,
                cert: Some(cert.clone()),
            };
            entries.push(self.append(req, Signer::Kiak, signer_id, signing_key, instance_id, now)?);
        }
        Ok(entries)
    }

    /// Read back entries in `seqNum` order, optionally starting after
    /// `since_seq` and capped at `limit`.
    pub fn list_entries(&self, since_seq: Option<u64>, limit: Option<usize>) -> Result<Vec<AuditEntry>> {
        let mut records: Vec<AuditEntry> =
            self.store.scan_all(LogicalStore::AuditEntries)?.iter().map(|b| serde_json::from_slice(b)).collect::<std::result::Result<_, _>>()?;
        records.sort_by_key(|e| e.seq_num);
        if let Some(since) = since_seq {
            records.retain(|e| e.seq_num > since);
        }
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Walk every entry in `seqNum` order, recomputing `chainHash`,
    /// confirming contiguity, cert coverage, and the signature. `new_uak_pub`,
    /// when given, is checked against `sigNew` on entries that carry one.
    pub fn verify_chain(&self, new_uak_pub: Option<[u8; 32]>) -> Result<ChainVerification> {
        let mut records: Vec<AuditEntry> =
            self.store.scan_all(LogicalStore::AuditEntries)?.iter().map(|b| serde_json::from_slice(b)).collect::<std::result::Result<_, _>>()?;
        records.sort_by_key(|e| e.seq_num);

        let mut expected_seq = 0u64;
        let mut expected_previous = [0u8; 32];

        for entry in &records {
            if entry.seq_num != expected_seq || entry.previous_hash != expected_previous {
                return Ok(ChainVerification { ok: false, first_bad_seq: Some(entry.seq_num) });
            }

            let canonical = match canonicalize(entry) {
                Ok(c) => c,
                Err(_) => return Ok(ChainVerification { ok: false, first_bad_seq: Some(entry.seq_num) }),
            };
            let mut hasher = Sha256::new();
            hasher.update(&canonical);
            hasher.update(entry.previous_hash);
            let recomputed: [u8; 32] = hasher.finalize().into();
            if recomputed != entry.chain_hash {
                return Ok(ChainVerification { ok: false, first_bad_seq: Some(entry.seq_num) });
            }

            if !matches!(entry.signer, Signer::Uak) {
                let Some(cert) = &entry.cert else {
                    return Ok(ChainVerification { ok: false, first_bad_seq: Some(entry.seq_num) });
                };
                if !cert.covers(&entry.op, entry.timestamp) {
                    return Ok(ChainVerification { ok: false, first_bad_seq: Some(entry.seq_num) });
                }
                if kms_codec::base64url::encode(cert.delegate_pub) != entry.signer_id {
                    return Ok(ChainVerification { ok: false, first_bad_seq: Some(entry.seq_num) });
                }
            }

            let Ok(signer_pub_bytes) = kms_codec::base64url::decode(&entry.signer_id) else {
                return Ok(ChainVerification { ok: false, first_bad_seq: Some(entry.seq_num) });
            };
            let signer_pub: Option<[u8; 32]> = signer_pub_bytes.try_into().ok();
            let primary_ok = signer_pub.map(|pk| verify(&pk, &canonical, &entry.sig)).unwrap_or(false);
            let secondary_ok = match (entry.sig_new, new_uak_pub) {
                (Some(sig_new), Some(pk)) => verify(&pk, &canonical, &sig_new),
                _ => false,
            };
            if !primary_ok && !secondary_ok {
                return Ok(ChainVerification { ok: false, first_bad_seq: Some(entry.seq_num) });
            }

            expected_seq += 1;
            expected_previous = entry.chain_hash;
        }

        Ok(ChainVerification { ok: true, first_bad_seq: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::generate_signing_key;
    use kms_store::InMemoryStore;

    fn uak_request<'a>(op: &'a str, user_id: &'a str) -> AppendRequest<'a> {
        AppendRequest {
            op,
            user_id,
            kid: None,
            origin: None,
            lease_id: None,
            unlock_time: None,
            lock_time: None,
            duration: None,
            details: None,
            cert: None,
        }
    }

    #[test]
    fn append_then_verify_is_ok() {
        let chain = AuditChain::new(Arc::new(InMemoryStore::new()), 2);
        let uak = generate_signing_key();
        let signer_id = kms_codec::base64url::encode(uak.verifying_key().to_bytes());

        chain.append(uak_request("setupPassphrase", "u@x"), Signer::Uak, &signer_id, &uak, "instance-1", Utc::now()).unwrap();
        chain.append(uak_request("unlock", "u@x"), Signer::Uak, &signer_id, &uak, "instance-1", Utc::now()).unwrap();

        let result = chain.verify_chain(None).unwrap();
        assert!(result.ok);
        assert_eq!(result.first_bad_seq, None);
    }

    #[test]
    fn canonicalize_emits_lexicographically_sorted_keys() {
        let chain = AuditChain::new(Arc::new(InMemoryStore::new()), 2);
        let uak = generate_signing_key();
        let signer_id = kms_codec::base64url::encode(uak.verifying_key().to_bytes());
        let mut req = uak_request("setupPassphrase", "u@x");
        req.details = Some(serde_json::json!({"b": 1, "a": 2}));
        let entry = chain.append(req, Signer::Uak, &signer_id, &uak, "instance-1", Utc::now()).unwrap();

        let canonical = canonicalize(&entry).unwrap();
        let text = String::from_utf8(canonical).unwrap();

        // Checked against the raw bytes, not a round-tripped `Value` — a
        // `serde_json::Map` re-sorts on parse regardless of input order, so
        // only the literal byte layout proves the signed payload itself is
        // canonical.
        let top_level_keys = [
            "details", "kmsVersion", "op", "previousHash", "requestId", "seqNum", "signer", "signerId", "timestamp", "userId",
        ];
        let positions: Vec<usize> = top_level_keys.iter().map(|k| text.find(&format!("\"{k}\":")).unwrap()).collect();
        let mut sorted_positions = positions.clone();
        sorted_positions.sort();
        assert_eq!(positions, sorted_positions, "top-level keys not lexicographically sorted: {text}");

        assert!(text.contains(r#""a":2,"b":1"#), "nested `details` must also be key-sorted: {text}");
    }

    #[test]
    fn seq_nums_are_contiguous_from_zero() {
        let chain = AuditChain::new(Arc::new(InMemoryStore::new()), 2);
        let uak = generate_signing_key();
        let signer_id = kms_codec::base64url::encode(uak.verifying_key().to_bytes());

        let e0 = chain.append(uak_request("setupPassphrase", "u@x"), Signer::Uak, &signer_id, &uak, "instance-1", Utc::now()).unwrap();
        let e1 = chain.append(uak_request("unlock", "u@x"), Signer::Uak, &signer_id, &uak, "instance-1", Utc::now()).unwrap();
        assert_eq!(e0.seq_num, 0);
        assert_eq!(e1.seq_num, 1);
        assert_eq!(e1.previous_hash, e0.chain_hash);
    }

    #[test]
    fn tampering_with_details_breaks_verification_at_that_seq() {
        let store = Arc::new(InMemoryStore::new());
        let chain = AuditChain::new(store.clone(), 2);
        let uak = generate_signing_key();
        let signer_id = kms_codec::base64url::encode(uak.verifying_key().to_bytes());

        chain.append(uak_request("setupPassphrase", "u@x"), Signer::Uak, &signer_id, &uak, "instance-1", Utc::now()).unwrap();
        let mut req = uak_request("unlock", "u@x");
        req.details = Some(serde_json::json!({"ip": "10.0.0.1"}));
        let second = chain.append(req, Signer::Uak, &signer_id, &uak, "instance-1", Utc::now()).unwrap();
        chain.append(uak_request("createLease", "u@x"), Signer::Uak, &signer_id, &uak, "instance-1", Utc::now()).unwrap();

        let mut tampered = second.clone();
        tampered.details = Some(serde_json::json!({"ip": "6.6.6.6"}));
        let bytes = serde_json::to_vec(&tampered).unwrap();
        store.put(LogicalStore::AuditEntries, &tampered.seq_num.to_string(), &bytes, &[]).unwrap();

        let result = chain.verify_chain(None).unwrap();
        assert!(!result.ok);
        assert_eq!(result.first_bad_seq, Some(1));
    }

    #[test]
    fn lak_entry_without_cert_is_rejected() {
        let chain = AuditChain::new(Arc::new(InMemoryStore::new()), 2);
        let lak = generate_signing_key();
        let signer_id = kms_codec::base64url::encode(lak.verifying_key().to_bytes());
        let result = chain.append(uak_request("signJWT", "u@x"), Signer::Lak, &signer_id, &lak, "instance-1", Utc::now());
        assert!(matches!(result, Err(AuditError::MissingCert)));
    }

    #[test]
    fn lak_entry_with_covering_cert_succeeds_and_verifies() {
        let chain = AuditChain::new(Arc::new(InMemoryStore::new()), 2);
        let uak = generate_signing_key();
        let lak = generate_signing_key();
        let now = Utc::now();

        let cert = AuditDelegationCert {
            cert_type: "audit-delegation".to_string(),
            version: 1,
            signer_kind: Signer::Lak,
            lease_id: Some("lease-1".to_string()),
            instance_id: None,
            delegate_pub: lak.verifying_key().to_bytes(),
            scope: vec!["signJWT".to_string(), "sendPush".to_string(), "extendLease".to_string()],
            not_before: now - chrono::Duration::seconds(1),
            not_after: Some(now + chrono::Duration::hours(1)),
            code_hash: [1u8; 32],
            manifest_hash: [2u8; 32],
            kms_version: 2,
            sig: sign(&uak, b"placeholder-cert-payload"),
        };

        let signer_id = kms_codec::base64url::encode(lak.verifying_key().to_bytes());
        let mut req = uak_request("signJWT", "u@x");
        req.lease_id = Some("lease-1".to_string());
        req.cert = Some(cert);
        chain.append(req, Signer::Lak, &signer_id, &lak, "instance-1", now).unwrap();

        let result = chain.verify_chain(None).unwrap();
        assert!(result.ok);
    }

    #[test]
    fn rotated_uak_signature_verifies_via_sig_new() {
        let chain = AuditChain::new(Arc::new(InMemoryStore::new()), 2);
        let old_uak = generate_signing_key();
        let new_uak = generate_signing_key();
        let signer_id = kms_codec::base64url::encode(old_uak.verifying_key().to_bytes());

        let mut entry = chain.append(uak_request("rotateUAK", "u@x"), Signer::Uak, &signer_id, &old_uak, "instance-1", Utc::now()).unwrap();
        let canonical = canonicalize(&entry).unwrap();
        entry.sig_new = Some(sign(&new_uak, &canonical));
        let bytes = serde_json::to_vec(&entry).unwrap();
        chain.store.put(LogicalStore::AuditEntries, &entry.seq_num.to_string(), &bytes, &[]).unwrap();

        let result = chain.verify_chain(Some(new_uak.verifying_key().to_bytes())).unwrap();
        assert!(result.ok);
    }

    #[test]
    fn kiak_pending_events_flush_signed_once_cert_exists() {
        let chain = AuditChain::new(Arc::new(InMemoryStore::new()), 2);
        let uak = generate_signing_key();
        let kiak = generate_signing_key();
        let now = Utc::now();

        chain.queue_pending_kiak("bootstrap", "system", None);
        chain.queue_pending_kiak("calibratePBKDF2", "system", None);

        let cert = AuditDelegationCert {
            cert_type: "audit-delegation".to_string(),
            version: 1,
            signer_kind: Signer::Kiak,
            lease_id: None,
            instance_id: Some("instance-1".to_string()),
            delegate_pub: kiak.verifying_key().to_bytes(),
            scope: vec!["bootstrap".to_string(), "calibratePBKDF2".to_string(), "rotateVAPID".to_string()],
            not_before: now - chrono::Duration::seconds(1),
            not_after: None,
            code_hash: [3u8; 32],
            manifest_hash: [4u8; 32],
            kms_version: 2,
            sig: sign(&uak, b"placeholder-cert-payload"),
        };
        let signer_id = kms_codec::base64url::encode(kiak.verifying_key().to_bytes());
        let flushed = chain.flush_pending_kiak(&cert, &signer_id, &kiak, "instance-1", now).unwrap();
        assert_eq!(flushed.len(), 2);

        let result = chain.verify_chain(None).unwrap();
        assert!(result.ok);
    }
}
