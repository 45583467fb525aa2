//! The Key-Instance Audit Key: generated once per worker process, never
//! persisted. It can only sign `auth.failed` (and a few other
//! operationally-necessary) audit entries once UAK has issued it a
//! delegation cert, the same canonicalize-then-sign shape `kms-lease`
//! uses for its own LAK cert.

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use kms_audit::{sign, AuditDelegationCert, Signer};
use serde::Serialize;

/// Ops a KIAK is ever allowed to sign for. Scoped tight: none of these
/// touch the Master Secret or a lease's private key material.
pub const KIAK_SCOPE: &[&str] = &["auth.failed", "bootstrap", "calibratePBKDF2", "rotateVAPID", "regenerateVAPID", "resetKMS"];

const KMS_VERSION: u32 = 2;

#[derive(Serialize)]
struct CertSignablePayload<'a> {
    cert_type: &'a str,
    version: u32,
    signer_kind: Signer,
    lease_id: &'a Option<String>,
    instance_id: &'a Option<String>,
    delegate_pub: [u8; 32],
    scope: &'a [String],
    not_before: DateTime<Utc>,
    not_after: Option<DateTime<Utc>>,
    code_hash: [u8; 32],
    manifest_hash: [u8; 32],
    kms_version: u32,
}

fn canonicalize(cert: &AuditDelegationCert) -> Vec<u8> {
    let payload = CertSignablePayload {
        cert_type: &cert.cert_type,
        version: cert.version,
        signer_kind: cert.signer_kind,
        lease_id: &cert.lease_id,
        instance_id: &cert.instance_id,
        delegate_pub: cert.delegate_pub,
        scope: &cert.scope,
        not_before: cert.not_before,
        not_after: cert.not_after,
        code_hash: cert.code_hash,
        manifest_hash: cert.manifest_hash,
        kms_version: cert.kms_version,
    };
    serde_json::to_vec(&payload).expect("cert payload is always serializable")
}

/// Issue a `kiakDelegationCert` signed by UAK, scoped to `KIAK_SCOPE`,
/// valid from `now` with no expiry (it's re-issued per worker start, not
/// per lease).
pub fn issue_kiak_cert(
    uak_signing_key: &SigningKey,
    kiak_pub: [u8; 32],
    instance_id: &str,
    now: DateTime<Utc>,
    code_hash: [u8; 32],
    manifest_hash: [u8; 32],
) -> AuditDelegationCert {
    let mut cert = AuditDelegationCert {
        cert_type: "audit-delegation".to_string(),
        version: 1,
        signer_kind: Signer::Kiak,
        lease_id: None,
        instance_id: Some(instance_id.to_string()),
        delegate_pub: kiak_pub,
        scope: KIAK_SCOPE.iter().map(|s| s.to_string()).collect(),
        not_before: now,
        not_after: None,
        code_hash,
        manifest_hash,
        kms_version: KMS_VERSION,
        sig: [0u8; 64],
    };
    let canonical = canonicalize(&cert);
    cert.sig = sign(uak_signing_key, &canonical);
    cert
}
