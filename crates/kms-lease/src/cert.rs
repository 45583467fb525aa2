//! Builds and signs the `LakDelegationCert` a lease carries: the same
//! canonicalize-then-sign shape `kms-audit` uses for entries, applied here
//! to the cert UAK issues at `createLease` time.

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use kms_audit::{sign, AuditDelegationCert, Signer};
use serde::Serialize;

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

/// Issue a `lakDelegationCert` scoped to the lease ops, signed by UAK.
#[allow(clippy::too_many_arguments)]
pub fn issue_lak_cert(
    uak_signing_key: &SigningKey,
    lease_id: &str,
    delegate_pub: [u8; 32],
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    code_hash: [u8; 32],
    manifest_hash: [u8; 32],
    kms_version: u32,
) -> AuditDelegationCert {
    let mut cert = AuditDelegationCert {
        cert_type: "audit-delegation".to_string(),
        version: 1,
        signer_kind: Signer::Lak,
        lease_id: Some(lease_id.to_string()),
        instance_id: None,
        delegate_pub,
        scope: vec!["signJWT".to_string(), "sendPush".to_string(), "extendLease".to_string()],
        not_before,
        not_after: Some(not_after),
        code_hash,
        manifest_hash,
        kms_version,
        sig: [0u8; 64],
    };
    let canonical = canonicalize(&cert);
    cert.sig = sign(uak_signing_key, &canonical);
    cert
}

/// Re-sign a cert with an updated `notAfter`, as `extendLease` requires:
/// the cert's scope/window is UAK's claim, so changing it invalidates the
/// old signature regardless of whether a verifier currently checks it.
pub fn resign_with_new_expiry(uak_signing_key: &SigningKey, cert: &AuditDelegationCert, new_not_after: DateTime<Utc>) -> AuditDelegationCert {
    let mut updated = cert.clone();
    updated.not_after = Some(new_not_after);
    updated.sig = [0u8; 64];
    let canonical = canonicalize(&updated);
    updated.sig = sign(uak_signing_key, &canonical);
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use kms_audit::generate_signing_key;

    #[test]
    fn issued_cert_covers_lease_ops_and_verifies() {
        let uak = generate_signing_key();
        let now = Utc::now();
        let lak_pub = [9u8; 32];
        let cert = issue_lak_cert(&uak, "lease-1", lak_pub, now, now + chrono::Duration::hours(1), [1u8; 32], [2u8; 32], 2);
        assert!(cert.covers("signJWT", now));
        assert!(!cert.covers("resetKMS", now));

        let canonical = canonicalize(&cert);
        assert!(kms_audit::verify(&uak.verifying_key().to_bytes(), &canonical, &cert.sig));
    }

    #[test]
    fn resigning_updates_expiry_and_invalidates_old_signature() {
        let uak = generate_signing_key();
        let now = Utc::now();
        let original = issue_lak_cert(&uak, "lease-1", [9u8; 32], now, now + chrono::Duration::hours(1), [1u8; 32], [2u8; 32], 2);
        let extended_at = now + chrono::Duration::hours(2);
        let resigned = resign_with_new_expiry(&uak, &original, extended_at);

        assert_eq!(resigned.not_after, Some(extended_at));
        assert_ne!(resigned.sig, original.sig);
        assert!(kms_audit::verify(&uak.verifying_key().to_bytes(), &canonicalize(&resigned), &resigned.sig));
        assert!(!kms_audit::verify(&uak.verifying_key().to_bytes(), &canonicalize(&original), &resigned.sig));
    }
}
