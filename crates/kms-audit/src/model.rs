//! Audit chain data model: entries, delegation certs, and signer identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which key class signed an entry or cert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signer {
    Uak,
    Lak,
    Kiak,
}

impl Signer {
    pub fn as_str(self) -> &'static str {
        match self {
            Signer::Uak => "UAK",
            Signer::Lak => "LAK",
            Signer::Kiak => "KIAK",
        }
    }
}

/// Binds a subordinate (LAK or KIAK) signing key to a scope, validity
/// window, and the executing code's identity. Signed by UAK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditDelegationCert {
    #[serde(rename = "type")]
    pub cert_type: String,
    pub version: u32,
    pub signer_kind: Signer,
    pub lease_id: Option<String>,
    pub instance_id: Option<String>,
    pub delegate_pub: [u8; 32],
    pub scope: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: Option<DateTime<Utc>>,
    pub code_hash: [u8; 32],
    pub manifest_hash: [u8; 32],
    pub kms_version: u32,
    pub sig: [u8; 64],
}

impl AuditDelegationCert {
    pub fn covers(&self, op: &str, at: DateTime<Utc>) -> bool {
        let in_scope = self.scope.iter().any(|s| s == op);
        let after_start = at >= self.not_before;
        let before_end = self.not_after.map(|na| at <= na).unwrap_or(true);
        in_scope && after_start && before_end
    }
}

/// One link in the hash chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub kms_version: u32,
    pub seq_num: u64,
    pub timestamp: DateTime<Utc>,
    pub op: String,
    pub kid: Option<String>,
    pub request_id: String,
    pub user_id: String,
    pub origin: Option<String>,
    pub lease_id: Option<String>,
    pub unlock_time: Option<DateTime<Utc>>,
    pub lock_time: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub previous_hash: [u8; 32],
    pub chain_hash: [u8; 32],
    pub signer: Signer,
    pub signer_id: String,
    pub cert: Option<AuditDelegationCert>,
    pub sig: [u8; 64],
    /// Populated only for entries written during a UAK rotation overlap
    /// window; verifiers accept either `sig` or `sig_new`.
    pub sig_new: Option<[u8; 64]>,
}

/// The single-record counter backing `{seqNum, previousHash, msVersion, instanceId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCounter {
    pub seq_num: u64,
    pub previous_hash: [u8; 32],
    pub ms_version: u32,
    pub instance_id: String,
}

impl AuditCounter {
    pub fn genesis(instance_id: String, ms_version: u32) -> Self {
        Self { seq_num: 0, previous_hash: [0u8; 32], ms_version, instance_id }
    }
}

/// Result of walking the chain end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub ok: bool,
    pub first_bad_seq: Option<u64>,
}
