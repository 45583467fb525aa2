//! Enrollment data model: the three methods by which a user can derive a
//! KEK to wrap/unwrap the Master Secret.

use chrono::{DateTime, Utc};
use kms_kdf::Pbkdf2Params;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const MS_AAD_PURPOSE: &str = "master-secret";
pub const KMS_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassphraseParams {
    pub kdf: Pbkdf2ParamsDto,
}

/// `Pbkdf2Params` carries a non-serializable-by-default timestamp type we
/// want explicit control over; this DTO is the persisted shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pbkdf2ParamsDto {
    pub salt: [u8; 16],
    pub iterations: u32,
    pub platform_hash: [u8; 32],
    pub last_calibrated_at: DateTime<Utc>,
}

impl From<Pbkdf2Params> for Pbkdf2ParamsDto {
    fn from(p: Pbkdf2Params) -> Self {
        Self { salt: p.salt, iterations: p.iterations, platform_hash: p.platform_hash, last_calibrated_at: p.last_calibrated_at }
    }
}

impl From<Pbkdf2ParamsDto> for Pbkdf2Params {
    fn from(p: Pbkdf2ParamsDto) -> Self {
        Self { salt: p.salt, iterations: p.iterations, platform_hash: p.platform_hash, last_calibrated_at: p.last_calibrated_at }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasskeyPrfParams {
    pub credential_id: Vec<u8>,
    pub rp_id: String,
    pub app_salt: [u8; 32],
    pub hkdf_salt: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasskeyGateParams {
    pub credential_id: Vec<u8>,
    pub rp_id: String,
    pub pepper_wrapped: Vec<u8>,
}

/// The method-specific parameters needed to re-derive a KEK for an
/// enrollment. Dispatch-over-variant: each arm knows how to turn its own
/// secret input into a KEK and how to bind its own AAD fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum EnrollmentMethod {
    Passphrase(PassphraseParams),
    PasskeyPrf(PasskeyPrfParams),
    PasskeyGate(PasskeyGateParams),
}

impl EnrollmentMethod {
    pub fn tag(&self) -> &'static str {
        match self {
            EnrollmentMethod::Passphrase(_) => "passphrase",
            EnrollmentMethod::PasskeyPrf(_) => "passkeyPrf",
            EnrollmentMethod::PasskeyGate(_) => "passkeyGate",
        }
    }

    pub fn credential_id(&self) -> Option<&[u8]> {
        match self {
            EnrollmentMethod::Passphrase(_) => None,
            EnrollmentMethod::PasskeyPrf(p) => Some(&p.credential_id),
            EnrollmentMethod::PasskeyGate(p) => Some(&p.credential_id),
        }
    }
}

/// The secret a caller supplies at unlock/setup time. Each variant must
/// line up with the `EnrollmentMethod` arm it's checked against.
pub enum Secret {
    Passphrase(Zeroizing<String>),
    PasskeyPrf { prf_output: Zeroizing<Vec<u8>> },
    /// The pepper, already unwrapped by a `GateUnwrap` collaborator; the
    /// passkey assertion that authorized the unwrap is this crate's
    /// precondition, not something it verifies itself.
    PasskeyGate { unwrapped_pepper: Zeroizing<[u8; 32]> },
}

/// A persisted enrollment: one method, one wrapped copy of the live MS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub enrollment_id: String,
    pub user_id: String,
    pub method: EnrollmentMethod,
    pub encrypted_ms: Vec<u8>,
    pub ms_iv: [u8; 12],
    /// HMAC-SHA256(KEK, "ATS/KMS/KCV/v2"), passphrase enrollments only.
    pub kcv: Option<[u8; 32]>,
    pub ms_version: u32,
    pub alg_version: u32,
    pub created_at: DateTime<Utc>,
}

/// Abstract collaborator for passkey-gate pepper custody. The wrapping
/// protocol between this KMS and whatever holds the pepper is outside
/// this crate's scope; `NotImplementedGateUnwrap` is the default and
/// always errors.
pub trait GateUnwrap: Send + Sync {
    fn unwrap_pepper(&self, pepper_wrapped: &[u8]) -> crate::error::Result<Zeroizing<[u8; 32]>>;
}

pub struct NotImplementedGateUnwrap;

impl GateUnwrap for NotImplementedGateUnwrap {
    fn unwrap_pepper(&self, _pepper_wrapped: &[u8]) -> crate::error::Result<Zeroizing<[u8; 32]>> {
        Err(crate::error::MasterSecretError::GateCustodyNotImplemented.into())
    }
}
