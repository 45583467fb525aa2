//! The wire-stable error code set and the mapping from every leaf crate's
//! error type onto it. `Response::Err` never carries MS, private key
//! bytes, or a passphrase — only one of these codes plus a message.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMethod,
    InvalidParams,
    NotSetup,
    AlreadySetup,
    NotUnlocked,
    BadCredentials,
    KcvMismatch,
    MsAuthFailed,
    WeakPassphrase,
    LastEnrollment,
    KeyNotFound,
    KeyRotated,
    LeaseInvalid,
    QuotaExceeded,
    ReplayDetected,
    InvalidPayload,
    EndpointNotAllowed,
    Timeout,
    CryptoError,
    AuditChainBroken,
}

/// Implemented per leaf crate's error enum so the dispatcher can `?` into
/// an owned error and classify it at the boundary, once, without each
/// handler re-deriving the mapping.
pub trait IntoErrorCode {
    fn error_code(&self) -> ErrorCode;
}

impl IntoErrorCode for kms_master_secret::Error {
    fn error_code(&self) -> ErrorCode {
        use kms_master_secret::{Error, MasterSecretError as E};
        match self {
            Error::MasterSecret(E::WeakPassphrase) => ErrorCode::WeakPassphrase,
            Error::MasterSecret(E::AlreadySetup) => ErrorCode::AlreadySetup,
            Error::MasterSecret(E::NotSetup) => ErrorCode::NotSetup,
            Error::MasterSecret(E::BadCredentials) => ErrorCode::BadCredentials,
            Error::MasterSecret(E::KcvMismatch) => ErrorCode::KcvMismatch,
            Error::MasterSecret(E::MsAuthFailed) => ErrorCode::MsAuthFailed,
            Error::MasterSecret(E::NotUnlocked) => ErrorCode::NotUnlocked,
            Error::MasterSecret(E::LastEnrollment) => ErrorCode::LastEnrollment,
            Error::MasterSecret(E::PrfUnavailable) => ErrorCode::BadCredentials,
            Error::MasterSecret(E::GateCustodyNotImplemented) => ErrorCode::CryptoError,
            Error::MasterSecret(E::EnrollmentNotFound) => ErrorCode::InvalidParams,
            Error::Codec(_) | Error::Kdf(_) | Error::Store(_) | Error::Serde(_) => ErrorCode::CryptoError,
        }
    }
}

impl IntoErrorCode for kms_keys::KeysError {
    fn error_code(&self) -> ErrorCode {
        use kms_keys::KeysError as E;
        match self {
            E::KeyNotFound(_) => ErrorCode::KeyNotFound,
            E::EndpointNotAllowed(_) => ErrorCode::EndpointNotAllowed,
            E::MalformedEndpoint(_) => ErrorCode::InvalidParams,
            E::UnwrapFailed { .. } | E::Codec(_) | E::Store(_) | E::Serde(_) | E::KeyGeneration => ErrorCode::CryptoError,
        }
    }
}

impl IntoErrorCode for kms_audit::AuditError {
    fn error_code(&self) -> ErrorCode {
        use kms_audit::AuditError as E;
        match self {
            E::ChainBroken { .. } => ErrorCode::AuditChainBroken,
            E::MissingCert | E::CertDoesNotCover { .. } | E::SignerIdMismatch | E::Codec(_) | E::Store(_) | E::Serde(_) => ErrorCode::CryptoError,
        }
    }
}

impl IntoErrorCode for kms_lease::Error {
    fn error_code(&self) -> ErrorCode {
        use kms_lease::{Error, LeaseError as E};
        match self {
            Error::Lease(E::TtlOutOfRange) => ErrorCode::InvalidParams,
            Error::Lease(E::NotFound(_)) => ErrorCode::LeaseInvalid,
            Error::Lease(E::Invalid(_, _)) => ErrorCode::LeaseInvalid,
            Error::Lease(E::KeyRotated) => ErrorCode::KeyRotated,
            Error::Lease(E::QuotaExceeded(_)) => ErrorCode::QuotaExceeded,
            Error::Lease(E::ReplayDetected(_)) => ErrorCode::ReplayDetected,
            Error::Lease(E::InvalidPayload(_)) => ErrorCode::InvalidPayload,
            Error::Codec(_) | Error::Kdf(_) | Error::Keys(_) | Error::Audit(_) | Error::Serde(_) | Error::Signature => ErrorCode::CryptoError,
        }
    }
}

impl IntoErrorCode for kms_unlock::Error {
    fn error_code(&self) -> ErrorCode {
        use kms_unlock::{Error, UnlockError as E};
        match self {
            Error::Unlock(E::NotUnlocked(_)) => ErrorCode::NotUnlocked,
            Error::Unlock(E::Expired(_)) => ErrorCode::NotUnlocked,
            Error::MasterSecret(e) => e.error_code(),
            Error::Keys(e) => e.error_code(),
            Error::Kdf(_) => ErrorCode::CryptoError,
        }
    }
}
