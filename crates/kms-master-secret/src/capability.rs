//! `EnrollmentCapability`: turn a method's stored params plus a caller's
//! secret into the KEK that wraps the Master Secret, and the AAD it binds.

use kms_codec::aad::Canonical;
use kms_kdf::{derive_kek_pbkdf2, derive_ms_wrapping_key};
use zeroize::Zeroizing;

use crate::error::{MasterSecretError, Result};
use crate::model::{EnrollmentMethod, Secret, KMS_VERSION, MS_AAD_PURPOSE};

pub const ALG_VERSION: u32 = 1;

pub trait EnrollmentCapability {
    fn derive_kek(&self, secret: &Secret) -> Result<Zeroizing<[u8; 32]>>;
    fn build_aad(&self) -> Result<Vec<u8>>;
}

impl EnrollmentCapability for EnrollmentMethod {
    fn derive_kek(&self, secret: &Secret) -> Result<Zeroizing<[u8; 32]>> {
        match (self, secret) {
            (EnrollmentMethod::Passphrase(p), Secret::Passphrase(passphrase)) => {
                Ok(derive_kek_pbkdf2(passphrase.as_bytes(), &p.kdf.salt, p.kdf.iterations))
            }
            (EnrollmentMethod::PasskeyPrf(p), Secret::PasskeyPrf { prf_output }) => {
                Ok(derive_ms_wrapping_key(prf_output, &p.hkdf_salt, &p.app_salt)?)
            }
            (EnrollmentMethod::PasskeyGate(_), Secret::PasskeyGate { unwrapped_pepper }) => {
                // The unwrapped pepper *is* the KEK; a passkey-gate
                // enrollment never runs a second KDF pass over it.
                Ok(Zeroizing::new(**unwrapped_pepper))
            }
            _ => Err(MasterSecretError::BadCredentials.into()),
        }
    }

    fn build_aad(&self) -> Result<Vec<u8>> {
        let bytes = Canonical::new()
            .field("kmsVersion", KMS_VERSION as u64)
            .field("method", self.tag())
            .field("algVersion", ALG_VERSION as u64)
            .field("purpose", MS_AAD_PURPOSE)
            .field_opt("credentialId", self.credential_id())
            .build()?;
        Ok(bytes)
    }
}
