//! HKDF-SHA256 key-derivation chains.
//!
//! Three fixed chains cover every key this KMS ever derives from a secret it
//! already holds: MS -> MKEK, MS -> SessionKEK, and PRF-output -> MS-wrapping-key.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{KdfError, Result};

const MKEK_INFO: &[u8] = b"ATS/KMS/MKEK/v2";
const SESSION_KEK_INFO: &[u8] = b"ATS/KMS/SessionKEK/v2";
const PRF_MS_INFO: &[u8] = b"ATS/KMS/PRF-MS/v2";

/// Generic HKDF-SHA256 extract-and-expand into a freshly allocated buffer.
pub fn hkdf_sha256(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], out_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new(vec![0u8; out_len]);
    hk.expand(info, okm.as_mut())
        .map_err(|_| KdfError::HkdfExpand(out_len))?;
    Ok(okm)
}

fn hkdf_sha256_32(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(info, okm.as_mut())
        .map_err(|_| KdfError::HkdfExpand(32))?;
    Ok(okm)
}

/// Derive the Master KEK from the Master Secret: `HKDF(ikm=MS, salt=None, info="ATS/KMS/MKEK/v2")`.
pub fn derive_mkek(ms: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
    hkdf_sha256_32(ms, None, MKEK_INFO)
}

/// Derive a per-lease SessionKEK from the Master Secret: `HKDF(ikm=MS, salt=leaseSalt, info="ATS/KMS/SessionKEK/v2")`.
pub fn derive_session_kek(ms: &[u8; 32], lease_salt: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
    hkdf_sha256_32(ms, Some(lease_salt.as_slice()), SESSION_KEK_INFO)
}

/// Derive the key that wraps the Master Secret under a passkey PRF output:
/// `HKDF(ikm=prfOutput, salt=hkdfSalt, info=appSalt || "ATS/KMS/PRF-MS/v2")`.
pub fn derive_ms_wrapping_key(prf_output: &[u8], hkdf_salt: &[u8], app_salt: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
    let mut info = Vec::with_capacity(app_salt.len() + PRF_MS_INFO.len());
    info.extend_from_slice(app_salt);
    info.extend_from_slice(PRF_MS_INFO);
    hkdf_sha256_32(prf_output, Some(hkdf_salt), &info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkek_is_deterministic_and_input_bound() {
        let ms_a = [1u8; 32];
        let ms_b = [2u8; 32];
        let k1 = derive_mkek(&ms_a).unwrap();
        let k2 = derive_mkek(&ms_a).unwrap();
        let k3 = derive_mkek(&ms_b).unwrap();
        assert_eq!(*k1, *k2);
        assert_ne!(*k1, *k3);
    }

    #[test]
    fn session_kek_varies_with_lease_salt() {
        let ms = [3u8; 32];
        let salt_a = [4u8; 32];
        let salt_b = [5u8; 32];
        let k1 = derive_session_kek(&ms, &salt_a).unwrap();
        let k2 = derive_session_kek(&ms, &salt_b).unwrap();
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn ms_wrapping_key_binds_app_salt() {
        let prf = [6u8; 32];
        let hkdf_salt = [7u8; 16];
        let app_a = [8u8; 32];
        let app_b = [9u8; 32];
        let k1 = derive_ms_wrapping_key(&prf, &hkdf_salt, &app_a).unwrap();
        let k2 = derive_ms_wrapping_key(&prf, &hkdf_salt, &app_b).unwrap();
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn generic_hkdf_respects_output_length() {
        let out = hkdf_sha256(b"ikm", Some(b"salt"), b"info", 48).unwrap();
        assert_eq!(out.len(), 48);
    }

    #[test]
    fn chains_are_domain_separated() {
        let ms = [10u8; 32];
        let mkek = derive_mkek(&ms).unwrap();
        let session = derive_session_kek(&ms, &[0u8; 32]).unwrap();
        assert_ne!(*mkek, *session);
    }
}
