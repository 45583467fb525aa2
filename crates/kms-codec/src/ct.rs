//! Constant-time comparison, shared by KCV verification, delegation-cert
//! signature checks, and `jti` replay lookups so none of them roll their own.

use subtle::ConstantTimeEq;

/// Compare two byte slices in constant time with respect to their contents.
///
/// Unequal lengths short-circuit (length is not considered secret here: KCVs,
/// signatures, and `jti` values all have a fixed, public length), but any two
/// inputs of the same length take the same time regardless of where they
/// first differ.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
