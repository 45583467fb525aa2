//! DER <-> P-1363 conversion for P-256 ECDSA signatures, and raw point <-> JWK
//! conversion for P-256 public keys.
//!
//! The wire format the KMS issues (and the one `sign_jwt` must produce) is
//! IEEE P-1363: exactly 64 bytes, `r || s`, each 32 bytes big-endian, no sign
//! padding. WebCrypto / most ECDSA libraries (and the `ecdsa`/`p256` crates)
//! speak DER instead, so every signature crosses this boundary once.

use crate::error::{CodecError, Result};

const FIELD_LEN: usize = 32;

/// Convert a strict DER ECDSA signature to fixed-length P-1363.
///
/// Rejects anything that isn't `SEQUENCE { INTEGER r, INTEGER s }` with no
/// trailing bytes, and any integer whose leading zero byte wasn't required by
/// DER's minimal, sign-safe encoding rule.
pub fn der_to_p1363(der: &[u8]) -> Result<[u8; 64]> {
    let mut cursor = DerCursor::new(der);
    cursor.expect_tag(0x30)?;
    let seq_len = cursor.read_length()?;
    if cursor.remaining() != seq_len {
        return Err(CodecError::InvalidDer(
            "SEQUENCE length does not match remaining bytes".into(),
        ));
    }

    let r = read_der_integer(&mut cursor)?;
    let s = read_der_integer(&mut cursor)?;
    if cursor.remaining() != 0 {
        return Err(CodecError::InvalidDer("trailing bytes after SEQUENCE".into()));
    }

    let mut out = [0u8; 64];
    write_fixed_width(&r, &mut out[0..FIELD_LEN])?;
    write_fixed_width(&s, &mut out[FIELD_LEN..64])?;
    Ok(out)
}

/// Convert fixed-length P-1363 (`r || s`, 64 bytes) to strict minimal DER.
pub fn p1363_to_der(p1363: &[u8]) -> Result<Vec<u8>> {
    if p1363.len() != 64 {
        return Err(CodecError::InvalidP1363Length(p1363.len()));
    }
    let r = encode_der_integer(&p1363[0..FIELD_LEN]);
    let s = encode_der_integer(&p1363[FIELD_LEN..64]);

    let mut body = Vec::with_capacity(r.len() + s.len());
    body.extend_from_slice(&r);
    body.extend_from_slice(&s);

    let mut out = Vec::with_capacity(body.len() + 4);
    out.push(0x30);
    push_length(&mut out, body.len());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Minimal JWK representation this codec needs: an EC P-256 public key.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Jwk {
    pub crv: String,
    pub kty: String,
    pub x: String,
    pub y: String,
}

/// Parse a raw uncompressed P-256 point (65 bytes, `0x04 || x || y`) into a JWK.
pub fn raw_p256_to_jwk(raw: &[u8]) -> Result<Jwk> {
    if raw.len() != 65 {
        return Err(CodecError::InvalidEcPoint(format!(
            "expected 65 bytes, got {}",
            raw.len()
        )));
    }
    if raw[0] != 0x04 {
        return Err(CodecError::InvalidEcPoint(format!(
            "expected uncompressed point prefix 0x04, got {:#04x}",
            raw[0]
        )));
    }
    let x = &raw[1..33];
    let y = &raw[33..65];
    Ok(Jwk {
        crv: "P-256".to_string(),
        kty: "EC".to_string(),
        x: crate::base64url::encode(x),
        y: crate::base64url::encode(y),
    })
}

/// RFC 7638 JWK thumbprint: SHA-256 over the lexicographically key-sorted JSON
/// of `{crv, kty, x, y}`, base64url-encoded.
pub fn jwk_thumbprint(jwk: &Jwk) -> String {
    use sha2::{Digest, Sha256};
    // RFC 7638 mandates lexicographic member order with no whitespace; build
    // it by hand rather than trust a generic serializer's key order.
    let canonical = format!(
        "{{\"crv\":\"{}\",\"kty\":\"{}\",\"x\":\"{}\",\"y\":\"{}\"}}",
        jwk.crv, jwk.kty, jwk.x, jwk.y
    );
    let digest = Sha256::digest(canonical.as_bytes());
    crate::base64url::encode(digest)
}

fn read_der_integer(cursor: &mut DerCursor) -> Result<Vec<u8>> {
    cursor.expect_tag(0x02)?;
    let len = cursor.read_length()?;
    let bytes = cursor.take(len)?;
    if bytes.is_empty() {
        return Err(CodecError::InvalidDer("empty INTEGER".into()));
    }
    if bytes.len() > 1 && bytes[0] == 0x00 && bytes[1] & 0x80 == 0 {
        return Err(CodecError::InvalidDer(
            "INTEGER has superfluous leading zero byte".into(),
        ));
    }
    Ok(bytes.to_vec())
}

fn encode_der_integer(field: &[u8]) -> Vec<u8> {
    let mut start = 0;
    while start < field.len() - 1 && field[start] == 0 {
        start += 1;
    }
    let trimmed = &field[start..];
    let needs_pad = trimmed[0] & 0x80 != 0;

    let mut out = Vec::with_capacity(trimmed.len() + 3);
    out.push(0x02);
    push_length(&mut out, trimmed.len() + usize::from(needs_pad));
    if needs_pad {
        out.push(0x00);
    }
    out.extend_from_slice(trimmed);
    out
}

fn write_fixed_width(src: &[u8], dst: &mut [u8]) -> Result<()> {
    // Strip a single DER sign-padding byte before checking it fits the field.
    let trimmed = if src.len() == dst.len() + 1 && src[0] == 0 {
        &src[1..]
    } else {
        src
    };
    if trimmed.len() > dst.len() {
        return Err(CodecError::InvalidDer("INTEGER too large for field width".into()));
    }
    let pad = dst.len() - trimmed.len();
    dst[..pad].fill(0);
    dst[pad..].copy_from_slice(trimmed);
    Ok(())
}

fn push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
        let significant = &bytes[first_nonzero..];
        out.push(0x80 | significant.len() as u8);
        out.extend_from_slice(significant);
    }
}

struct DerCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn expect_tag(&mut self, tag: u8) -> Result<()> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| CodecError::InvalidDer("unexpected end of input".into()))?;
        if byte != tag {
            return Err(CodecError::InvalidDer(format!(
                "expected tag {:#04x}, got {:#04x}",
                tag, byte
            )));
        }
        self.pos += 1;
        Ok(())
    }

    fn read_length(&mut self) -> Result<usize> {
        let first = *self
            .data
            .get(self.pos)
            .ok_or_else(|| CodecError::InvalidDer("unexpected end of input".into()))?;
        self.pos += 1;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let count = (first & 0x7f) as usize;
        if count == 0 || count > size_of::<usize>() {
            return Err(CodecError::InvalidDer("unsupported length encoding".into()));
        }
        let bytes = self.take(count)?;
        if bytes[0] == 0 {
            return Err(CodecError::InvalidDer("non-minimal length encoding".into()));
        }
        let mut len = 0usize;
        for &b in bytes {
            len = (len << 8) | b as usize;
        }
        Ok(len)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::InvalidDer("unexpected end of input".into()));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

fn size_of<T>() -> usize {
    std::mem::size_of::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_p1363() -> [u8; 64] {
        let mut buf = [0u8; 64];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(7).wrapping_add(1);
        }
        buf
    }

    #[test]
    fn p1363_der_roundtrip() {
        let p1363 = sample_p1363();
        let der = p1363_to_der(&p1363).unwrap();
        assert_ne!(der[0], 0x30 + 1); // sanity: tag is SEQUENCE
        assert_eq!(der[0], 0x30);
        let back = der_to_p1363(&der).unwrap();
        assert_eq!(back, p1363);
    }

    #[test]
    fn high_bit_components_get_der_padding() {
        let mut p1363 = [0u8; 64];
        p1363[0] = 0xff; // r has high bit set -> DER must pad with 0x00
        p1363[63] = 0x01;
        let der = p1363_to_der(&p1363).unwrap();
        let back = der_to_p1363(&der).unwrap();
        assert_eq!(back, p1363);
    }

    #[test]
    fn all_zero_components_roundtrip() {
        let p1363 = [0u8; 64];
        let der = p1363_to_der(&p1363).unwrap();
        let back = der_to_p1363(&der).unwrap();
        assert_eq!(back, p1363);
    }

    #[test]
    fn rejects_wrong_p1363_length() {
        assert!(p1363_to_der(&[0u8; 63]).is_err());
        assert!(p1363_to_der(&[0u8; 65]).is_err());
    }

    #[test]
    fn rejects_superfluous_leading_zero() {
        // INTEGER 00 00 01 is non-minimal: the first 00 isn't needed for sign.
        let bad_der = vec![
            0x30, 0x08, 0x02, 0x03, 0x00, 0x00, 0x01, 0x02, 0x01, 0x01,
        ];
        assert!(der_to_p1363(&bad_der).is_err());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let p1363 = sample_p1363();
        let mut der = p1363_to_der(&p1363).unwrap();
        der.push(0xAA);
        assert!(der_to_p1363(&der).is_err());
    }

    #[test]
    fn raw_point_requires_prefix_and_length() {
        let mut raw = vec![0x04u8];
        raw.extend(std::iter::repeat(0xAB).take(64));
        assert!(raw_p256_to_jwk(&raw).is_ok());

        let mut bad_prefix = raw.clone();
        bad_prefix[0] = 0x02;
        assert!(raw_p256_to_jwk(&bad_prefix).is_err());

        let too_short = vec![0x04u8; 10];
        assert!(raw_p256_to_jwk(&too_short).is_err());
    }

    #[test]
    fn thumbprint_is_deterministic_and_url_safe() {
        let mut raw = vec![0x04u8];
        raw.extend(std::iter::repeat(0x11).take(64));
        let jwk = raw_p256_to_jwk(&raw).unwrap();
        let a = jwk_thumbprint(&jwk);
        let b = jwk_thumbprint(&jwk);
        assert_eq!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    proptest! {
        #[test]
        fn der_roundtrip_holds_for_arbitrary_fields(
            r in prop::collection::vec(any::<u8>(), 32..=32),
            s in prop::collection::vec(any::<u8>(), 32..=32),
        ) {
            let mut p1363 = [0u8; 64];
            p1363[..32].copy_from_slice(&r);
            p1363[32..].copy_from_slice(&s);
            let der = p1363_to_der(&p1363).unwrap();
            let back = der_to_p1363(&der).unwrap();
            prop_assert_eq!(back, p1363);
        }
    }
}
