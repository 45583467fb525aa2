//! Unpadded base64url codec, used for every byte-valued field this KMS puts on the wire.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::error::{CodecError, Result};

/// Encode bytes as unpadded base64url.
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode unpadded base64url back to bytes.
pub fn decode(s: impl AsRef<str>) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s.as_ref())
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))
}
