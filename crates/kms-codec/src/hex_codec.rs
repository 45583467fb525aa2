//! Hex codec, used for display of hashes and thumbprints in audit `details`/logs.

use crate::error::{CodecError, Result};

/// Encode bytes as lowercase hex.
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(bytes)
}

/// Decode a hex string back to bytes.
pub fn decode(s: impl AsRef<str>) -> Result<Vec<u8>> {
    hex::decode(s.as_ref()).map_err(|e| CodecError::InvalidHex(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let bytes = [0u8, 1, 2, 255, 128];
        assert_eq!(decode(encode(bytes)).unwrap(), bytes);
    }

    #[test]
    fn rejects_odd_length() {
        assert!(decode("abc").is_err());
    }
}
