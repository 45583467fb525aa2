//! Canonical JSON construction for AEAD additional authenticated data (AAD)
//! and for the audit chain's signed payload.
//!
//! `serde_json::Map` is a `BTreeMap` unless the `preserve_order` feature is
//! enabled (it isn't, anywhere in this workspace), so inserting fields in any
//! order and serializing with `serde_json::to_vec` already yields
//! lexicographically key-sorted, whitespace-free JSON. `Canonical` exists so
//! every caller binds byte-valued fields the same way (base64url, never raw
//! bytes) instead of each AAD site improvising its own encoding.

use serde_json::{Map, Value};

use crate::base64url;
use crate::error::{CodecError, Result};

/// A single AAD/signed-payload field value.
#[derive(Debug, Clone)]
pub enum Field {
    /// Raw bytes, always base64url-encoded before serialization.
    Bytes(Vec<u8>),
    /// An already-textual value (e.g. an enum tag, a kid, a purpose string).
    Str(String),
    /// An integer counter or timestamp.
    U64(u64),
    /// A signed integer (e.g. a duration in seconds).
    I64(i64),
    /// A boolean flag.
    Bool(bool),
    /// An array of strings, e.g. a delegation cert's `scope`. Element order
    /// is meaningful and preserved; only object keys get sorted.
    StrArray(Vec<String>),
    /// A nested canonical object, for fields like `cert` inside an audit entry.
    Object(Canonical),
    /// An already-built `serde_json::Value`, for fields whose shape this
    /// crate doesn't know ahead of time (e.g. an audit entry's `details`).
    /// Safe to nest here because `serde_json::Value::Object` is itself
    /// `BTreeMap`-backed and sorts its own keys independently.
    Json(Value),
    /// Absence of a field — recorded so `None` and "field omitted" are the
    /// same thing rather than serializing as JSON `null`.
    Omit,
}

impl From<&[u8]> for Field {
    fn from(v: &[u8]) -> Self {
        Field::Bytes(v.to_vec())
    }
}
impl From<Vec<u8>> for Field {
    fn from(v: Vec<u8>) -> Self {
        Field::Bytes(v)
    }
}
impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Str(v.to_string())
    }
}
impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::Str(v)
    }
}
impl From<u64> for Field {
    fn from(v: u64) -> Self {
        Field::U64(v)
    }
}
impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::I64(v)
    }
}
impl From<bool> for Field {
    fn from(v: bool) -> Self {
        Field::Bool(v)
    }
}
impl From<Vec<String>> for Field {
    fn from(v: Vec<String>) -> Self {
        Field::StrArray(v)
    }
}
impl From<Value> for Field {
    fn from(v: Value) -> Self {
        Field::Json(v)
    }
}

/// A canonical, key-sorted JSON object builder.
#[derive(Debug, Clone, Default)]
pub struct Canonical {
    fields: Map<String, Value>,
}

impl Canonical {
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    /// Insert a field. Calling this twice with the same key overwrites the
    /// prior value, mirroring `serde_json::Map::insert`.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Field>) -> Self {
        let value = match value.into() {
            Field::Bytes(b) => Value::String(base64url::encode(b)),
            Field::Str(s) => Value::String(s),
            Field::U64(n) => Value::Number(n.into()),
            Field::I64(n) => Value::Number(n.into()),
            Field::Bool(b) => Value::Bool(b),
            Field::StrArray(items) => Value::Array(items.into_iter().map(Value::String).collect()),
            Field::Object(c) => Value::Object(c.fields),
            Field::Json(v) => v,
            Field::Omit => return self,
        };
        self.fields.insert(key.into(), value);
        self
    }

    /// Insert a field only if `value` is `Some`; a `None` leaves the key
    /// entirely absent (not `null`), per the AAD invariant that two objects
    /// with the same captured key-set/values canonicalize identically.
    pub fn field_opt(self, key: impl Into<String>, value: Option<impl Into<Field>>) -> Self {
        match value {
            Some(v) => self.field(key, v),
            None => self,
        }
    }

    /// Serialize to compact, key-sorted JSON bytes.
    pub fn build(self) -> Result<Vec<u8>> {
        serde_json::to_vec(&Value::Object(self.fields))
            .map_err(|e| CodecError::Canonicalization(e.to_string()))
    }
}

impl From<Canonical> for Field {
    fn from(c: Canonical) -> Self {
        Field::Object(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_order_does_not_affect_output() {
        let a = Canonical::new()
            .field("b", "two")
            .field("a", "one")
            .build()
            .unwrap();
        let b = Canonical::new()
            .field("a", "one")
            .field("b", "two")
            .build()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(String::from_utf8(a).unwrap(), r#"{"a":"one","b":"two"}"#);
    }

    #[test]
    fn byte_fields_are_base64url_encoded_not_raw() {
        let out = Canonical::new().field("k", vec![0u8, 1, 2]).build().unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains(&base64url::encode([0u8, 1, 2])));
    }

    #[test]
    fn omitted_optional_field_is_absent_not_null() {
        let out = Canonical::new()
            .field("present", "x")
            .field_opt::<&str>("absent", None)
            .build()
            .unwrap();
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, r#"{"present":"x"}"#);
    }

    #[test]
    fn equal_captured_values_canonicalize_identically() {
        let x = Canonical::new().field("kid", "abc").field("v", 2u64).build().unwrap();
        let y = Canonical::new().field("v", 2u64).field("kid", "abc").build().unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn differing_values_canonicalize_differently() {
        let x = Canonical::new().field("v", 2u64).build().unwrap();
        let y = Canonical::new().field("v", 3u64).build().unwrap();
        assert_ne!(x, y);
    }

    #[test]
    fn nested_object_is_itself_canonical() {
        let inner = Canonical::new().field("z", 1u64).field("a", 2u64);
        let out = Canonical::new().field("cert", inner).build().unwrap();
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, r#"{"cert":{"a":2,"z":1}}"#);
    }
}
