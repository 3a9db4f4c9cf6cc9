//! Canonical JSON serialization for deterministic hashing.
//!
//! Object IDs are derived from serialized bytes, so serialization must be
//! deterministic: object keys sorted lexicographically (UTF-8 byte order),
//! no whitespace, UTF-8 output, and floats rejected outright because their
//! stringification is not portable. Use integers for all numeric values.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during canonical JSON serialization.
#[derive(Debug, Error)]
pub enum CanonicalError {
    /// Serde JSON conversion failed.
    #[error("serde_json error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Float values are not allowed in canonical JSON.
    #[error("float values are not allowed in canonical JSON (use integers)")]
    FloatNotAllowed,
}

/// Serializes `value` into canonical JSON bytes.
///
/// # Errors
///
/// Returns `CanonicalError::Serde` if serialization fails, or
/// `CanonicalError::FloatNotAllowed` if the value contains floats.
#[must_use = "canonical bytes should be used for hashing"]
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let v = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_value(&v, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if n.is_f64() {
                return Err(CanonicalError::FloatNotAllowed);
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => {
            // serde_json's string writer handles escaping; strings alone
            // cannot fail to serialize.
            let escaped = serde_json::to_vec(s).expect("string serialization is infallible");
            out.extend_from_slice(&escaped);
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                let escaped = serde_json::to_vec(key).expect("string serialization is infallible");
                out.extend_from_slice(&escaped);
                out.push(b':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Sample {
        zulu: u32,
        alpha: &'static str,
    }

    #[test]
    fn object_keys_are_sorted() {
        let bytes = to_canonical_bytes(&Sample { zulu: 1, alpha: "x" }).unwrap();
        assert_eq!(bytes, br#"{"alpha":"x","zulu":1}"#);
    }

    #[test]
    fn map_iteration_order_does_not_leak() {
        let mut map = HashMap::new();
        map.insert("b", 2);
        map.insert("a", 1);
        map.insert("c", 3);
        let bytes = to_canonical_bytes(&map).unwrap();
        assert_eq!(bytes, br#"{"a":1,"b":2,"c":3}"#);
    }

    #[test]
    fn floats_are_rejected() {
        let err = to_canonical_bytes(&serde_json::json!({"x": 1.5})).unwrap_err();
        assert!(matches!(err, CanonicalError::FloatNotAllowed));
    }

    #[test]
    fn no_whitespace_in_output() {
        let bytes = to_canonical_bytes(&serde_json::json!({"a": [1, 2], "b": null})).unwrap();
        assert!(!bytes.contains(&b' '));
        assert_eq!(bytes, br#"{"a":[1,2],"b":null}"#);
    }

    #[test]
    fn strings_are_escaped() {
        let bytes = to_canonical_bytes(&serde_json::json!({"k": "a\"b"})).unwrap();
        assert_eq!(bytes, br#"{"k":"a\"b"}"#);
    }
}
