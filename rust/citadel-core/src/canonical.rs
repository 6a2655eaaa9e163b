//! Canonical JSON encoding.
//!
//! Every record that is signed or hashed is first reduced to its canonical
//! byte form: UTF-8 JSON with object keys sorted ascending, no whitespace
//! between tokens, numbers in their minimal form, and no trailing newline.
//! The canonical form is a pure function of the record's abstract value, so
//! two structurally equal records always hash and verify identically.

use serde::Serialize;
use serde_json::Value;

/// Errors produced while canonicalizing a record.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    /// The record cannot be represented as JSON (e.g. a non-finite float or
    /// a map with non-string keys).
    #[error("record cannot be canonicalized: {0}")]
    InvalidRecord(#[from] serde_json::Error),
}

/// Serialize `value` to canonical JSON bytes.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_value(&value, &mut out);
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // serde_json maps preserve insertion order; canonical form sorts
            // keys by byte value.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(&map[key], out);
            }
            out.push(b'}');
        }
    }
}

/// Write a JSON string token with minimal escaping. Non-ASCII characters are
/// emitted as raw UTF-8, not `\u` escapes.
fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\x08' => out.extend_from_slice(b"\\b"),
            '\x0c' => out.extend_from_slice(b"\\f"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(value: &Value) -> String {
        String::from_utf8(to_canonical_json(value).unwrap()).unwrap()
    }

    #[test]
    fn test_keys_sorted_no_whitespace() {
        let value = json!({"zeta": 1, "alpha": {"b": 2, "a": 1}, "mid": [1, 2]});
        assert_eq!(
            canon(&value),
            r#"{"alpha":{"a":1,"b":2},"mid":[1,2],"zeta":1}"#
        );
    }

    #[test]
    fn test_deterministic_across_insertion_orders() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(to_canonical_json(&a).unwrap(), to_canonical_json(&b).unwrap());
    }

    #[test]
    fn test_scalars() {
        assert_eq!(canon(&json!(null)), "null");
        assert_eq!(canon(&json!(true)), "true");
        assert_eq!(canon(&json!(42)), "42");
        assert_eq!(canon(&json!(-7)), "-7");
        assert_eq!(canon(&json!("hi")), r#""hi""#);
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(canon(&json!("a\"b")), r#""a\"b""#);
        assert_eq!(canon(&json!("a\\b")), r#""a\\b""#);
        assert_eq!(canon(&json!("line\nbreak")), r#""line\nbreak""#);
        assert_eq!(canon(&json!("\u{1}")), "\"\\u0001\"");
        // Non-ASCII stays raw UTF-8.
        assert_eq!(canon(&json!("héllo")), "\"héllo\"");
    }

    #[test]
    fn test_no_trailing_newline() {
        let bytes = to_canonical_json(&json!({"a": 1})).unwrap();
        assert_ne!(*bytes.last().unwrap(), b'\n');
    }

    #[test]
    fn test_struct_fields_sorted() {
        #[derive(serde::Serialize)]
        struct Record {
            version: u64,
            alpha: String,
        }
        let record = Record {
            version: 3,
            alpha: "x".to_string(),
        };
        assert_eq!(
            String::from_utf8(to_canonical_json(&record).unwrap()).unwrap(),
            r#"{"alpha":"x","version":3}"#
        );
    }
}
