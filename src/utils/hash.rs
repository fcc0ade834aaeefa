//! Content fingerprinting
//!
//! Raw documents are deduplicated by a SHA-256 digest over the canonical
//! serialization of their payload. Canonical means: object keys sorted,
//! UTF-8, no insignificant whitespace. Two payloads that differ only in key
//! order or formatting therefore share a fingerprint.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// 64-hex SHA-256 digest of the given bytes.
pub fn fingerprint(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Serialize a JSON value with recursively sorted object keys and no
/// insignificant whitespace.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                // Keys and scalars use serde_json's escaping rules
                out.extend_from_slice(
                    serde_json::to_string(key).unwrap_or_default().as_bytes(),
                );
                out.push(b':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push(b'}');
        },
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        },
        scalar => {
            out.extend_from_slice(serde_json::to_string(scalar).unwrap_or_default().as_bytes());
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_64_hex() {
        let digest = fingerprint(b"concurso de acreedores");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let a = json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
        let b = json!({"a": {"y": [1, 2], "z": true}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(
            String::from_utf8(canonical_json(&a)).unwrap(),
            r#"{"a":{"y":[1,2],"z":true},"b":1}"#
        );
    }

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let a = json!({"titulo": "Resolución", "identificador": "BOE-A-2024-1"});
        let b = json!({"identificador": "BOE-A-2024-1", "titulo": "Resolución"});
        assert_eq!(fingerprint(&canonical_json(&a)), fingerprint(&canonical_json(&b)));
    }
}
