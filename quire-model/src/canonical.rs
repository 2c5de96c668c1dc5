//! Canonical JSON.
//!
//! Object keys sorted lexicographically at every depth, no insignificant
//! whitespace, integers in plain decimal. Two semantically identical
//! metadata records always produce the same bytes, and therefore the same id.

use serde::Serialize;
use serde_json::{Map, Value};

/// Serialize `value` to canonical JSON bytes.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&sorted(value))
}

/// Rebuilds every object with its keys in sorted order.
///
/// The default `serde_json` map is already ordered, but a crate in the
/// dependency graph may turn on `preserve_order`.
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k, sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_at_every_depth() {
        let v = json!({"b": 1, "a": {"z": [ {"y": 1, "x": 2} ], "c": null}});
        let bytes = canonical_json(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"c":null,"z":[{"x":2,"y":1}]},"b":1}"#
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut first = Map::new();
        first.insert("one".into(), json!(1));
        first.insert("two".into(), json!(2));
        let mut second = Map::new();
        second.insert("two".into(), json!(2));
        second.insert("one".into(), json!(1));
        assert_eq!(
            canonical_json(&Value::Object(first)).unwrap(),
            canonical_json(&Value::Object(second)).unwrap()
        );
    }

    #[test]
    fn large_integers_stay_decimal() {
        let bytes = canonical_json(&json!({"n": u64::MAX})).unwrap();
        assert_eq!(bytes, br#"{"n":18446744073709551615}"#.to_vec());
    }
}
