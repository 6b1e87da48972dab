//! Serializes key values into byte-lexically orderable strings.
//!
//! Numbers are encoded so that string order matches numeric order: the
//! IEEE-754 bit pattern is reinterpreted as an unsigned integer, the sign bit
//! is flipped for non-negative numbers, and all bits are inverted for
//! negative numbers (the standard trick for total-order float encoding; see
//! the manual `PartialOrd` over `IndexedDBKeyType` in
//! `examples/other_examples/899c4765_servo-servo__components-shared-storage-indexeddb.rs.rs`
//! for the same "key type total order" problem solved via `Ordering` instead
//! of a sortable string). The resulting 64-bit pattern is rendered as 16
//! lowercase hex digits so lexical string order equals numeric order.

use crate::error::{EngineError, EngineResult};
use crate::keypath::KeyPath;
use crate::value::{KeyComponent, KeyOrKeys, KeyValue};

/// Separator joining the components of a compound key. Chosen as a C0
/// control character that item payloads cannot legally place inside a JSON
/// string key component once normalized to our encodings (numbers are hex,
/// booleans are `0`/`1`, dates are numbers) -- the only component kind whose
/// encoding is the value verbatim is plain strings, so this separator must
/// not collide with application string content either. `\u{1}` (SOH) is
/// reserved for exactly this purpose and is never produced by
/// [`serialize_component`].
pub const COMPOUND_KEY_SEPARATOR: &str = "\u{1}";

/// Separator used to join/bracket full-text tokens when a backend lacks
/// FTS3 and the index degrades to a `LIKE`-queried column.
pub const FTS_FALLBACK_SEPARATOR: &str = "^$^";

const NUMBER_HEX_DIGITS: usize = 16;

/// Encode an `f64` so that lexical order of the hex string matches numeric
/// order across the full range (including negative numbers and NaN-free
/// infinities).
#[must_use]
pub fn encode_number(value: f64) -> String {
    let bits = value.to_bits();
    let mapped = if value.is_sign_negative() {
        !bits
    } else {
        bits | (1u64 << 63)
    };
    format!("{mapped:0width$x}", width = NUMBER_HEX_DIGITS)
}

fn serialize_component(component: &KeyComponent) -> String {
    match component {
        KeyComponent::Number(n) => encode_number(*n),
        KeyComponent::Str(s) => s.clone(),
        KeyComponent::Bool(b) => {
            if *b {
                "1".to_string()
            } else {
                "0".to_string()
            }
        }
        KeyComponent::Date(dt) => {
            // Milliseconds since epoch, run through the same number scheme.
            encode_number(dt.timestamp_millis() as f64)
        }
    }
}

/// Serialize a (possibly compound) key value into a single orderable
/// string.
pub fn serialize_key(key: &KeyValue) -> EngineResult<String> {
    match key {
        KeyValue::Single(component) => Ok(serialize_component(component)),
        KeyValue::Compound(components) => {
            if components.is_empty() {
                return Err(EngineError::BadKey {
                    reason: "compound key has no components".to_string(),
                });
            }
            Ok(components
                .iter()
                .map(serialize_component)
                .collect::<Vec<_>>()
                .join(COMPOUND_KEY_SEPARATOR))
        }
    }
}

/// Serialize a value at a keypath directly from an item, dispatching to
/// [`crate::keypath::get_serialized_key_for_keypath`]. Kept here as a
/// re-export point so callers that only need the codec don't need to know
/// about keypath traversal.
pub use crate::keypath::get_serialized_key_for_keypath;

/// Normalize either a single key (itself possibly compound) or an explicit
/// list of keys into a flat list of serialized strings.
///
/// For a compound `keypath`, each element of `keys` must itself be a
/// `KeyValue::Compound` with matching arity; arity mismatches fail with
/// `BadKey`.
pub fn form_list_of_serialized_keys(
    key_or_keys: KeyOrKeys,
    keypath: &crate::keypath::KeyPath,
) -> EngineResult<Vec<String>> {
    let keys: Vec<KeyValue> = match key_or_keys {
        KeyOrKeys::One(key) => vec![key],
        KeyOrKeys::Many(keys) => keys,
    };

    let expected_arity = keypath.paths().len();
    keys.iter()
        .map(|key| {
            let arity = key.components().len();
            if keypath.is_compound() && arity != expected_arity {
                return Err(EngineError::BadKey {
                    reason: format!(
                        "compound key arity mismatch: expected {expected_arity}, got {arity}"
                    ),
                });
            }
            serialize_key(key)
        })
        .collect()
}

/// Serialize a literal JSON key value supplied by a caller at the public API
/// boundary (e.g. `transaction.get(store, json!("k1"))`) against `keypath`.
/// For a single keypath the value is a scalar; for a compound keypath it
/// must be a JSON array whose length matches the keypath's arity.
///
/// # Errors
///
/// Returns `BadKey` if the value's shape doesn't match the keypath's arity
/// or a component is unserializable.
pub fn serialize_literal_key(keypath: &KeyPath, value: &serde_json::Value) -> EngineResult<String> {
    let key = match keypath {
        KeyPath::Single(_) => KeyValue::Single(KeyComponent::from_json(value)?),
        KeyPath::Compound(paths) => {
            let components = value.as_array().ok_or_else(|| EngineError::BadKey {
                reason: "compound key must be supplied as a JSON array".to_string(),
            })?;
            if components.len() != paths.len() {
                return Err(EngineError::BadKey {
                    reason: format!(
                        "compound key arity mismatch: expected {}, got {}",
                        paths.len(),
                        components.len()
                    ),
                });
            }
            KeyValue::Compound(
                components
                    .iter()
                    .map(KeyComponent::from_json)
                    .collect::<EngineResult<Vec<_>>>()?,
            )
        }
    };
    serialize_key(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn booleans_encode_as_single_digits() {
        assert_eq!(serialize_component(&KeyComponent::Bool(true)), "1");
        assert_eq!(serialize_component(&KeyComponent::Bool(false)), "0");
    }

    #[test]
    fn strings_are_verbatim() {
        assert_eq!(
            serialize_component(&KeyComponent::Str("hello".to_string())),
            "hello"
        );
    }

    #[test]
    fn compound_join_uses_reserved_separator() {
        let key = KeyValue::Compound(vec![
            KeyComponent::Str("a".to_string()),
            KeyComponent::Number(1.0),
        ]);
        let serialized = serialize_key(&key).unwrap();
        assert!(serialized.contains(COMPOUND_KEY_SEPARATOR));
    }

    #[test]
    fn empty_compound_is_bad_key() {
        assert!(serialize_key(&KeyValue::Compound(vec![])).is_err());
    }

    #[test]
    fn literal_key_rejects_arity_mismatch() {
        let keypath = KeyPath::compound(["a", "b"]);
        let err = serialize_literal_key(&keypath, &serde_json::json!(["x"])).unwrap_err();
        assert!(matches!(err, EngineError::BadKey { .. }));
    }

    #[test]
    fn literal_key_serializes_single_scalar() {
        let keypath = KeyPath::single("id");
        let serialized = serialize_literal_key(&keypath, &serde_json::json!("k1")).unwrap();
        assert_eq!(serialized, "k1");
    }

    proptest! {
        #[test]
        fn number_ordering_matches_numeric_ordering(a: f64, b: f64) {
            // Exclude NaN: it has no defined total order and the spec only
            // promises ordering for intended (comparable) values.
            prop_assume!(!a.is_nan() && !b.is_nan());
            let ea = encode_number(a);
            let eb = encode_number(b);
            match a.partial_cmp(&b).unwrap() {
                std::cmp::Ordering::Less => prop_assert!(ea < eb),
                std::cmp::Ordering::Greater => prop_assert!(ea > eb),
                std::cmp::Ordering::Equal => prop_assert_eq!(ea, eb),
            }
        }

        #[test]
        fn encoded_numbers_are_fixed_width(n: f64) {
            prop_assume!(!n.is_nan());
            prop_assert_eq!(encode_number(n).len(), NUMBER_HEX_DIGITS);
        }
    }
}
