//! Dotted keypath traversal.
//!
//! This is the thin "external collaborator" contract from spec §6
//! (`getValueForSingleKeypath`, `getKeyForKeypath`,
//! `getSerializedKeyForKeypath`, `isCompoundKeyPath`): dotted-path lookup
//! only, no wildcards or array indexing beyond what `multiEntry` needs.

use serde_json::Value as Json;

use crate::error::{EngineError, EngineResult};
use crate::value::{Item, KeyComponent, KeyValue};

/// Either a single dotted path or an ordered list of paths (compound key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    pub fn single(path: impl Into<String>) -> Self {
        KeyPath::Single(path.into())
    }

    pub fn compound<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath::Compound(paths.into_iter().map(Into::into).collect())
    }

    /// A keypath is compound iff it names two or more components.
    #[must_use]
    pub fn is_compound(&self) -> bool {
        matches!(self, KeyPath::Compound(paths) if paths.len() >= 2)
    }

    pub fn paths(&self) -> Vec<&str> {
        match self {
            KeyPath::Single(p) => vec![p.as_str()],
            KeyPath::Compound(ps) => ps.iter().map(String::as_str).collect(),
        }
    }
}

/// Look up the raw JSON value at a single dotted path (e.g. `"a.b.c"`).
/// Returns `None` when any segment is missing or the value is `null`.
pub fn get_value_for_single_keypath<'a>(item: &'a Item, path: &str) -> Option<&'a Json> {
    let mut current = item;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
        if current.is_null() {
            return None;
        }
    }
    Some(current)
}

/// Extract the typed key value for a (possibly compound) keypath.
///
/// Fails with `BadKey` when any component is missing/null or unserializable.
pub fn get_key_for_keypath(item: &Item, keypath: &KeyPath) -> EngineResult<KeyValue> {
    match keypath {
        KeyPath::Single(path) => {
            let value = get_value_for_single_keypath(item, path).ok_or_else(|| EngineError::BadKey {
                reason: format!("missing value at keypath '{path}'"),
            })?;
            Ok(KeyValue::Single(KeyComponent::from_json(value)?))
        }
        KeyPath::Compound(paths) => {
            let mut components = Vec::with_capacity(paths.len());
            for path in paths {
                let value = get_value_for_single_keypath(item, path).ok_or_else(|| EngineError::BadKey {
                    reason: format!("missing value at keypath '{path}'"),
                })?;
                components.push(KeyComponent::from_json(value)?);
            }
            Ok(KeyValue::Compound(components))
        }
    }
}

/// Extract and serialize the key for a keypath in one step.
pub fn get_serialized_key_for_keypath(item: &Item, keypath: &KeyPath) -> EngineResult<String> {
    let key = get_key_for_keypath(item, keypath)?;
    crate::keycodec::serialize_key(&key)
}

/// A multi-entry index's source value: each array element (or the lone
/// scalar) becomes one pivot row. Returns an empty vec when the value is
/// absent, matching "no pivot rows are produced" in spec §4.6.
///
/// Fails with `BadKey` if the array is heterogeneous (mixed primitive
/// types), per the "reject heterogeneous arrays inside multiEntry values"
/// design note.
pub fn get_multi_entry_values(item: &Item, path: &str) -> EngineResult<Vec<KeyComponent>> {
    let Some(value) = get_value_for_single_keypath(item, path) else {
        return Ok(Vec::new());
    };

    match value {
        Json::Array(items) => {
            let mut components = Vec::with_capacity(items.len());
            let mut discriminant = None;
            for entry in items {
                let component = KeyComponent::from_json(entry)?;
                let this_discriminant = std::mem::discriminant(&component);
                match discriminant {
                    None => discriminant = Some(this_discriminant),
                    Some(d) if d == this_discriminant => {}
                    Some(_) => {
                        return Err(EngineError::BadKey {
                            reason: format!("heterogeneous multiEntry array at '{path}'"),
                        });
                    }
                }
                components.push(component);
            }
            Ok(components)
        }
        scalar => Ok(vec![KeyComponent::from_json(scalar)?]),
    }
}
