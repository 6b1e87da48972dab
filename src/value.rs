//! The dynamic item model: untyped records and the primitive key values that
//! can be extracted from them.
//!
//! Items are modeled as `serde_json::Value` (always a JSON object in
//! practice) since the physical row format is itself JSON text in `nsp_data`.
//! Grounded in the `IndexedDBKeyType`/`KeyPath` enums from
//! `examples/other_examples/899c4765_servo-servo__components-shared-storage-indexeddb.rs.rs`,
//! adapted from an `IndexedDB`-flavored key type to the plain
//! number/string/boolean/date/array primitives this specification allows.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use crate::error::{EngineError, EngineResult};

/// An opaque stored record. Always a JSON object at the top level.
pub type Item = Json;

/// A single primitive value extracted from an item at a keypath.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyComponent {
    Number(f64),
    Str(String),
    Bool(bool),
    Date(DateTime<Utc>),
}

impl KeyComponent {
    /// Convert a JSON scalar into a key component, rejecting objects, arrays,
    /// and null.
    pub fn from_json(value: &Json) -> EngineResult<Self> {
        match value {
            Json::Number(n) => n
                .as_f64()
                .map(KeyComponent::Number)
                .ok_or_else(|| EngineError::BadKey {
                    reason: format!("number out of range: {n}"),
                }),
            Json::String(s) => {
                // RFC 3339 timestamps round-trip through chrono; anything
                // else is a plain string component.
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    Ok(KeyComponent::Date(dt.with_timezone(&Utc)))
                } else {
                    Ok(KeyComponent::Str(s.clone()))
                }
            }
            Json::Bool(b) => Ok(KeyComponent::Bool(*b)),
            other => Err(EngineError::BadKey {
                reason: format!("unserializable key value: {other}"),
            }),
        }
    }
}

/// A key value for a store or index: either a single component (for a
/// non-compound keypath) or an ordered list of components (for a compound
/// keypath).
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Single(KeyComponent),
    Compound(Vec<KeyComponent>),
}

impl KeyValue {
    pub fn components(&self) -> &[KeyComponent] {
        match self {
            KeyValue::Single(c) => std::slice::from_ref(c),
            KeyValue::Compound(cs) => cs,
        }
    }
}

/// Input to [`crate::keycodec::form_list_of_serialized_keys`]: either one key
/// (itself possibly compound) or an explicit list of keys.
pub enum KeyOrKeys {
    One(KeyValue),
    Many(Vec<KeyValue>),
}
