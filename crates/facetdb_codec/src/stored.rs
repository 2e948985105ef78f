//! Canonical JSON storage form for values.
//!
//! Every attribute value is stored as one JSON string. The form is
//! canonical: map keys are sorted and number formatting is deterministic,
//! so two equal values always serialize to the same string. Strict query
//! comparisons operate directly on these strings.
//!
//! References serialize as the marker array
//! `["facetdb_entity_reference", guid, class]`. Any stored array whose
//! first element is the marker string decodes as a reference; an array that
//! starts with the marker but does not have that shape is rejected as
//! malformed rather than silently treated as data.

use std::collections::BTreeMap;

use crate::error::{CodecError, CodecResult};
use crate::reference::{Guid, Reference, REF_MARKER};
use crate::value::Value;

/// Serialize a value to its canonical stored JSON string.
///
/// # Errors
///
/// Fails with [`CodecError::NonFiniteFloat`] when the value contains a NaN
/// or infinite float.
pub fn to_stored(value: &Value) -> CodecResult<String> {
    let json = to_json(value)?;
    serde_json::to_string(&json).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Parse a stored JSON string back into a value.
///
/// # Errors
///
/// Fails when the string is not valid JSON, or when a reference marker
/// array is malformed.
pub fn from_stored(stored: &str) -> CodecResult<Value> {
    let json: serde_json::Value =
        serde_json::from_str(stored).map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    from_json(json)
}

fn to_json(value: &Value) -> CodecResult<serde_json::Value> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int(n) => Ok(serde_json::Value::from(*n)),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or(CodecError::NonFiniteFloat),
        Value::Str(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(to_json(item)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        Value::Map(entries) => {
            let mut out = serde_json::Map::new();
            for (key, entry) in entries {
                out.insert(key.clone(), to_json(entry)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        Value::Ref(r) => Ok(serde_json::Value::Array(vec![
            serde_json::Value::String(REF_MARKER.to_string()),
            serde_json::Value::from(r.guid.get()),
            serde_json::Value::String(r.class.clone()),
        ])),
    }
}

fn from_json(json: serde_json::Value) -> CodecResult<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(CodecError::decoding_failed(format!(
                    "unrepresentable number: {n}"
                )))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Str(s)),
        serde_json::Value::Array(items) => {
            if is_reference_array(&items) {
                decode_reference(items).map(Value::Ref)
            } else {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(from_json(item)?);
                }
                Ok(Value::Array(out))
            }
        }
        serde_json::Value::Object(entries) => {
            let mut out = BTreeMap::new();
            for (key, entry) in entries {
                out.insert(key, from_json(entry)?);
            }
            Ok(Value::Map(out))
        }
    }
}

fn is_reference_array(items: &[serde_json::Value]) -> bool {
    matches!(items.first(), Some(serde_json::Value::String(s)) if s == REF_MARKER)
}

fn decode_reference(items: Vec<serde_json::Value>) -> CodecResult<Reference> {
    if items.len() != 3 {
        return Err(CodecError::malformed_reference(format!(
            "expected 3 elements, found {}",
            items.len()
        )));
    }
    let guid = items[1]
        .as_u64()
        .filter(|g| *g >= 1 && *g <= Guid::MAX)
        .ok_or_else(|| CodecError::malformed_reference("guid must be a positive 63-bit integer"))?;
    let class = items[2]
        .as_str()
        .ok_or_else(|| CodecError::malformed_reference("class must be a string"))?;
    Ok(Reference::new(Guid::new(guid), class))
}
