//! Type-preserving serialization.
//!
//! Values are JSON. A value whose Rust type is present in the [`TypeRegistry`]
//! is wrapped as `{"$type": tag, "$value": ...}` so the receiving side rebuilds
//! the same declared type; anything else is written plain.
//!
//! Decoding is strict for registered tags (a tag naming a different type than
//! the requested one is a [`RpcError::TypeMismatch`]) and lossy for unknown
//! tags and plain values: fields the target type does not declare are dropped.
//! Only the top-level value carries a tag.

mod registry;

pub use registry::TypeRegistry;

use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::fmt;

pub const TYPE_KEY: &str = "$type";
pub const VALUE_KEY: &str = "$value";

/// Serialized form of a value as it travels on the wire or sits in a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireBlob(String);

impl WireBlob {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for WireBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode `value` to JSON, tagging it when its type is registered.
pub fn encode<T>(value: &T, types: &TypeRegistry) -> Result<Value>
where
    T: Serialize + 'static,
{
    let plain = serde_json::to_value(value)?;
    Ok(match types.tag_of::<T>() {
        Some(tag) => {
            let mut tagged = Map::with_capacity(2);
            tagged.insert(TYPE_KEY.to_string(), Value::String(tag.to_string()));
            tagged.insert(VALUE_KEY.to_string(), plain);
            Value::Object(tagged)
        }
        None => plain,
    })
}

/// Decode a JSON value produced by [`encode`] into `T`.
///
/// Decoding into [`serde_json::Value`] returns the input untouched.
pub fn decode<T>(value: Value, types: &TypeRegistry) -> Result<T>
where
    T: DeserializeOwned + 'static,
{
    if TypeId::of::<T>() == TypeId::of::<Value>() {
        let raw: Box<dyn Any> = Box::new(value);
        return raw.downcast::<T>().map(|typed| *typed).map_err(|_| RpcError::Other(
            "raw value downcast failed".to_string(),
        ));
    }

    match split_tagged(value) {
        Ok((tag, inner)) if types.contains_tag(&tag) => {
            let built = types
                .construct(&tag, inner)
                .ok_or_else(|| RpcError::Other(format!("type tag {} vanished", tag)))??;
            built
                .downcast::<T>()
                .map(|typed| *typed)
                .map_err(|_| RpcError::TypeMismatch {
                    expected: std::any::type_name::<T>().to_string(),
                    found: tag,
                })
        }
        // Unknown tag: fall back to a structural decode of the payload.
        Ok((_, inner)) => Ok(serde_json::from_value(inner)?),
        Err(plain) => Ok(serde_json::from_value(plain)?),
    }
}

/// Tag carried by an encoded value, if any.
pub fn tag_of_value(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if is_tagged(map) => map.get(TYPE_KEY).and_then(Value::as_str),
        _ => None,
    }
}

/// Serialize `value` into a wire blob.
pub fn serialize<T>(value: &T, types: &TypeRegistry) -> Result<WireBlob>
where
    T: Serialize + 'static,
{
    let encoded = encode(value, types)?;
    Ok(WireBlob(serde_json::to_string(&encoded)?))
}

/// Deserialize a wire blob produced by [`serialize`].
pub fn deserialize<T>(blob: &WireBlob, types: &TypeRegistry) -> Result<T>
where
    T: DeserializeOwned + 'static,
{
    let value: Value = serde_json::from_str(blob.as_str())?;
    decode(value, types)
}

fn is_tagged(map: &Map<String, Value>) -> bool {
    map.len() == 2
        && map.get(TYPE_KEY).map(Value::is_string).unwrap_or(false)
        && map.contains_key(VALUE_KEY)
}

/// Split a tagged value into `(tag, payload)`, or hand the plain value back.
fn split_tagged(value: Value) -> std::result::Result<(String, Value), Value> {
    match value {
        Value::Object(mut map) if is_tagged(&map) => {
            let inner = map.remove(VALUE_KEY).unwrap_or(Value::Null);
            match map.remove(TYPE_KEY) {
                Some(Value::String(tag)) => Ok((tag, inner)),
                _ => Err(inner),
            }
        }
        other => Err(other),
    }
}
