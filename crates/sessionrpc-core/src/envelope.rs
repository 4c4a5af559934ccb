//! Wire envelopes exchanged between caller and dispatcher.
//!
//! ```text
//! call:     {"args": [arg, ...]}
//! success:  {"response": value, "pushPayload": value|null}
//! failure:  {"exception": "message", "pushPayload": value|null}
//! ```
//!
//! Each `arg`, `response` and `pushPayload` is encoded with the endpoint's
//! [`TypeRegistry`], so registered types carry their tag.

use crate::codec::{self, TypeRegistry, WireBlob};
use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Arguments of one call, as sent by a proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CallEnvelope {
    pub fn new(args: Vec<Value>) -> Self {
        Self { args }
    }

    pub fn to_blob(&self) -> Result<WireBlob> {
        Ok(WireBlob::new(serde_json::to_string(self)?))
    }

    pub fn from_blob(blob: &WireBlob) -> Result<Self> {
        Ok(serde_json::from_str(blob.as_str())?)
    }
}

/// Outcome of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    // Listed first: untagged matching must try the variant with a required field.
    Failure {
        exception: String,
        #[serde(rename = "pushPayload", default)]
        push_payload: Option<Value>,
    },
    Success {
        #[serde(default)]
        response: Value,
        #[serde(rename = "pushPayload", default)]
        push_payload: Option<Value>,
    },
}

impl ResponseEnvelope {
    pub fn success(response: Value, push_payload: Option<Value>) -> Self {
        ResponseEnvelope::Success {
            response,
            push_payload,
        }
    }

    pub fn failure(exception: impl Into<String>, push_payload: Option<Value>) -> Self {
        ResponseEnvelope::Failure {
            exception: exception.into(),
            push_payload,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseEnvelope::Success { .. })
    }

    pub fn push_payload(&self) -> Option<&Value> {
        match self {
            ResponseEnvelope::Success { push_payload, .. }
            | ResponseEnvelope::Failure { push_payload, .. } => push_payload.as_ref(),
        }
    }

    pub fn exception(&self) -> Option<&str> {
        match self {
            ResponseEnvelope::Failure { exception, .. } => Some(exception),
            ResponseEnvelope::Success { .. } => None,
        }
    }

    /// Split into `(response, pushPayload)`, turning an exception into
    /// [`RpcError::Remote`].
    pub fn into_parts(self) -> Result<(Value, Option<Value>)> {
        match self {
            ResponseEnvelope::Success {
                response,
                push_payload,
            } => Ok((response, push_payload)),
            ResponseEnvelope::Failure { exception, .. } => Err(RpcError::Remote(exception)),
        }
    }

    pub fn to_blob(&self) -> Result<WireBlob> {
        Ok(WireBlob::new(serde_json::to_string(self)?))
    }

    pub fn from_blob(blob: &WireBlob) -> Result<Self> {
        Ok(serde_json::from_str(blob.as_str())?)
    }
}

/// Positional call arguments bound to the type registry that decodes them.
#[derive(Debug, Clone)]
pub struct Args {
    values: Vec<Value>,
    types: Arc<TypeRegistry>,
}

impl Args {
    pub fn new(values: Vec<Value>, types: Arc<TypeRegistry>) -> Self {
        Self { values, types }
    }

    /// Decode a call envelope blob.
    pub fn from_blob(blob: &WireBlob, types: Arc<TypeRegistry>) -> Result<Self> {
        let envelope = CallEnvelope::from_blob(blob)?;
        Ok(Self::new(envelope.args, types))
    }

    /// Decode argument `index` as `T`. A missing argument decodes from `null`,
    /// so optional parameters may be omitted by the caller.
    pub fn get<T>(&self, index: usize) -> Result<T>
    where
        T: DeserializeOwned + 'static,
    {
        let value = self.values.get(index).cloned().unwrap_or(Value::Null);
        codec::decode(value, &self.types).map_err(|e| match e {
            RpcError::Codec { message, source } => RpcError::Codec {
                message: format!("argument {}: {}", index, message),
                source,
            },
            other => other,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }
}
