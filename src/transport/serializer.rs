//! Payload serialization for the transport boundary.
//!
//! The serializer trait is object-safe so transports can carry one behind a
//! pointer; typed encode/decode helpers layer serde on top for callers that
//! know their payload type.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::DispatchError;

/// Converts between payload bytes and a self-describing JSON value.
pub trait MessageSerializer: Send + Sync {
    /// MIME type stamped on envelopes produced with this serializer.
    fn content_type(&self) -> &'static str;

    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, DispatchError>;

    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, DispatchError>;
}

/// Encode a typed payload through a serializer.
pub fn encode<T: Serialize>(
    serializer: &dyn MessageSerializer,
    payload: &T,
) -> Result<Vec<u8>, DispatchError> {
    let value = serde_json::to_value(payload)?;
    serializer.to_bytes(&value)
}

/// Decode payload bytes into a typed value.
pub fn decode<T: DeserializeOwned>(
    serializer: &dyn MessageSerializer,
    bytes: &[u8],
) -> Result<T, DispatchError> {
    let value = serializer.from_bytes(bytes)?;
    Ok(serde_json::from_value(value)?)
}

/// JSON serializer, the default for all built-in transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, DispatchError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, DispatchError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
