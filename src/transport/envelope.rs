//! Wire envelope for cross-boundary messages.
//!
//! An envelope pairs an opaque payload with the routing and tracing
//! attributes the transport needs, independent of the broker carrying it.
//! Attributes travel as a flat string map so any queue system that supports
//! message attributes can carry them bit-exactly.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::DispatchError;

/// Attribute names as they appear on the wire. These are a compatibility
/// surface; renaming one breaks every consumer already in production.
pub mod attribute_keys {
    pub const MESSAGE_ID: &str = "MessageId";
    pub const CORRELATION_ID: &str = "CorrelationId";
    pub const CAUSATION_ID: &str = "CausationId";
    pub const TENANT_ID: &str = "TenantId";
    pub const PAYLOAD_TYPE: &str = "PayloadType";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const CONTENT_TYPE: &str = "ContentType";
    pub const TRACE_PARENT: &str = "TraceParent";
    pub const TRACE_STATE: &str = "TraceState";
}

/// A message as it travels across a process boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Unique per envelope; the transport-level dedup key.
    pub message_id: Uuid,
    /// Correlation id carried from the originating context.
    pub correlation_id: Uuid,
    /// Id of the message that caused this one, if any.
    pub causation_id: Option<Uuid>,
    /// Tenant discriminator for multi-tenant topologies.
    pub tenant_id: Option<String>,
    /// Message-type token used to resolve the payload type on the far side.
    pub payload_type: String,
    /// Milliseconds since the Unix epoch at send time.
    pub timestamp: i64,
    /// W3C trace context propagation fields.
    pub trace_parent: Option<String>,
    pub trace_state: Option<String>,
    /// MIME type of the payload bytes.
    pub content_type: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
}

impl MessageEnvelope {
    /// Build an envelope for a payload, stamping a fresh message id and the
    /// current time.
    pub fn new(
        correlation_id: Uuid,
        payload_type: impl Into<String>,
        content_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id,
            causation_id: None,
            tenant_id: None,
            payload_type: payload_type.into(),
            timestamp: Utc::now().timestamp_millis(),
            trace_parent: None,
            trace_state: None,
            content_type: content_type.into(),
            payload,
        }
    }

    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_trace_context(
        mut self,
        trace_parent: impl Into<String>,
        trace_state: Option<String>,
    ) -> Self {
        self.trace_parent = Some(trace_parent.into());
        self.trace_state = trace_state;
        self
    }

    /// Flatten the envelope metadata into wire attributes. Optional fields
    /// that are unset produce no key at all.
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attributes = HashMap::new();
        attributes.insert(
            attribute_keys::MESSAGE_ID.to_string(),
            self.message_id.to_string(),
        );
        attributes.insert(
            attribute_keys::CORRELATION_ID.to_string(),
            self.correlation_id.to_string(),
        );
        if let Some(causation_id) = self.causation_id {
            attributes.insert(
                attribute_keys::CAUSATION_ID.to_string(),
                causation_id.to_string(),
            );
        }
        if let Some(tenant_id) = &self.tenant_id {
            attributes.insert(attribute_keys::TENANT_ID.to_string(), tenant_id.clone());
        }
        attributes.insert(
            attribute_keys::PAYLOAD_TYPE.to_string(),
            self.payload_type.clone(),
        );
        attributes.insert(
            attribute_keys::TIMESTAMP.to_string(),
            self.timestamp.to_string(),
        );
        attributes.insert(
            attribute_keys::CONTENT_TYPE.to_string(),
            self.content_type.clone(),
        );
        if let Some(trace_parent) = &self.trace_parent {
            attributes.insert(
                attribute_keys::TRACE_PARENT.to_string(),
                trace_parent.clone(),
            );
        }
        if let Some(trace_state) = &self.trace_state {
            attributes.insert(attribute_keys::TRACE_STATE.to_string(), trace_state.clone());
        }
        attributes
    }

    /// Rebuild an envelope from wire attributes and the raw payload.
    pub fn from_attributes(
        attributes: &HashMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<Self, DispatchError> {
        let message_id = required_uuid(attributes, attribute_keys::MESSAGE_ID)?;
        let correlation_id = required_uuid(attributes, attribute_keys::CORRELATION_ID)?;
        let causation_id = attributes
            .get(attribute_keys::CAUSATION_ID)
            .map(|raw| parse_uuid(attribute_keys::CAUSATION_ID, raw))
            .transpose()?;
        let payload_type = required(attributes, attribute_keys::PAYLOAD_TYPE)?.clone();
        let timestamp = required(attributes, attribute_keys::TIMESTAMP)?
            .parse::<i64>()
            .map_err(|e| {
                DispatchError::serialization(format!(
                    "invalid {} attribute: {e}",
                    attribute_keys::TIMESTAMP
                ))
            })?;
        let content_type = required(attributes, attribute_keys::CONTENT_TYPE)?.clone();

        Ok(Self {
            message_id,
            correlation_id,
            causation_id,
            tenant_id: attributes.get(attribute_keys::TENANT_ID).cloned(),
            payload_type,
            timestamp,
            trace_parent: attributes.get(attribute_keys::TRACE_PARENT).cloned(),
            trace_state: attributes.get(attribute_keys::TRACE_STATE).cloned(),
            content_type,
            payload,
        })
    }
}

fn required<'a>(
    attributes: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a String, DispatchError> {
    attributes
        .get(key)
        .ok_or_else(|| DispatchError::serialization(format!("missing {key} attribute")))
}

fn required_uuid(attributes: &HashMap<String, String>, key: &str) -> Result<Uuid, DispatchError> {
    parse_uuid(key, required(attributes, key)?)
}

fn parse_uuid(key: &str, raw: &str) -> Result<Uuid, DispatchError> {
    Uuid::parse_str(raw)
        .map_err(|e| DispatchError::serialization(format!("invalid {key} attribute: {e}")))
}

/// Unwrap a fan-out notification wrapper, if the body is one.
///
/// Queue subscriptions fed by a pub/sub topic receive the original message
/// wrapped in a JSON notification document: the real payload sits in the
/// `Message` field and the attributes in `MessageAttributes` as
/// `{"Type": ..., "Value": ...}` objects. Returns `None` when the body is
/// not such a wrapper, in which case it should be treated as a plain
/// message.
pub fn unwrap_notification(body: &[u8]) -> Option<(Vec<u8>, HashMap<String, String>)> {
    let document: Value = serde_json::from_slice(body).ok()?;
    let object = document.as_object()?;
    if object.get("Type").and_then(Value::as_str) != Some("Notification") {
        return None;
    }
    let message = object.get("Message")?.as_str()?;

    let mut attributes = HashMap::new();
    if let Some(raw_attributes) = object.get("MessageAttributes").and_then(Value::as_object) {
        for (key, entry) in raw_attributes {
            if let Some(value) = entry.get("Value").and_then(Value::as_str) {
                attributes.insert(key.clone(), value.to_string());
            }
        }
    }
    Some((message.as_bytes().to_vec(), attributes))
}
