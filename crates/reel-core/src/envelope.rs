//! Type-erased message carried through the registry, the bus and the broker.
use serde_json::Value;

use reel_model::{JobId, Message, MessageKind};

use crate::error::CoreError;

/// A message with its routing name and JSON payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    name: String,
    kind: MessageKind,
    payload: Value,
}

impl Envelope {
    /// Wrap a typed message.
    pub fn of<M: Message>(message: &M) -> Result<Self, CoreError> {
        Ok(Self {
            name: M::NAME.to_string(),
            kind: M::KIND,
            payload: serde_json::to_value(message)?,
        })
    }

    /// Build from raw broker bytes.
    pub fn from_bytes(
        name: impl Into<String>,
        kind: MessageKind,
        bytes: &[u8],
    ) -> Result<Self, CoreError> {
        Ok(Self {
            name: name.into(),
            kind,
            payload: serde_json::from_slice(bytes)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Decode into the typed message.
    pub fn decode<M: Message>(&self) -> Result<M, CoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Returns `true` if this envelope carries an `M`.
    pub fn is<M: Message>(&self) -> bool {
        self.name == M::NAME
    }

    /// Correlation id, read from the payload's `job_id` field.
    pub fn job_id(&self) -> Option<JobId> {
        self.payload
            .get("job_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(&self.payload)?)
    }
}
