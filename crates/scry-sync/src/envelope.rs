//! Event envelope and read-model patch payload types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event envelope delivered by the push transport.
///
/// `kind` is a dot-delimited namespace string (e.g. `models.changed`,
/// `state.read.model.patch`); `time` is the server's RFC 3339 timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub time: String,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Build a synthesized envelope for a lifecycle sentinel. Synthesized
    /// envelopes never arrive from the wire and carry no wire timestamp.
    pub fn synthetic(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            time: String::new(),
            kind: kind.into(),
            payload,
        }
    }
}

/// Payload of a read-model patch event: the model name and the operation
/// list. Operations are kept as raw values so one undecodable op can be
/// skipped without discarding the rest of the batch.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchEvent {
    pub id: String,
    #[serde(default)]
    pub patch: Vec<Value>,
}

impl PatchEvent {
    /// Parse the payload of a read-model patch envelope.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}
