use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A named event delivered over the internal bus.
///
/// Notes:
/// - `event_id` is the idempotency key: redelivering the same envelope must
///   not repeat work a durable function already completed for it.
/// - `payload` is free-form JSON interpreted by the receiving function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: Uuid,
    name: String,
    payload: JsonValue,
    occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(name: impl Into<String>, payload: JsonValue) -> Self {
        Self::with_id(Uuid::now_v7(), name, payload)
    }

    /// Build an envelope with a caller-supplied id (redelivery, dedup by sender).
    pub fn with_id(event_id: Uuid, name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            event_id,
            name: name.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
