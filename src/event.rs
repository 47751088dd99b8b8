//! The persisted event record and the aggregate kinds that own streams.
//!
//! No I/O happens here. Backends of the [`EventLog`](crate::EventLog) port
//! produce [`StoredEvent`]s; the folding engine consumes them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The two aggregate kinds this engine folds.
///
/// The string form is the `aggregate_name` stamped on every persisted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    /// A schema-defining object with named sub-events and typed attributes.
    Entity,
    /// A read-model descriptor with tables, columns and processing blocks.
    Projection,
}

impl AggregateKind {
    /// The `aggregate_name` used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Projection => "projection",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable event as persisted by the event log.
///
/// `data` is the serialized payload text exactly as stored. Its shape
/// depends on `event_name`; the fold parses it lazily, so a corrupt payload
/// only affects the event that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Backend-assigned unique id.
    pub event_id: String,
    /// Id of the aggregate stream this event belongs to.
    pub aggregate_id: String,
    /// `"entity"` or `"projection"`.
    pub aggregate_name: String,
    /// Discriminates the payload shape (e.g. `"created"`).
    pub event_name: String,
    /// Serialized JSON payload.
    pub data: String,
}

impl StoredEvent {
    /// Build a record with a freshly generated UUID v4 event id.
    ///
    /// # Arguments
    ///
    /// * `aggregate_id` - Stream id the event is appended to.
    /// * `aggregate_name` - Aggregate kind name (`"entity"` / `"projection"`).
    /// * `event_name` - Event discriminator.
    /// * `data` - Payload to serialize into the `data` field.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the payload cannot be serialized.
    pub fn new(
        aggregate_id: &str,
        aggregate_name: &str,
        event_name: &str,
        data: &serde_json::Value,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            aggregate_id: aggregate_id.to_owned(),
            aggregate_name: aggregate_name.to_owned(),
            event_name: event_name.to_owned(),
            data: serde_json::to_string(data)?,
        })
    }
}
