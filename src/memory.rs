//! In-process event log backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::LogError;
use crate::event::StoredEvent;
use crate::log::{EventLog, ExpectedVersion, events_after};

/// Streams keyed by `(aggregate_name, aggregate_id)`.
type Streams = HashMap<(String, String), Vec<StoredEvent>>;

/// An [`EventLog`] that keeps every stream in memory.
///
/// Appends take a write lock over all streams, so the expected-version
/// check and the push happen atomically.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    streams: RwLock<Streams>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stream with pre-built records, bypassing validation.
    ///
    /// Useful for replaying historical or hand-crafted (including corrupt)
    /// events.
    pub async fn seed(&self, events: impl IntoIterator<Item = StoredEvent>) {
        let mut streams = self.streams.write().await;
        for event in events {
            streams
                .entry((event.aggregate_name.clone(), event.aggregate_id.clone()))
                .or_default()
                .push(event);
        }
    }

    /// Number of events in one stream.
    pub async fn stream_len(&self, aggregate_id: &str, aggregate_name: &str) -> usize {
        let streams = self.streams.read().await;
        streams
            .get(&(aggregate_name.to_owned(), aggregate_id.to_owned()))
            .map_or(0, Vec::len)
    }

    /// Total number of events across all streams.
    pub async fn total_len(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn store_event(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        event_name: &str,
        data: serde_json::Value,
        expected: ExpectedVersion,
    ) -> Result<(), LogError> {
        let event = StoredEvent::new(aggregate_id, aggregate_name, event_name, &data)?;
        let mut streams = self.streams.write().await;
        let stream = streams
            .entry((aggregate_name.to_owned(), aggregate_id.to_owned()))
            .or_default();
        expected.check(stream.len() as u64)?;
        stream.push(event);
        Ok(())
    }

    async fn fetch_aggregate_events(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        from_id: &str,
    ) -> Result<Vec<StoredEvent>, LogError> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&(aggregate_name.to_owned(), aggregate_id.to_owned()))
            .map(|events| events_after(events, from_id))
            .unwrap_or_default())
    }
}
