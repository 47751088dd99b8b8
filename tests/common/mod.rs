//! Event log test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use esui::{Esui, EventLog, ExpectedVersion, IdGenerator, InMemoryEventLog, LogError, StoredEvent};

/// Wraps an [`InMemoryEventLog`] and counts port calls.
#[derive(Default)]
pub struct CountingLog {
    pub inner: InMemoryEventLog,
    pub stores: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl CountingLog {
    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventLog for CountingLog {
    async fn store_event(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        event_name: &str,
        data: serde_json::Value,
        expected: ExpectedVersion,
    ) -> Result<(), LogError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.inner
            .store_event(aggregate_id, aggregate_name, event_name, data, expected)
            .await
    }

    async fn fetch_aggregate_events(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        from_id: &str,
    ) -> Result<Vec<StoredEvent>, LogError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner
            .fetch_aggregate_events(aggregate_id, aggregate_name, from_id)
            .await
    }
}

/// A log whose appends and/or fetches always fail.
pub struct FailingLog {
    pub fail_store: bool,
    pub fail_fetch: bool,
    pub inner: InMemoryEventLog,
}

impl FailingLog {
    pub fn store_fails() -> Self {
        Self {
            fail_store: true,
            fail_fetch: false,
            inner: InMemoryEventLog::new(),
        }
    }

    pub fn fetch_fails() -> Self {
        Self {
            fail_store: false,
            fail_fetch: true,
            inner: InMemoryEventLog::new(),
        }
    }
}

#[async_trait]
impl EventLog for FailingLog {
    async fn store_event(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        event_name: &str,
        data: serde_json::Value,
        expected: ExpectedVersion,
    ) -> Result<(), LogError> {
        if self.fail_store {
            return Err(LogError::Backend("disk full".into()));
        }
        self.inner
            .store_event(aggregate_id, aggregate_name, event_name, data, expected)
            .await
    }

    async fn fetch_aggregate_events(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        from_id: &str,
    ) -> Result<Vec<StoredEvent>, LogError> {
        if self.fail_fetch {
            return Err(LogError::Backend("connection reset".into()));
        }
        self.inner
            .fetch_aggregate_events(aggregate_id, aggregate_name, from_id)
            .await
    }
}

/// Simulates a second writer: after every fetch, another event lands in
/// the same stream before the caller gets to append.
#[derive(Default)]
pub struct RacingLog {
    pub inner: InMemoryEventLog,
}

#[async_trait]
impl EventLog for RacingLog {
    async fn store_event(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        event_name: &str,
        data: serde_json::Value,
        expected: ExpectedVersion,
    ) -> Result<(), LogError> {
        self.inner
            .store_event(aggregate_id, aggregate_name, event_name, data, expected)
            .await
    }

    async fn fetch_aggregate_events(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        from_id: &str,
    ) -> Result<Vec<StoredEvent>, LogError> {
        let events = self
            .inner
            .fetch_aggregate_events(aggregate_id, aggregate_name, from_id)
            .await?;
        if !events.is_empty() {
            self.inner
                .store_event(
                    aggregate_id,
                    aggregate_name,
                    "event_added",
                    serde_json::json!({ "name": "sneaked_in" }),
                    ExpectedVersion::Any,
                )
                .await?;
        }
        Ok(events)
    }
}

/// An engine over `log` that hands out `id` for every create.
pub fn engine_with_id(log: Arc<dyn EventLog>, id: &'static str) -> Esui {
    let ids: Arc<dyn IdGenerator> = Arc::new(move || id.to_string());
    Esui::new(log, ids)
}
