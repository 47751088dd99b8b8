//! The event log port consumed by the engine.
//!
//! The host owns the durable log and injects it as an
//! `Arc<dyn EventLog>`. Two backends ship with the crate:
//! [`InMemoryEventLog`](crate::InMemoryEventLog) and
//! [`JsonlEventLog`](crate::JsonlEventLog).

use async_trait::async_trait;

use crate::error::LogError;
use crate::event::StoredEvent;

/// Expected stream length for an append.
///
/// Insulates the engine from how a backend implements compare-and-append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Accept any current stream length (no concurrency check).
    Any,
    /// The stream must currently hold exactly this many events.
    Exact(u64),
}

impl ExpectedVersion {
    /// Check a stream's current length against this expectation.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::VersionConflict`] when the expectation is
    /// `Exact(n)` and `actual != n`.
    pub fn check(self, actual: u64) -> Result<(), LogError> {
        match self {
            Self::Any => Ok(()),
            Self::Exact(expected) if expected == actual => Ok(()),
            Self::Exact(expected) => Err(LogError::VersionConflict { expected, actual }),
        }
    }
}

/// Append-only, per-aggregate-ordered event storage.
///
/// # Contract
///
/// - Events for one `aggregate_id` are totally ordered; fetch returns them
///   in append order.
/// - Existing events are never rewritten or deleted.
/// - A stream that has never been written to fetches as an empty `Vec`,
///   not an error.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one event to the stream `(aggregate_name, aggregate_id)`.
    ///
    /// The backend serializes `data` into the persisted `data` field and
    /// assigns the event id.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::VersionConflict`] if `expected` does not match,
    /// or any backend failure.
    async fn store_event(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        event_name: &str,
        data: serde_json::Value,
        expected: ExpectedVersion,
    ) -> Result<(), LogError>;

    /// Fetch a stream's events in append order.
    ///
    /// Returns the events strictly after the event with id `from_id`; an
    /// empty `from_id` means from the beginning. An id not present in the
    /// stream yields an empty sequence.
    ///
    /// # Errors
    ///
    /// Returns any backend failure.
    async fn fetch_aggregate_events(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        from_id: &str,
    ) -> Result<Vec<StoredEvent>, LogError>;
}

/// Slice `events` to those strictly after `from_id`.
///
/// Shared by the built-in backends.
pub(crate) fn events_after(events: &[StoredEvent], from_id: &str) -> Vec<StoredEvent> {
    if from_id.is_empty() {
        return events.to_vec();
    }
    events
        .iter()
        .position(|e| e.event_id == from_id)
        .map(|idx| events[idx + 1..].to_vec())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> StoredEvent {
        StoredEvent {
            event_id: id.into(),
            aggregate_id: "a".into(),
            aggregate_name: "entity".into(),
            event_name: "created".into(),
            data: "{}".into(),
        }
    }

    #[test]
    fn any_accepts_every_length() {
        assert!(ExpectedVersion::Any.check(0).is_ok());
        assert!(ExpectedVersion::Any.check(42).is_ok());
    }

    #[test]
    fn exact_rejects_mismatch() {
        assert!(ExpectedVersion::Exact(3).check(3).is_ok());
        let err = ExpectedVersion::Exact(3).check(4).unwrap_err();
        assert!(matches!(
            err,
            LogError::VersionConflict {
                expected: 3,
                actual: 4
            }
        ));
    }

    #[test]
    fn events_after_empty_id_returns_all() {
        let events = vec![event("1"), event("2")];
        assert_eq!(events_after(&events, ""), events);
    }

    #[test]
    fn events_after_is_exclusive() {
        let events = vec![event("1"), event("2"), event("3")];
        let after = events_after(&events, "1");
        let ids: Vec<&str> = after.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert!(events_after(&events, "3").is_empty());
    }

    #[test]
    fn events_after_unknown_id_is_empty() {
        let events = vec![event("1")];
        assert!(events_after(&events, "nope").is_empty());
    }
}
