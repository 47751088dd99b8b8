//! Aggregate trait and the best-effort fold over persisted events.

use std::fmt;

use crate::engine::EngineConfig;
use crate::error::EsuiError;
use crate::event::{AggregateKind, StoredEvent};

/// A closed set of events one aggregate kind understands.
///
/// Each variant maps to one `event_name` on the wire and one JSON payload
/// shape.
pub trait DomainEvent: Sized {
    /// The `event_name` this variant is persisted under.
    fn event_name(&self) -> &'static str;

    /// The JSON payload persisted in the record's `data` field.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the payload cannot be serialized.
    fn payload(&self) -> serde_json::Result<serde_json::Value>;

    /// Decode a persisted record.
    ///
    /// Returns `Ok(None)` for an `event_name` this type does not know, and
    /// `Err` when the name is known but `data` does not parse as its payload.
    fn decode(event_name: &str, data: &str) -> serde_json::Result<Option<Self>>;
}

/// A domain aggregate whose state is derived from its event history.
///
/// The implementing type itself serves as the aggregate's state.
///
/// # Contract
///
/// - [`apply`](Aggregate::apply) must be a pure, total function over the
///   recognized events.
/// - [`handle`](Aggregate::handle) is a pure decision function: it validates
///   a command against the folded state and returns exactly one event to
///   append, or rejects the command.
pub trait Aggregate: Default + Clone + Send + Sync + 'static {
    /// Which stream family this aggregate lives in.
    const KIND: AggregateKind;

    /// The events this aggregate produces and folds.
    type Event: DomainEvent + Send;

    /// The commands this aggregate accepts.
    type Command: Send;

    /// Whether a `created` event has been folded (the name is non-empty).
    fn exists(&self) -> bool;

    /// Fold one event into the next state.
    fn apply(self, aggregate_id: &str, event: &Self::Event) -> Self;

    /// Explains why `event` cannot be applied to `self`, e.g. a column added
    /// to a table that was never created. The fold skips such events instead
    /// of applying them.
    fn inapplicable(&self, _event: &Self::Event) -> Option<String> {
        None
    }

    /// Validate a command against the current state.
    ///
    /// # Errors
    ///
    /// Returns [`EsuiError::NotFound`], [`EsuiError::AlreadyExists`] or
    /// [`EsuiError::InvalidAttributeType`] when the command is rejected.
    fn handle(
        &self,
        aggregate_id: &str,
        cmd: Self::Command,
        config: &EngineConfig,
    ) -> Result<Self::Event, EsuiError>;
}

/// Why an event did not contribute to the folded state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The payload failed to parse for a known `event_name`.
    Malformed(String),
    /// The `event_name` is not one this aggregate knows.
    Unrecognized,
    /// The record belongs to a different aggregate stream.
    ForeignAggregate,
    /// The event does not fit the state folded so far.
    Inapplicable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed payload: {e}"),
            Self::Unrecognized => f.write_str("unrecognized event name"),
            Self::ForeignAggregate => f.write_str("event belongs to another aggregate"),
            Self::Inapplicable(why) => write!(f, "inapplicable: {why}"),
        }
    }
}

/// A reference to one event the fold skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEvent {
    pub event_id: String,
    pub event_name: String,
    pub reason: SkipReason,
}

/// The result of folding a stream: state plus what was left out.
#[derive(Debug, Clone, PartialEq)]
pub struct Folded<A> {
    /// The reconstructed aggregate state.
    pub state: A,
    /// Number of records read from the log, skipped ones included.
    ///
    /// This is the expected version for an optimistic append.
    pub version: u64,
    /// Events that did not contribute to `state`, in log order.
    pub skipped: Vec<SkippedEvent>,
}

/// Fold an ordered event sequence into a fresh state value.
///
/// Best-effort per event: a record that is foreign, unrecognized or
/// malformed is recorded in [`Folded::skipped`], logged, and does not stop
/// the fold. The same input always yields the same output.
pub fn fold<A: Aggregate>(aggregate_id: &str, events: &[StoredEvent]) -> Folded<A> {
    let mut state = A::default();
    let mut skipped = Vec::new();

    for event in events {
        match decode_for::<A>(aggregate_id, event) {
            Ok(domain_event) => {
                if let Some(why) = state.inapplicable(&domain_event) {
                    skip(&mut skipped, event, SkipReason::Inapplicable(why));
                    continue;
                }
                state = state.apply(aggregate_id, &domain_event);
            }
            Err(reason) => skip(&mut skipped, event, reason),
        }
    }

    tracing::debug!(
        aggregate = %A::KIND,
        aggregate_id,
        events = events.len(),
        skipped = skipped.len(),
        "folded"
    );

    Folded {
        state,
        version: events.len() as u64,
        skipped,
    }
}

fn decode_for<A: Aggregate>(
    aggregate_id: &str,
    event: &StoredEvent,
) -> Result<A::Event, SkipReason> {
    if event.aggregate_name != A::KIND.as_str() || event.aggregate_id != aggregate_id {
        return Err(SkipReason::ForeignAggregate);
    }
    match A::Event::decode(&event.event_name, &event.data) {
        Ok(Some(domain_event)) => Ok(domain_event),
        Ok(None) => Err(SkipReason::Unrecognized),
        Err(e) => Err(SkipReason::Malformed(e.to_string())),
    }
}

fn skip(skipped: &mut Vec<SkippedEvent>, event: &StoredEvent, reason: SkipReason) {
    tracing::warn!(
        event_id = %event.event_id,
        event_name = %event.event_name,
        reason = %reason,
        "skipping event during fold"
    );
    skipped.push(SkippedEvent {
        event_id: event.event_id.clone(),
        event_name: event.event_name.clone(),
        reason,
    });
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::record;
    use super::*;
    use crate::entity::Entity;

    #[test]
    fn empty_stream_folds_to_default() {
        let folded = fold::<Entity>("e1", &[]);
        assert_eq!(folded.state, Entity::default());
        assert!(!folded.state.exists());
        assert_eq!(folded.version, 0);
        assert!(folded.skipped.is_empty());
    }

    #[test]
    fn version_counts_skipped_records() {
        let events = vec![
            record("1", "e1", "entity", "created", r#"{"name":"user"}"#),
            record("2", "e1", "entity", "renamed", r#"{"name":"x"}"#),
            record("3", "e1", "entity", "event_added", "{oops"),
        ];
        let folded = fold::<Entity>("e1", &events);
        assert_eq!(folded.version, 3);
        assert_eq!(folded.skipped.len(), 2);
        assert_eq!(folded.skipped[0].reason, SkipReason::Unrecognized);
        assert!(matches!(folded.skipped[1].reason, SkipReason::Malformed(_)));
    }

    #[test]
    fn foreign_records_are_skipped() {
        let events = vec![
            record("1", "e1", "projection", "created", r#"{"name":"p"}"#),
            record("2", "other", "entity", "created", r#"{"name":"q"}"#),
        ];
        let folded = fold::<Entity>("e1", &events);
        assert!(!folded.state.exists());
        assert!(
            folded
                .skipped
                .iter()
                .all(|s| s.reason == SkipReason::ForeignAggregate)
        );
    }

    #[test]
    fn fold_is_deterministic() {
        let events = vec![
            record("1", "e1", "entity", "created", r#"{"name":"user"}"#),
            record("2", "e1", "entity", "event_added", r#"{"name":"signed_up"}"#),
            record("3", "e1", "entity", "event_added", "not json"),
            record(
                "4",
                "e1",
                "entity",
                "attribute_added",
                r#"{"event_name":"signed_up","name":"email","type":"string"}"#,
            ),
        ];
        assert_eq!(fold::<Entity>("e1", &events), fold::<Entity>("e1", &events));
    }

    #[test]
    fn skip_reason_display() {
        assert_eq!(SkipReason::Unrecognized.to_string(), "unrecognized event name");
        assert_eq!(
            SkipReason::Inapplicable("table t1 does not exist".into()).to_string(),
            "inapplicable: table t1 does not exist"
        );
    }
}
