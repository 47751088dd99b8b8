//! Crate-level error types for the event log port and the engine.

use std::fmt;

/// Error returned by an [`EventLog`](crate::EventLog) backend.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Disk I/O failure.
    ///
    /// An underlying filesystem error occurred while reading or appending
    /// an event stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A payload or persisted record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stream did not hold the expected number of events.
    ///
    /// Only produced for appends carrying
    /// [`ExpectedVersion::Exact`](crate::ExpectedVersion::Exact).
    #[error("version conflict: expected {expected} events, stream has {actual}")]
    VersionConflict {
        /// Event count the caller folded before deciding.
        expected: u64,
        /// Event count the stream actually holds.
        actual: u64,
    },

    /// Any other backend-specific failure.
    #[error("event log backend error: {0}")]
    Backend(String),
}

/// What kind of thing a [`EsuiError::NotFound`] or
/// [`EsuiError::AlreadyExists`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Entity,
    Event,
    Projection,
    Table,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Entity => "entity",
            Self::Event => "event",
            Self::Projection => "projection",
            Self::Table => "table",
        };
        f.write_str(s)
    }
}

/// Error returned by every command and query on [`Esui`](crate::Esui).
///
/// No event is ever appended for a command that returns one of these.
#[derive(Debug, thiserror::Error)]
pub enum EsuiError {
    /// The log port's append call failed. Surfaced verbatim.
    #[error("failed to store event: {0}")]
    Store(#[source] LogError),

    /// The log port's fetch call failed. Folding was not attempted.
    #[error("failed to fetch events: {0}")]
    Fetch(#[source] LogError),

    /// The folded aggregate (or a child of it) does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up.
        kind: Subject,
        /// The id or name that was looked up.
        id: String,
    },

    /// A uniqueness invariant would be violated by the command.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// What collided.
        kind: Subject,
        /// The colliding name.
        name: String,
    },

    /// The attribute type is not one of the recognized types.
    #[error("invalid attribute type: {0}")]
    InvalidAttributeType(String),

    /// The event payload could not be serialized before appending.
    #[error("failed to encode event payload: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Error returned by [`EsuiBuilder::build`](crate::EsuiBuilder::build).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// No event log was configured.
    #[error("an event log is required")]
    MissingEventLog,
}

impl EsuiError {
    /// Returns `true` if the append lost an optimistic concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(LogError::VersionConflict { .. }))
    }

    pub(crate) fn not_found(kind: Subject, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn already_exists(kind: Subject, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }
}
