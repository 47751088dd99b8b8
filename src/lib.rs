//! Event-sourced entity and projection schemas.
//!
//! [`Esui`] reconstructs each [`Entity`] and [`Projection`] by folding its
//! event stream from an injected [`EventLog`], validates a command against
//! the folded state, and appends exactly one event on success.

mod aggregate;
pub use aggregate::{Aggregate, DomainEvent, Folded, SkipReason, SkippedEvent, fold};
mod engine;
mod entity;
mod error;
mod event;
mod idgen;
mod log;
mod memory;
mod projection;
mod storage;

pub use engine::{ConcurrencyMode, EngineConfig, Esui, EsuiBuilder, ParentCheck};
pub use entity::{
    AttributeAdded, AttributeType, Entity, EntityCommand, EntityCreated, EntityEvent,
    EventAdded, EventDefinition,
};
pub use error::{BuildError, EsuiError, LogError, Subject};
pub use event::{AggregateKind, StoredEvent};
pub use idgen::{IdGenerator, UuidGenerator};
pub use log::{EventLog, ExpectedVersion};
pub use memory::InMemoryEventLog;
pub use projection::{
    Block, Column, ColumnAdded, Projection, ProjectionCommand, ProjectionCreated,
    ProjectionEvent, Table, TableCreated,
};
pub use storage::{JsonlEventLog, StreamLayout};
