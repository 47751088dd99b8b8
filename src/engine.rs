//! The fold/validate/append engine.
//!
//! Every command runs the same sequence against the injected
//! [`EventLog`]: fetch the aggregate's events, fold them into a fresh state,
//! validate the command against that state, and on success append exactly
//! one event. Queries stop after the fold. The engine keeps no aggregate
//! state between calls.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::aggregate::{Aggregate, DomainEvent, Folded, fold};
use crate::entity::{AttributeType, Entity, EntityCommand};
use crate::error::{BuildError, EsuiError};
use crate::idgen::{IdGenerator, UuidGenerator};
use crate::log::{EventLog, ExpectedVersion};
use crate::projection::{Block, Projection, ProjectionCommand};

/// How appends guard against concurrent writers of the same aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Append without a version check. The host must serialize commands
    /// per aggregate id for uniqueness checks to hold.
    #[default]
    SingleWriter,
    /// Append only if the stream still holds the number of events that was
    /// folded. A lost race fails with a version conflict and appends nothing.
    Optimistic,
}

/// Whether `add_attribute` verifies its parent entity and event exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentCheck {
    /// Reject attributes for unknown entities or undeclared events.
    #[default]
    Strict,
    /// Append unconditionally.
    Permissive,
}

/// Engine policy knobs.
///
/// Deserializes with defaults for missing fields, so hosts can load a
/// partial JSON object.
///
/// # Examples
///
/// ```
/// use esui::{ConcurrencyMode, EngineConfig};
///
/// let config: EngineConfig = serde_json::from_str(r#"{"concurrency": "optimistic"}"#).unwrap();
/// assert_eq!(config.concurrency, ConcurrencyMode::Optimistic);
/// assert!(!config.validate_attribute_types);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub concurrency: ConcurrencyMode,
    pub attribute_parent_check: ParentCheck,
    /// Reject attribute types outside [`AttributeType::RECOGNIZED`].
    pub validate_attribute_types: bool,
    /// Reject `create_table` for a table name that already exists instead
    /// of re-initializing it.
    pub reject_duplicate_tables: bool,
}

/// Entry point for entity and projection commands and queries.
///
/// `Clone` is cheap: the ports are `Arc`-wrapped.
#[derive(Clone)]
pub struct Esui {
    log: Arc<dyn EventLog>,
    ids: Arc<dyn IdGenerator>,
    config: EngineConfig,
}

// Manual `Debug` because the ports are trait objects.
impl fmt::Debug for Esui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Esui")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Esui {
    /// Create an engine with the default [`EngineConfig`].
    pub fn new(log: Arc<dyn EventLog>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            log,
            ids,
            config: EngineConfig::default(),
        }
    }

    pub fn builder() -> EsuiBuilder {
        EsuiBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- entity ---

    /// Create an entity and return its new id.
    ///
    /// # Errors
    ///
    /// Returns [`EsuiError::Store`] if the append fails; the generated id is
    /// discarded.
    pub async fn create_entity(&self, name: &str) -> Result<String, EsuiError> {
        self.create::<Entity>(EntityCommand::Create {
            name: name.to_owned(),
        })
        .await
    }

    /// Fold an entity's current state.
    ///
    /// An entity that was never created folds to a state with an empty
    /// name; that is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`EsuiError::Fetch`] if the log cannot be read.
    pub async fn get_entity(&self, entity_id: &str) -> Result<Entity, EsuiError> {
        Ok(self.load_entity(entity_id).await?.state)
    }

    /// Like [`get_entity`](Self::get_entity), but also reports the stream
    /// version and any events the fold skipped.
    ///
    /// # Errors
    ///
    /// Returns [`EsuiError::Fetch`] if the log cannot be read.
    pub async fn load_entity(&self, entity_id: &str) -> Result<Folded<Entity>, EsuiError> {
        self.load::<Entity>(entity_id).await
    }

    /// Declare a new sub-event on an entity.
    ///
    /// # Errors
    ///
    /// * [`EsuiError::NotFound`] -- the entity does not exist.
    /// * [`EsuiError::AlreadyExists`] -- the event name is already declared.
    /// * [`EsuiError::Fetch`] / [`EsuiError::Store`] -- the log failed.
    pub async fn add_event_to_entity(
        &self,
        entity_id: &str,
        event_name: &str,
    ) -> Result<(), EsuiError> {
        self.execute::<Entity>(
            entity_id,
            EntityCommand::AddEvent {
                event_name: event_name.to_owned(),
            },
        )
        .await
    }

    /// Declare an attribute on one of an entity's sub-events.
    ///
    /// Parent checks follow [`EngineConfig::attribute_parent_check`] and type
    /// validation follows [`EngineConfig::validate_attribute_types`].
    ///
    /// # Errors
    ///
    /// * [`EsuiError::InvalidAttributeType`] -- validation is on and the type
    ///   is not recognized.
    /// * [`EsuiError::NotFound`] -- strict checks are on and the entity or
    ///   event does not exist.
    /// * [`EsuiError::Fetch`] / [`EsuiError::Store`] -- the log failed.
    pub async fn add_attribute(
        &self,
        entity_id: &str,
        event_name: &str,
        attribute_name: &str,
        attribute_type: impl Into<AttributeType>,
    ) -> Result<(), EsuiError> {
        self.execute::<Entity>(
            entity_id,
            EntityCommand::AddAttribute {
                event_name: event_name.to_owned(),
                name: attribute_name.to_owned(),
                attribute_type: attribute_type.into(),
            },
        )
        .await
    }

    // --- projection ---

    /// Create a projection and return its new id.
    ///
    /// # Errors
    ///
    /// Returns [`EsuiError::Store`] if the append fails; the generated id is
    /// discarded.
    pub async fn create_projection(&self, name: &str) -> Result<String, EsuiError> {
        self.create::<Projection>(ProjectionCommand::Create {
            name: name.to_owned(),
        })
        .await
    }

    /// Fold a projection's current state.
    ///
    /// # Errors
    ///
    /// Returns [`EsuiError::Fetch`] if the log cannot be read.
    pub async fn get_projection(&self, projection_id: &str) -> Result<Projection, EsuiError> {
        Ok(self.load_projection(projection_id).await?.state)
    }

    /// Like [`get_projection`](Self::get_projection), with the fold report.
    ///
    /// # Errors
    ///
    /// Returns [`EsuiError::Fetch`] if the log cannot be read.
    pub async fn load_projection(
        &self,
        projection_id: &str,
    ) -> Result<Folded<Projection>, EsuiError> {
        self.load::<Projection>(projection_id).await
    }

    /// Create (or re-initialize) a table on a projection.
    ///
    /// # Errors
    ///
    /// * [`EsuiError::NotFound`] -- the projection does not exist.
    /// * [`EsuiError::AlreadyExists`] -- only with
    ///   [`EngineConfig::reject_duplicate_tables`].
    /// * [`EsuiError::Fetch`] / [`EsuiError::Store`] -- the log failed.
    pub async fn create_table(&self, projection_id: &str, table_name: &str) -> Result<(), EsuiError> {
        self.execute::<Projection>(
            projection_id,
            ProjectionCommand::CreateTable {
                table_name: table_name.to_owned(),
            },
        )
        .await
    }

    /// Add a column to an existing table.
    ///
    /// # Errors
    ///
    /// * [`EsuiError::NotFound`] -- the projection or the table does not exist.
    /// * [`EsuiError::Fetch`] / [`EsuiError::Store`] -- the log failed.
    pub async fn add_column(
        &self,
        projection_id: &str,
        table_name: &str,
        column_name: &str,
        column_type: &str,
    ) -> Result<(), EsuiError> {
        self.execute::<Projection>(
            projection_id,
            ProjectionCommand::AddColumn {
                table_name: table_name.to_owned(),
                column_name: column_name.to_owned(),
                column_type: column_type.to_owned(),
            },
        )
        .await
    }

    /// Append a processing block to a projection, verbatim.
    ///
    /// # Errors
    ///
    /// * [`EsuiError::NotFound`] -- the projection does not exist.
    /// * [`EsuiError::Fetch`] / [`EsuiError::Store`] -- the log failed.
    pub async fn add_block(&self, projection_id: &str, block: Block) -> Result<(), EsuiError> {
        self.execute::<Projection>(projection_id, ProjectionCommand::AddBlock(block))
            .await
    }

    // --- shared pipeline ---

    async fn load<A: Aggregate>(&self, id: &str) -> Result<Folded<A>, EsuiError> {
        let events = self
            .log
            .fetch_aggregate_events(id, A::KIND.as_str(), "")
            .await
            .map_err(EsuiError::Fetch)?;
        Ok(fold::<A>(id, &events))
    }

    /// Decide against a fresh state under a newly generated id.
    async fn create<A: Aggregate>(&self, cmd: A::Command) -> Result<String, EsuiError> {
        let id = self.ids.generate();
        let span = tracing::info_span!("command", aggregate = %A::KIND, id = %id);

        async {
            let event = A::default().handle(&id, cmd, &self.config)?;
            self.append::<A>(&id, &event, self.expected(0)).await?;
            Ok::<_, EsuiError>(id.clone())
        }
        .instrument(span)
        .await
    }

    /// Fetch, fold, decide, append.
    async fn execute<A: Aggregate>(&self, id: &str, cmd: A::Command) -> Result<(), EsuiError> {
        let span = tracing::info_span!("command", aggregate = %A::KIND, id = %id);

        async {
            let folded = self.load::<A>(id).await?;
            let event = folded
                .state
                .handle(id, cmd, &self.config)
                .inspect_err(|e| tracing::warn!(error = %e, "command rejected"))?;
            self.append::<A>(id, &event, self.expected(folded.version))
                .await?;
            Ok::<_, EsuiError>(())
        }
        .instrument(span)
        .await
    }

    async fn append<A: Aggregate>(
        &self,
        id: &str,
        event: &A::Event,
        expected: ExpectedVersion,
    ) -> Result<(), EsuiError> {
        let data = event.payload().map_err(EsuiError::Encode)?;
        self.log
            .store_event(id, A::KIND.as_str(), event.event_name(), data, expected)
            .await
            .map_err(EsuiError::Store)?;
        tracing::info!(event_name = event.event_name(), "event appended");
        Ok(())
    }

    fn expected(&self, folded_version: u64) -> ExpectedVersion {
        match self.config.concurrency {
            ConcurrencyMode::SingleWriter => ExpectedVersion::Any,
            ConcurrencyMode::Optimistic => ExpectedVersion::Exact(folded_version),
        }
    }
}

/// Builder for configuring an [`Esui`] engine.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use esui::{ConcurrencyMode, Esui, InMemoryEventLog};
///
/// let engine = Esui::builder()
///     .event_log(Arc::new(InMemoryEventLog::new()))
///     .concurrency(ConcurrencyMode::Optimistic)
///     .build()
///     .unwrap();
/// assert_eq!(engine.config().concurrency, ConcurrencyMode::Optimistic);
/// ```
#[derive(Default)]
pub struct EsuiBuilder {
    log: Option<Arc<dyn EventLog>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: EngineConfig,
}

impl EsuiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event log port. Required.
    pub fn event_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Set the identifier generator. Defaults to [`UuidGenerator`].
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.config.concurrency = mode;
        self
    }

    pub fn attribute_parent_check(mut self, check: ParentCheck) -> Self {
        self.config.attribute_parent_check = check;
        self
    }

    pub fn validate_attribute_types(mut self, validate: bool) -> Self {
        self.config.validate_attribute_types = validate;
        self
    }

    pub fn reject_duplicate_tables(mut self, reject: bool) -> Self {
        self.config.reject_duplicate_tables = reject;
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingEventLog`] if no event log was set.
    pub fn build(self) -> Result<Esui, BuildError> {
        let log = self.log.ok_or(BuildError::MissingEventLog)?;
        let ids = self.ids.unwrap_or_else(|| Arc::new(UuidGenerator));
        Ok(Esui {
            log,
            ids,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEventLog;

    fn fixed_ids(id: &'static str) -> Arc<dyn IdGenerator> {
        Arc::new(move || id.to_string())
    }

    #[test]
    fn builder_requires_event_log() {
        let err = Esui::builder().build().unwrap_err();
        assert!(matches!(err, BuildError::MissingEventLog));
    }

    #[test]
    fn builder_setters_reach_config() {
        let engine = Esui::builder()
            .event_log(Arc::new(InMemoryEventLog::new()))
            .concurrency(ConcurrencyMode::Optimistic)
            .attribute_parent_check(ParentCheck::Permissive)
            .validate_attribute_types(true)
            .reject_duplicate_tables(true)
            .build()
            .expect("build should succeed");

        assert_eq!(
            engine.config(),
            &EngineConfig {
                concurrency: ConcurrencyMode::Optimistic,
                attribute_parent_check: ParentCheck::Permissive,
                validate_attribute_types: true,
                reject_duplicate_tables: true,
            }
        );
    }

    #[test]
    fn config_deserializes_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"attribute_parent_check": "permissive"}"#).unwrap();
        assert_eq!(config.attribute_parent_check, ParentCheck::Permissive);
        assert_eq!(config.concurrency, ConcurrencyMode::SingleWriter);

        let defaults: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults, EngineConfig::default());
    }

    #[test]
    fn expected_version_follows_mode() {
        let log = Arc::new(InMemoryEventLog::new());
        let single = Esui::new(log.clone(), fixed_ids("x"));
        assert_eq!(single.expected(7), ExpectedVersion::Any);

        let optimistic = Esui::builder()
            .event_log(log)
            .concurrency(ConcurrencyMode::Optimistic)
            .build()
            .unwrap();
        assert_eq!(optimistic.expected(7), ExpectedVersion::Exact(7));
    }

    #[tokio::test]
    async fn create_uses_generated_id() {
        let log = Arc::new(InMemoryEventLog::new());
        let engine = Esui::new(log.clone(), fixed_ids("abc123"));

        let id = engine.create_entity("user").await.expect("create should succeed");
        assert_eq!(id, "abc123");
        assert_eq!(log.stream_len("abc123", "entity").await, 1);

        let entity = engine.get_entity("abc123").await.unwrap();
        assert_eq!(entity.name, "user");
        assert_eq!(entity.id, "abc123");
    }

    #[tokio::test]
    async fn optimistic_create_collides_on_reused_id() {
        let log = Arc::new(InMemoryEventLog::new());
        let engine = Esui::builder()
            .event_log(log.clone())
            .id_generator(fixed_ids("dup"))
            .concurrency(ConcurrencyMode::Optimistic)
            .build()
            .unwrap();

        engine.create_projection("first").await.unwrap();
        let err = engine.create_projection("second").await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(log.stream_len("dup", "projection").await, 1);
    }

    #[test]
    fn debug_hides_ports() {
        let engine = Esui::new(Arc::new(InMemoryEventLog::new()), fixed_ids("x"));
        let out = format!("{engine:?}");
        assert!(out.contains("Esui"));
        assert!(out.contains("SingleWriter"));
    }
}
