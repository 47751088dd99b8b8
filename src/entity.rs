//! Entity aggregate -- a schema-defining object.
//!
//! An entity has a name, a set of named sub-events, and for each sub-event a
//! set of typed attributes. Nothing is ever removed: event names and
//! attributes only accumulate, and a re-added attribute overwrites its type.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::engine::{EngineConfig, ParentCheck};
use crate::error::{EsuiError, Subject};
use crate::event::AggregateKind;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Folded state of one entity.
///
/// `name == ""` means the entity does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    /// Sub-events keyed by event name.
    pub events: BTreeMap<String, EventDefinition>,
}

impl Entity {
    /// Look up one sub-event by name.
    pub fn event(&self, name: &str) -> Option<&EventDefinition> {
        self.events.get(name)
    }
}

/// The attribute schema of one named sub-event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub attributes: BTreeMap<String, AttributeType>,
}

/// The declared type of an attribute.
///
/// Any string round-trips through the log; [`validate`](Self::validate)
/// restricts it to the recognized set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeType(String);

impl AttributeType {
    /// Type names the engine recognizes.
    pub const RECOGNIZED: [&'static str; 2] = ["string", "int"];

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_recognized(&self) -> bool {
        Self::RECOGNIZED.contains(&self.0.as_str())
    }

    /// # Errors
    ///
    /// Returns [`EsuiError::InvalidAttributeType`] when the type is not one
    /// of [`RECOGNIZED`](Self::RECOGNIZED).
    pub fn validate(&self) -> Result<(), EsuiError> {
        if self.is_recognized() {
            Ok(())
        } else {
            Err(EsuiError::InvalidAttributeType(self.0.clone()))
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributeType {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for AttributeType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<&str> for AttributeType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands accepted by the [`Entity`] aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityCommand {
    /// Create a new entity with the given name.
    Create { name: String },
    /// Declare a new named sub-event.
    AddEvent { event_name: String },
    /// Declare (or retype) an attribute of a sub-event.
    AddAttribute {
        event_name: String,
        name: String,
        attribute_type: AttributeType,
    },
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Payload of the `created` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCreated {
    pub name: String,
}

/// Payload of the `event_added` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAdded {
    pub name: String,
}

/// Payload of the `attribute_added` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeAdded {
    pub event_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
}

/// Domain events produced by the [`Entity`] aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityEvent {
    Created(EntityCreated),
    EventAdded(EventAdded),
    AttributeAdded(AttributeAdded),
}

impl DomainEvent for EntityEvent {
    fn event_name(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::EventAdded(_) => "event_added",
            Self::AttributeAdded(_) => "attribute_added",
        }
    }

    fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Created(p) => serde_json::to_value(p),
            Self::EventAdded(p) => serde_json::to_value(p),
            Self::AttributeAdded(p) => serde_json::to_value(p),
        }
    }

    fn decode(event_name: &str, data: &str) -> serde_json::Result<Option<Self>> {
        let event = match event_name {
            "created" => Self::Created(serde_json::from_str(data)?),
            "event_added" => Self::EventAdded(serde_json::from_str(data)?),
            "attribute_added" => Self::AttributeAdded(serde_json::from_str(data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

// ---------------------------------------------------------------------------
// Aggregate impl
// ---------------------------------------------------------------------------

impl Aggregate for Entity {
    const KIND: AggregateKind = AggregateKind::Entity;
    type Event = EntityEvent;
    type Command = EntityCommand;

    fn exists(&self) -> bool {
        !self.name.is_empty()
    }

    fn inapplicable(&self, event: &EntityEvent) -> Option<String> {
        match event {
            EntityEvent::Created(_) if self.exists() => {
                Some(format!("entity already created as {:?}", self.name))
            }
            _ => None,
        }
    }

    fn apply(mut self, aggregate_id: &str, event: &EntityEvent) -> Self {
        match event {
            EntityEvent::Created(p) => {
                self.id = aggregate_id.to_owned();
                self.name = p.name.clone();
            }
            EntityEvent::EventAdded(p) => {
                self.events.insert(p.name.clone(), EventDefinition::default());
            }
            EntityEvent::AttributeAdded(p) => {
                self.events
                    .entry(p.event_name.clone())
                    .or_default()
                    .attributes
                    .insert(p.name.clone(), p.attribute_type.clone());
            }
        }
        self
    }

    fn handle(
        &self,
        aggregate_id: &str,
        cmd: EntityCommand,
        config: &EngineConfig,
    ) -> Result<EntityEvent, EsuiError> {
        match cmd {
            EntityCommand::Create { name } => {
                if self.exists() {
                    return Err(EsuiError::already_exists(Subject::Entity, aggregate_id));
                }
                Ok(EntityEvent::Created(EntityCreated { name }))
            }
            EntityCommand::AddEvent { event_name } => {
                if !self.exists() {
                    return Err(EsuiError::not_found(Subject::Entity, aggregate_id));
                }
                if self.events.contains_key(&event_name) {
                    return Err(EsuiError::already_exists(Subject::Event, event_name));
                }
                Ok(EntityEvent::EventAdded(EventAdded { name: event_name }))
            }
            EntityCommand::AddAttribute {
                event_name,
                name,
                attribute_type,
            } => {
                if config.validate_attribute_types {
                    attribute_type.validate()?;
                }
                if config.attribute_parent_check == ParentCheck::Strict {
                    if !self.exists() {
                        return Err(EsuiError::not_found(Subject::Entity, aggregate_id));
                    }
                    if !self.events.contains_key(&event_name) {
                        return Err(EsuiError::not_found(Subject::Event, event_name));
                    }
                }
                Ok(EntityEvent::AttributeAdded(AttributeAdded {
                    event_name,
                    name,
                    attribute_type,
                }))
            }
        }
    }
}
