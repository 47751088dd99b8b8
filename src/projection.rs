//! Projection aggregate -- a read-model descriptor.
//!
//! A projection owns named tables with typed columns, plus an ordered list
//! of processing blocks. Each block names the block it runs after; the fold
//! keeps blocks in append order and [`Projection::execution_order`] derives
//! the run order from those links.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::engine::EngineConfig;
use crate::error::{EsuiError, Subject};
use crate::event::AggregateKind;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Folded state of one projection.
///
/// `name == ""` means the projection does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub id: String,
    pub name: String,
    /// No event toggles this yet; it folds to `false`.
    pub is_active: bool,
    pub tables: BTreeMap<String, Table>,
    /// Blocks in append order.
    pub blocks: Vec<Block>,
}

/// A table owned by a projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Always the id of the owning projection.
    pub projection_id: String,
    pub columns: BTreeMap<String, Column>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// A unit of projection-processing logic (e.g. a script).
///
/// `ordered_after` is the `block_id` of the block this one runs after; an
/// empty string means it runs first. The caller supplies `block_id` and is
/// responsible for its uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub block_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub ordered_after: String,
}

impl Projection {
    /// Look up one table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Blocks in the order they should run.
    ///
    /// Blocks with an empty `ordered_after` start a chain, in append order;
    /// each block is followed by the blocks that name it as predecessor,
    /// again in append order. Blocks unreachable from any chain start
    /// (dangling or cyclic predecessor) come last, in append order.
    pub fn execution_order(&self) -> Vec<&Block> {
        let mut placed = vec![false; self.blocks.len()];
        let mut order = Vec::with_capacity(self.blocks.len());

        let mut stack: Vec<usize> = self
            .blocks
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, b)| b.ordered_after.is_empty())
            .map(|(i, _)| i)
            .collect();

        while let Some(idx) = stack.pop() {
            if placed[idx] {
                continue;
            }
            placed[idx] = true;
            let block = &self.blocks[idx];
            order.push(block);

            stack.extend(
                self.blocks
                    .iter()
                    .enumerate()
                    .rev()
                    .filter(|(i, b)| !placed[*i] && b.ordered_after == block.block_id)
                    .map(|(i, _)| i),
            );
        }

        order.extend(
            self.blocks
                .iter()
                .zip(&placed)
                .filter(|(_, done)| !**done)
                .map(|(b, _)| b),
        );
        order
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands accepted by the [`Projection`] aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionCommand {
    Create {
        name: String,
    },
    CreateTable {
        table_name: String,
    },
    AddColumn {
        table_name: String,
        column_name: String,
        column_type: String,
    },
    /// Append a block verbatim, including its caller-supplied id.
    AddBlock(Block),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Payload of the `created` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionCreated {
    pub name: String,
}

/// Payload of the `table_created` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCreated {
    pub name: String,
}

/// Payload of the `column_added` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAdded {
    pub table_name: String,
    pub column_name: String,
    pub column_type: String,
}

/// Domain events produced by the [`Projection`] aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionEvent {
    Created(ProjectionCreated),
    TableCreated(TableCreated),
    ColumnAdded(ColumnAdded),
    BlockAdded(Block),
}

impl DomainEvent for ProjectionEvent {
    fn event_name(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::TableCreated(_) => "table_created",
            Self::ColumnAdded(_) => "column_added",
            Self::BlockAdded(_) => "block_added",
        }
    }

    fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Created(p) => serde_json::to_value(p),
            Self::TableCreated(p) => serde_json::to_value(p),
            Self::ColumnAdded(p) => serde_json::to_value(p),
            Self::BlockAdded(p) => serde_json::to_value(p),
        }
    }

    fn decode(event_name: &str, data: &str) -> serde_json::Result<Option<Self>> {
        let event = match event_name {
            "created" => Self::Created(serde_json::from_str(data)?),
            "table_created" => Self::TableCreated(serde_json::from_str(data)?),
            "column_added" => Self::ColumnAdded(serde_json::from_str(data)?),
            "block_added" => Self::BlockAdded(serde_json::from_str(data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

// ---------------------------------------------------------------------------
// Aggregate impl
// ---------------------------------------------------------------------------

impl Aggregate for Projection {
    const KIND: AggregateKind = AggregateKind::Projection;
    type Event = ProjectionEvent;
    type Command = ProjectionCommand;

    fn exists(&self) -> bool {
        !self.name.is_empty()
    }

    fn inapplicable(&self, event: &ProjectionEvent) -> Option<String> {
        match event {
            ProjectionEvent::Created(_) if self.exists() => {
                Some(format!("projection already created as {:?}", self.name))
            }
            ProjectionEvent::ColumnAdded(p) if !self.tables.contains_key(&p.table_name) => {
                Some(format!("table {:?} does not exist", p.table_name))
            }
            _ => None,
        }
    }

    fn apply(mut self, aggregate_id: &str, event: &ProjectionEvent) -> Self {
        match event {
            ProjectionEvent::Created(p) => {
                self.id = aggregate_id.to_owned();
                self.name = p.name.clone();
            }
            ProjectionEvent::TableCreated(p) => {
                // A re-created table starts over with no columns.
                self.tables.insert(
                    p.name.clone(),
                    Table {
                        name: p.name.clone(),
                        projection_id: aggregate_id.to_owned(),
                        columns: BTreeMap::new(),
                    },
                );
            }
            ProjectionEvent::ColumnAdded(p) => {
                if let Some(table) = self.tables.get_mut(&p.table_name) {
                    table.columns.insert(
                        p.column_name.clone(),
                        Column {
                            name: p.column_name.clone(),
                            column_type: p.column_type.clone(),
                        },
                    );
                }
            }
            ProjectionEvent::BlockAdded(block) => {
                self.blocks.push(block.clone());
            }
        }
        self
    }

    fn handle(
        &self,
        aggregate_id: &str,
        cmd: ProjectionCommand,
        config: &EngineConfig,
    ) -> Result<ProjectionEvent, EsuiError> {
        let require_projection = || {
            if self.exists() {
                Ok(())
            } else {
                Err(EsuiError::not_found(Subject::Projection, aggregate_id))
            }
        };

        match cmd {
            ProjectionCommand::Create { name } => {
                if self.exists() {
                    return Err(EsuiError::already_exists(Subject::Projection, aggregate_id));
                }
                Ok(ProjectionEvent::Created(ProjectionCreated { name }))
            }
            ProjectionCommand::CreateTable { table_name } => {
                require_projection()?;
                if config.reject_duplicate_tables && self.tables.contains_key(&table_name) {
                    return Err(EsuiError::already_exists(Subject::Table, table_name));
                }
                Ok(ProjectionEvent::TableCreated(TableCreated { name: table_name }))
            }
            ProjectionCommand::AddColumn {
                table_name,
                column_name,
                column_type,
            } => {
                require_projection()?;
                if !self.tables.contains_key(&table_name) {
                    return Err(EsuiError::not_found(Subject::Table, table_name));
                }
                Ok(ProjectionEvent::ColumnAdded(ColumnAdded {
                    table_name,
                    column_name,
                    column_type,
                }))
            }
            ProjectionCommand::AddBlock(block) => {
                require_projection()?;
                Ok(ProjectionEvent::BlockAdded(block))
            }
        }
    }
}
