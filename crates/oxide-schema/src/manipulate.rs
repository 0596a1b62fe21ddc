//! Batched insert/update writes.
//!
//! A [`ManipulationBatch`] maps table names to write intents. Updates are
//! written as UPDATE and fall back to INSERT when no row matched, or as a
//! single native upsert when [`UpsertStrategy::Native`] is configured and the
//! backend supports it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{Backend, FieldValues, Predicate, Statement};
use crate::config::UpsertStrategy;
use crate::database::Database;
use crate::error::{Result, SchemaError, Severity};
use crate::value::Value;

/// Write command of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WriteCommand {
    /// Insert a new row.
    Insert,
    /// Update matching rows, inserting if none matched.
    Update,
}

impl FromStr for WriteCommand {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            _ => Err(SchemaError::Configuration(format!(
                "Unknown manipulation command: {s}"
            ))),
        }
    }
}

impl TryFrom<String> for WriteCommand {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<WriteCommand> for String {
    fn from(command: WriteCommand) -> Self {
        command.to_string()
    }
}

impl fmt::Display for WriteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// One write against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteIntent {
    /// Insert or update.
    pub command: WriteCommand,
    /// Column values.
    #[serde(default)]
    pub fields: FieldValues,
    /// Explicit primary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Rows to update. Defaults to `<id_column> = id`.
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
}

impl WriteIntent {
    /// An insert intent.
    #[must_use]
    pub const fn insert() -> Self {
        Self::new(WriteCommand::Insert)
    }

    /// An update intent.
    #[must_use]
    pub const fn update() -> Self {
        Self::new(WriteCommand::Update)
    }

    const fn new(command: WriteCommand) -> Self {
        Self {
            command,
            fields: FieldValues::new(),
            id: None,
            predicate: None,
        }
    }

    /// Sets a column value.
    #[must_use]
    pub fn field(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(column.into(), value.into());
        self
    }

    /// Sets the explicit id.
    #[must_use]
    pub const fn id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the update filter.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

/// Ordered table -> intent mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManipulationBatch {
    entries: Vec<(String, WriteIntent)>,
}

impl ManipulationBatch {
    /// Creates an empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds an intent for a table, replacing any earlier one for the same table.
    #[must_use]
    pub fn with(mut self, table: impl Into<String>, intent: WriteIntent) -> Self {
        self.insert(table, intent);
        self
    }

    /// Adds an intent for a table, replacing any earlier one for the same table.
    pub fn insert(&mut self, table: impl Into<String>, intent: WriteIntent) {
        let table = table.into();
        if let Some((_, existing)) = self.entries.iter_mut().find(|(t, _)| *t == table) {
            *existing = intent;
            return;
        }
        self.entries.push((table, intent));
    }

    /// Parses a JSON object keyed by table name. Any malformed intent,
    /// including an unknown command, rejects the whole batch.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Json`] if the input isn't a JSON object and
    /// [`SchemaError::Configuration`] for the first malformed intent.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
        let mut batch = Self::new();
        for (table, intent) in map {
            let intent = WriteIntent::deserialize(intent).map_err(|e| {
                SchemaError::Configuration(format!("Invalid intent for {table}: {e}"))
            })?;
            batch.insert(table, intent);
        }
        Ok(batch)
    }

    /// Intents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &WriteIntent)> {
        self.entries.iter().map(|(t, i)| (t.as_str(), i))
    }

    /// Number of tables in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What happened to one intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A row was inserted.
    Inserted {
        /// Generated or explicit id.
        id: Option<i64>,
    },
    /// An update matched rows.
    Updated {
        /// Rows changed.
        rows: u64,
    },
    /// An update matched nothing and was inserted instead.
    UpdateFellBackToInsert {
        /// Generated or explicit id.
        id: Option<i64>,
    },
    /// A native upsert ran.
    Upserted,
}

/// Per-table outcome of [`Database::manipulate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManipulationReport {
    /// `(table, outcome)` in batch order.
    pub outcomes: Vec<(String, WriteOutcome)>,
}

impl ManipulationReport {
    /// Outcome for a table.
    #[must_use]
    pub fn outcome(&self, table: &str) -> Option<WriteOutcome> {
        self.outcomes
            .iter()
            .find(|(t, _)| t == table)
            .map(|(_, outcome)| *outcome)
    }
}

fn fields_with_id(fields: &FieldValues, id_column: &str, id: Option<i64>) -> FieldValues {
    let mut fields = fields.clone();
    if let Some(id) = id {
        fields.insert(id_column.to_string(), Value::Int(id));
    }
    fields
}

impl<B: Backend> Database<B> {
    /// Applies a batch of writes.
    ///
    /// The whole batch is validated before anything is written. Empty strings
    /// at any depth are written as null. Backend failures are fatal and stop
    /// the batch at the failing table.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Configuration`] for an update with neither id
    /// nor filter, and a [`Severity::Fatal`] backend error for a failed write.
    pub fn manipulate(&mut self, batch: &ManipulationBatch) -> Result<ManipulationReport> {
        for (table, intent) in batch.iter() {
            if intent.command == WriteCommand::Update
                && intent.id.is_none()
                && intent.predicate.is_none()
            {
                return Err(SchemaError::Configuration(format!(
                    "Update of {table} needs an id or a where clause"
                )));
            }
        }

        let mut report = ManipulationReport::default();
        for (table, intent) in batch.iter() {
            let mut fields = intent.fields.clone();
            for value in fields.values_mut() {
                value.replace_empty_with_null();
            }
            let outcome = match intent.command {
                WriteCommand::Insert => self.write_insert(table, &fields, intent.id)?,
                WriteCommand::Update => self.write_update(table, &fields, intent)?,
            };
            debug!(table = %table, outcome = ?outcome, "Applied write");
            report.outcomes.push((table.to_string(), outcome));
        }
        Ok(report)
    }

    fn write_insert(
        &mut self,
        table: &str,
        fields: &FieldValues,
        id: Option<i64>,
    ) -> Result<WriteOutcome> {
        let statement = Statement::Insert {
            table: table.to_string(),
            fields: fields_with_id(fields, &self.config.id_column, id),
        };
        let result = self.run_write(&statement)?;
        Ok(WriteOutcome::Inserted {
            id: result.generated_id.or(id),
        })
    }

    fn write_update(
        &mut self,
        table: &str,
        fields: &FieldValues,
        intent: &WriteIntent,
    ) -> Result<WriteOutcome> {
        let id_column = self.config.id_column.clone();

        if self.config.upsert == UpsertStrategy::Native && intent.predicate.is_none() {
            if self.backend.supports_native_upsert() {
                let statement = Statement::Upsert {
                    table: table.to_string(),
                    fields: fields_with_id(fields, &id_column, intent.id),
                    key: id_column.clone(),
                };
                self.run_write(&statement)?;
                return Ok(WriteOutcome::Upserted);
            }
            debug!(table = %table, "Backend has no native upsert, using update then insert");
        }

        let predicate = match (&intent.predicate, intent.id) {
            (Some(predicate), _) => predicate.clone(),
            (None, Some(id)) => Predicate::eq(id_column, id),
            (None, None) => {
                return Err(SchemaError::Configuration(format!(
                    "Update of {table} needs an id or a where clause"
                )))
            }
        };
        let statement = Statement::Update {
            table: table.to_string(),
            fields: fields.clone(),
            predicate,
        };
        let result = self.run_write(&statement)?;
        if result.affected_rows > 0 {
            return Ok(WriteOutcome::Updated {
                rows: result.affected_rows,
            });
        }

        warn!(table = %table, id = ?intent.id, "Update matched no rows, inserting");
        match self.write_insert(table, fields, intent.id)? {
            WriteOutcome::Inserted { id } => Ok(WriteOutcome::UpdateFellBackToInsert { id }),
            other => Ok(other),
        }
    }

    fn run_write(&mut self, statement: &Statement) -> Result<crate::backend::ExecResult> {
        self.backend
            .execute(statement)
            .map_err(|e| SchemaError::backend(Severity::Fatal, e))
    }
}
