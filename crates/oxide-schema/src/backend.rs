//! Backend contract.
//!
//! The engine never generates SQL. Driver crates (oxide-schema-sqlite, or the
//! bundled [`MemoryBackend`](crate::memory::MemoryBackend)) implement
//! [`Backend`] to introspect, execute DDL, and run [`Statement`]s.
//!
//! All calls are blocking and run to completion before the engine continues.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::spec::{FieldSpec, IndexSpec, SpecMap};
use crate::value::{Row, Value};

/// Column values for a write, keyed by column name.
pub type FieldValues = BTreeMap<String, Value>;

/// Row filter for updates and selects.
///
/// In JSON a filter is a `{"column", "value"}` object, an array of filters
/// (all must hold), or a string of backend-native filter text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    /// `column = value` (`IS NULL` for [`Value::Null`]).
    Eq {
        /// Column name.
        column: String,
        /// Value to match.
        value: Value,
    },
    /// All predicates must hold.
    And(Vec<Predicate>),
    /// Backend-native filter text, passed through verbatim.
    Raw(String),
}

impl Predicate {
    /// `column = value`.
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Raw filter text.
    #[must_use]
    pub fn raw(filter: impl Into<String>) -> Self {
        Self::Raw(filter.into())
    }

    /// Evaluates the predicate against a row.
    ///
    /// Returns `None` when the predicate contains [`Predicate::Raw`], which only
    /// the backend can interpret.
    #[must_use]
    pub fn matches(&self, row: &Row) -> Option<bool> {
        match self {
            Self::Eq { column, value } => {
                Some(row.get(column).unwrap_or(&Value::Null) == value)
            }
            Self::And(parts) => {
                let mut all = true;
                for part in parts {
                    all &= part.matches(row)?;
                }
                Some(all)
            }
            Self::Raw(_) => None,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq { column, value } => write!(f, "{column} = {value}"),
            Self::And(parts) => {
                let parts: Vec<String> = parts.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" AND "))
            }
            Self::Raw(filter) => write!(f, "{filter}"),
        }
    }
}

/// A data statement for [`Backend::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Read rows.
    Select {
        /// Table name.
        table: String,
        /// Columns to return; empty means all.
        columns: Vec<String>,
        /// Optional filter.
        predicate: Option<Predicate>,
    },
    /// Insert one row.
    Insert {
        /// Table name.
        table: String,
        /// Column values.
        fields: FieldValues,
    },
    /// Update matching rows.
    Update {
        /// Table name.
        table: String,
        /// Assignments.
        fields: FieldValues,
        /// Rows to update.
        predicate: Predicate,
    },
    /// Atomic insert-or-update keyed on one column.
    Upsert {
        /// Table name.
        table: String,
        /// Column values, including the key column.
        fields: FieldValues,
        /// Conflict column.
        key: String,
    },
    /// Backend-native statement text.
    Raw(String),
}

impl Statement {
    /// Returns the target table, if the statement has one.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Select { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Upsert { table, .. } => Some(table),
            Self::Raw(_) => None,
        }
    }

    /// Returns a short verb for logging.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Select { .. } => "select",
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Upsert { .. } => "upsert",
            Self::Raw(_) => "raw",
        }
    }
}

/// Result of [`Backend::execute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    /// Rows changed by a write.
    pub affected_rows: u64,
    /// Id generated by an insert, if any.
    pub generated_id: Option<i64>,
    /// Rows returned by a read.
    pub rows: Vec<Row>,
}

/// Operations the engine needs from a database connection.
///
/// Implementations own one connection; calls never overlap.
pub trait Backend {
    /// Lists existing table names.
    ///
    /// # Errors
    ///
    /// Fails if the catalog can't be read.
    fn list_tables(&mut self) -> Result<Vec<String>, BackendError>;

    /// Lists a table's columns with their specs, in column order.
    ///
    /// # Errors
    ///
    /// Fails if the table doesn't exist.
    fn list_fields(&mut self, table: &str) -> Result<SpecMap<FieldSpec>, BackendError>;

    /// Lists a table's indexes with their specs.
    ///
    /// # Errors
    ///
    /// Fails if the table doesn't exist.
    fn list_indexes(&mut self, table: &str) -> Result<SpecMap<IndexSpec>, BackendError>;

    /// Creates a table with its columns and indexes.
    ///
    /// # Errors
    ///
    /// Fails if the driver rejects any statement; no table is left behind.
    fn create_table(
        &mut self,
        table: &str,
        fields: &SpecMap<FieldSpec>,
        indexes: &SpecMap<IndexSpec>,
    ) -> Result<(), BackendError>;

    /// Adds and changes columns and indexes of an existing table.
    ///
    /// # Errors
    ///
    /// Fails if the driver rejects any statement; the table is left as it was.
    fn alter_table(
        &mut self,
        table: &str,
        new_fields: &SpecMap<FieldSpec>,
        new_indexes: &SpecMap<IndexSpec>,
        altered_fields: &SpecMap<FieldSpec>,
        altered_indexes: &SpecMap<IndexSpec>,
    ) -> Result<(), BackendError>;

    /// Renames a table.
    ///
    /// # Errors
    ///
    /// Fails if the source is missing or the target name is taken.
    fn rename_table(&mut self, from: &str, to: &str) -> Result<(), BackendError>;

    /// Adds one column to an existing table.
    ///
    /// # Errors
    ///
    /// Fails if the driver rejects the column.
    fn create_field(&mut self, table: &str, field: &str, spec: &FieldSpec)
        -> Result<(), BackendError>;

    /// Executes a data statement.
    ///
    /// # Errors
    ///
    /// Fails if the driver rejects the statement.
    fn execute(&mut self, statement: &Statement) -> Result<ExecResult, BackendError>;

    /// Whether column specs may carry `character set` / `collate` clauses.
    fn supports_collations(&self) -> bool;

    /// Whether [`Statement::Upsert`] is supported.
    fn supports_native_upsert(&self) -> bool {
        false
    }

    /// Verifies a table's structural consistency. `Ok(false)` means it needs repair.
    ///
    /// # Errors
    ///
    /// Fails if the check itself can't run.
    fn check_table(&mut self, _table: &str) -> Result<bool, BackendError> {
        Ok(true)
    }

    /// Repairs a table that failed [`Backend::check_table`].
    ///
    /// # Errors
    ///
    /// Fails if the table can't be repaired.
    fn repair_table(&mut self, _table: &str) -> Result<(), BackendError> {
        Ok(())
    }
}
