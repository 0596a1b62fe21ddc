//! In-memory reference backend.
//!
//! Keeps tables, specs, and rows in memory and logs every call. Useful for
//! computing a diff without a database and for tests.

use std::collections::HashSet;

use crate::backend::{Backend, ExecResult, FieldValues, Predicate, Statement};
use crate::error::BackendError;
use crate::spec::{FieldSpec, IndexSpec, SpecMap};
use crate::value::{Row, Value};

/// Primary key column the memory backend auto-increments unless configured
/// otherwise with [`MemoryBackend::with_id_column`].
pub const DEFAULT_ID_COLUMN: &str = "ID";

/// A call made against a [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    ListTables,
    ListFields(String),
    ListIndexes(String),
    CreateTable { table: String },
    AlterTable { table: String },
    RenameTable { from: String, to: String },
    CreateField { table: String, field: String },
    Execute(Statement),
    CheckTable(String),
    RepairTable(String),
}

#[derive(Debug, Clone)]
struct MemoryTable {
    name: String,
    fields: SpecMap<FieldSpec>,
    indexes: SpecMap<IndexSpec>,
    rows: Vec<Row>,
    next_id: i64,
}

impl MemoryTable {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: SpecMap::new(),
            indexes: SpecMap::new(),
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, id_column: &str, fields: &FieldValues) -> Result<i64, BackendError> {
        let id = fields.get(id_column).map_or(Ok(self.next_id), |value| {
            value.as_i64().ok_or_else(|| {
                BackendError::new(format!("{}.{id_column} must be an integer", self.name))
            })
        })?;
        let duplicate = self
            .rows
            .iter()
            .any(|row| row.get(id_column).and_then(Value::as_i64) == Some(id));
        if duplicate {
            return Err(BackendError::new(format!(
                "Duplicate entry '{id}' for key '{}.{id_column}'",
                self.name
            )));
        }
        self.next_id = self.next_id.max(id + 1);

        let mut row = Row::new().with(id_column, id);
        for (column, value) in fields {
            row.push(column.clone(), value.clone());
        }
        self.rows.push(row);
        Ok(id)
    }

    fn matching(&self, predicate: Option<&Predicate>) -> Result<Vec<usize>, BackendError> {
        let mut positions = Vec::new();
        for (position, row) in self.rows.iter().enumerate() {
            let hit = predicate.map_or(Ok(true), |predicate| {
                predicate.matches(row).ok_or_else(|| {
                    BackendError::new(format!("Unsupported filter on {}: {predicate}", self.name))
                })
            })?;
            if hit {
                positions.push(position);
            }
        }
        Ok(positions)
    }
}

/// A [`Backend`] over in-memory tables.
///
/// Collations are unsupported unless enabled with
/// [`MemoryBackend::set_collations`]; native upsert is supported unless
/// disabled.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    tables: Vec<MemoryTable>,
    calls: Vec<BackendCall>,
    id_column: String,
    collations: bool,
    native_upsert: bool,
    unhealthy: HashSet<String>,
    failing: HashSet<String>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            calls: Vec::new(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            collations: false,
            native_upsert: true,
            unhealthy: HashSet::new(),
            failing: HashSet::new(),
        }
    }

    /// Uses `column` as the auto-incremented primary key of every table.
    ///
    /// Should match [`SchemaConfig::id_column`](crate::SchemaConfig::id_column)
    /// of the database driving this backend.
    #[must_use]
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// Primary key column.
    #[must_use]
    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Adds a table without logging a call.
    pub fn add_table<'a>(
        &mut self,
        name: &str,
        fields: impl IntoIterator<Item = (&'a str, &'a str)>,
        indexes: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) {
        let mut table = MemoryTable::new(name);
        table.fields = fields
            .into_iter()
            .map(|(f, s)| (f, FieldSpec::new(s)))
            .collect();
        table.indexes = indexes
            .into_iter()
            .map(|(i, s)| (i, IndexSpec::new(s)))
            .collect();
        self.tables.push(table);
    }

    /// Enables or disables collation support.
    pub fn set_collations(&mut self, enabled: bool) {
        self.collations = enabled;
    }

    /// Enables or disables native upsert.
    pub fn set_native_upsert(&mut self, enabled: bool) {
        self.native_upsert = enabled;
    }

    /// Makes `check_table` report the table as needing repair until repaired.
    pub fn mark_unhealthy(&mut self, table: &str) {
        self.unhealthy.insert(table.to_lowercase());
    }

    /// Makes every DDL and statement against the table fail.
    pub fn fail_on(&mut self, table: &str) {
        self.failing.insert(table.to_lowercase());
    }

    /// Returns `true` if the table exists (case-insensitive).
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.find(table).is_some()
    }

    /// Table names in creation order.
    #[must_use]
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Field specs of a table.
    #[must_use]
    pub fn fields(&self, table: &str) -> Option<&SpecMap<FieldSpec>> {
        self.find(table).map(|t| &self.tables[t].fields)
    }

    /// Index specs of a table.
    #[must_use]
    pub fn indexes(&self, table: &str) -> Option<&SpecMap<IndexSpec>> {
        self.find(table).map(|t| &self.tables[t].indexes)
    }

    /// Rows of a table.
    #[must_use]
    pub fn rows(&self, table: &str) -> &[Row] {
        self.find(table)
            .map(|t| self.tables[t].rows.as_slice())
            .unwrap_or_default()
    }

    /// Every call made so far.
    #[must_use]
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Number of calls matching a predicate.
    #[must_use]
    pub fn count_calls(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|c| predicate(c)).count()
    }

    /// Forgets the call log.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn find(&self, table: &str) -> Option<usize> {
        self.tables
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(table))
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut MemoryTable, BackendError> {
        if self.failing.contains(&table.to_lowercase()) {
            return Err(BackendError::new(format!("Table {table} is unavailable")));
        }
        self.find(table)
            .map(|position| &mut self.tables[position])
            .ok_or_else(|| BackendError::new(format!("Table {table} doesn't exist")))
    }

    fn table(&self, table: &str) -> Result<&MemoryTable, BackendError> {
        self.find(table)
            .map(|position| &self.tables[position])
            .ok_or_else(|| BackendError::new(format!("Table {table} doesn't exist")))
    }
}

impl Backend for MemoryBackend {
    fn list_tables(&mut self) -> Result<Vec<String>, BackendError> {
        self.calls.push(BackendCall::ListTables);
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    fn list_fields(&mut self, table: &str) -> Result<SpecMap<FieldSpec>, BackendError> {
        self.calls.push(BackendCall::ListFields(table.to_string()));
        Ok(self.table(table)?.fields.clone())
    }

    fn list_indexes(&mut self, table: &str) -> Result<SpecMap<IndexSpec>, BackendError> {
        self.calls.push(BackendCall::ListIndexes(table.to_string()));
        Ok(self.table(table)?.indexes.clone())
    }

    fn create_table(
        &mut self,
        table: &str,
        fields: &SpecMap<FieldSpec>,
        indexes: &SpecMap<IndexSpec>,
    ) -> Result<(), BackendError> {
        self.calls.push(BackendCall::CreateTable {
            table: table.to_string(),
        });
        if self.failing.contains(&table.to_lowercase()) {
            return Err(BackendError::new(format!("Can't create table {table}")));
        }
        if self.has_table(table) {
            return Err(BackendError::new(format!("Table {table} already exists")));
        }
        let mut created = MemoryTable::new(table);
        created.fields = fields.clone();
        created.indexes = indexes.clone();
        self.tables.push(created);
        Ok(())
    }

    fn alter_table(
        &mut self,
        table: &str,
        new_fields: &SpecMap<FieldSpec>,
        new_indexes: &SpecMap<IndexSpec>,
        altered_fields: &SpecMap<FieldSpec>,
        altered_indexes: &SpecMap<IndexSpec>,
    ) -> Result<(), BackendError> {
        self.calls.push(BackendCall::AlterTable {
            table: table.to_string(),
        });
        let existing = self.table_mut(table)?;
        if let Some(field) = new_fields.names().find(|f| existing.fields.contains(f)) {
            return Err(BackendError::new(format!(
                "Duplicate column name '{field}' in {table}"
            )));
        }
        for (field, spec) in new_fields.iter() {
            self.create_field(table, field, spec)?;
        }
        let target = self.table_mut(table)?;
        for (field, spec) in altered_fields.iter() {
            target.fields.insert(field, spec.clone());
        }
        for (index, spec) in new_indexes.iter().chain(altered_indexes.iter()) {
            target.indexes.insert(index, spec.clone());
        }
        Ok(())
    }

    fn rename_table(&mut self, from: &str, to: &str) -> Result<(), BackendError> {
        self.calls.push(BackendCall::RenameTable {
            from: from.to_string(),
            to: to.to_string(),
        });
        if self.has_table(to) {
            return Err(BackendError::new(format!("Table {to} already exists")));
        }
        self.table_mut(from)?.name = to.to_string();
        Ok(())
    }

    fn create_field(
        &mut self,
        table: &str,
        field: &str,
        spec: &FieldSpec,
    ) -> Result<(), BackendError> {
        self.calls.push(BackendCall::CreateField {
            table: table.to_string(),
            field: field.to_string(),
        });
        let target = self.table_mut(table)?;
        if target.fields.contains(field) {
            return Err(BackendError::new(format!(
                "Duplicate column name '{field}' in {table}"
            )));
        }
        target.fields.insert(field, spec.clone());
        Ok(())
    }

    fn execute(&mut self, statement: &Statement) -> Result<ExecResult, BackendError> {
        self.calls.push(BackendCall::Execute(statement.clone()));
        match statement {
            Statement::Select {
                table,
                columns,
                predicate,
            } => {
                let target = self.table_mut(table)?;
                let rows = target
                    .matching(predicate.as_ref())?
                    .into_iter()
                    .map(|position| {
                        let row = &target.rows[position];
                        if columns.is_empty() {
                            row.clone()
                        } else {
                            columns
                                .iter()
                                .map(|c| (c.as_str(), row.get(c).cloned().unwrap_or(Value::Null)))
                                .collect()
                        }
                    })
                    .collect();
                Ok(ExecResult {
                    rows,
                    ..ExecResult::default()
                })
            }
            Statement::Insert { table, fields } => {
                let id_column = self.id_column.clone();
                let id = self.table_mut(table)?.insert(&id_column, fields)?;
                Ok(ExecResult {
                    affected_rows: 1,
                    generated_id: Some(id),
                    rows: Vec::new(),
                })
            }
            Statement::Update {
                table,
                fields,
                predicate,
            } => {
                let target = self.table_mut(table)?;
                let positions = target.matching(Some(predicate))?;
                for &position in &positions {
                    for (column, value) in fields {
                        target.rows[position].push(column.clone(), value.clone());
                    }
                }
                Ok(ExecResult {
                    affected_rows: positions.len() as u64,
                    ..ExecResult::default()
                })
            }
            Statement::Upsert { table, fields, key } => {
                if !self.native_upsert {
                    return Err(BackendError::new("Native upsert is disabled"));
                }
                let id_column = self.id_column.clone();
                let target = self.table_mut(table)?;
                let key_value = fields.get(key).cloned().unwrap_or(Value::Null);
                let existing = target.matching(Some(&Predicate::eq(key.clone(), key_value)))?;
                if existing.is_empty() {
                    let id = target.insert(&id_column, fields)?;
                    return Ok(ExecResult {
                        affected_rows: 1,
                        generated_id: Some(id),
                        rows: Vec::new(),
                    });
                }
                for &position in &existing {
                    for (column, value) in fields {
                        target.rows[position].push(column.clone(), value.clone());
                    }
                }
                Ok(ExecResult {
                    affected_rows: existing.len() as u64,
                    ..ExecResult::default()
                })
            }
            Statement::Raw(text) => Err(BackendError::new(format!(
                "Raw statements are not supported in memory: {text}"
            ))),
        }
    }

    fn supports_collations(&self) -> bool {
        self.collations
    }

    fn supports_native_upsert(&self) -> bool {
        self.native_upsert
    }

    fn check_table(&mut self, table: &str) -> Result<bool, BackendError> {
        self.calls.push(BackendCall::CheckTable(table.to_string()));
        self.table(table)?;
        Ok(!self.unhealthy.contains(&table.to_lowercase()))
    }

    fn repair_table(&mut self, table: &str) -> Result<(), BackendError> {
        self.calls.push(BackendCall::RepairTable(table.to_string()));
        self.table_mut(table)?;
        self.unhealthy.remove(&table.to_lowercase());
        Ok(())
    }
}
