//! Staged change set and commit reporting.
//!
//! Staging only records intent. Each table gets at most one
//! [`PendingTableChange`] per session; later requirements against the same
//! table mutate that entry, so any number of `require_field` calls coalesce
//! into a single create or alter call at commit.

use std::collections::HashMap;
use std::fmt;

use crate::error::BackendError;
use crate::spec::{FieldSpec, IndexSpec, SpecMap};

/// Whether a pending change creates a table or alters an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCommand {
    /// The table doesn't exist yet.
    Create,
    /// The table exists.
    Alter,
}

/// Accumulated changes for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTableChange {
    /// Table name as first staged.
    pub table: String,
    /// Create or alter.
    pub command: TableCommand,
    /// Columns to add.
    pub new_fields: SpecMap<FieldSpec>,
    /// Indexes to add.
    pub new_indexes: SpecMap<IndexSpec>,
    /// Columns whose spec changes. Always empty for [`TableCommand::Create`].
    pub altered_fields: SpecMap<FieldSpec>,
    /// Indexes whose spec changes. Always empty for [`TableCommand::Create`].
    pub altered_indexes: SpecMap<IndexSpec>,
}

impl PendingTableChange {
    fn new(table: &str, command: TableCommand) -> Self {
        Self {
            table: table.to_string(),
            command,
            new_fields: SpecMap::new(),
            new_indexes: SpecMap::new(),
            altered_fields: SpecMap::new(),
            altered_indexes: SpecMap::new(),
        }
    }

    /// Returns `true` if nothing is staged beyond the entry itself.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_fields.is_empty()
            && self.new_indexes.is_empty()
            && self.altered_fields.is_empty()
            && self.altered_indexes.is_empty()
    }

    /// Stages a new column.
    pub fn add_field(&mut self, field: &str, spec: FieldSpec) {
        self.new_fields.insert(field, spec);
    }

    /// Stages a changed column. On a table being created this is a new column.
    pub fn alter_field(&mut self, field: &str, spec: FieldSpec) {
        match self.command {
            TableCommand::Create => self.new_fields.insert(field, spec),
            TableCommand::Alter => self.altered_fields.insert(field, spec),
        };
    }

    /// Stages a new index.
    pub fn add_index(&mut self, index: &str, spec: IndexSpec) {
        self.new_indexes.insert(index, spec);
    }

    /// Stages a changed index. On a table being created this is a new index.
    pub fn alter_index(&mut self, index: &str, spec: IndexSpec) {
        match self.command {
            TableCommand::Create => self.new_indexes.insert(index, spec),
            TableCommand::Alter => self.altered_indexes.insert(index, spec),
        };
    }
}

/// A staged archival rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObsoleteRename {
    /// Current table name.
    pub from: String,
    /// Archive name.
    pub to: String,
}

/// Everything staged in the current session.
#[derive(Debug, Default)]
pub struct StagedChanges {
    tables: Vec<PendingTableChange>,
    /// Lowercased table name -> position in `tables`.
    positions: HashMap<String, usize>,
    renames: Vec<ObsoleteRename>,
    checks: Vec<String>,
}

impl StagedChanges {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table's entry, creating it with `command` if absent.
    ///
    /// An existing entry keeps its original command.
    pub fn entry(&mut self, table: &str, command: TableCommand) -> &mut PendingTableChange {
        let key = table.to_lowercase();
        if let Some(&position) = self.positions.get(&key) {
            return &mut self.tables[position];
        }
        let position = self.tables.len();
        self.tables.push(PendingTableChange::new(table, command));
        self.positions.insert(key, position);
        &mut self.tables[position]
    }

    /// Looks up a table's entry (case-insensitive).
    #[must_use]
    pub fn get(&self, table: &str) -> Option<&PendingTableChange> {
        self.positions
            .get(&table.to_lowercase())
            .map(|&position| &self.tables[position])
    }

    /// Returns `true` if the table is staged for creation.
    #[must_use]
    pub fn is_created(&self, table: &str) -> bool {
        self.get(table)
            .is_some_and(|change| change.command == TableCommand::Create)
    }

    /// Stages an archival rename.
    pub fn stage_rename(&mut self, from: &str, to: &str) {
        self.renames.push(ObsoleteRename {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    /// Stages a consistency check of an existing table (once per table).
    pub fn stage_check(&mut self, table: &str) {
        if !self.checks.iter().any(|t| t.eq_ignore_ascii_case(table)) {
            self.checks.push(table.to_string());
        }
    }

    /// Drops the table's pending alter and consistency check.
    ///
    /// Used when the table is archived later in the session: those steps
    /// would run after the rename and target a table that no longer exists.
    /// A pending create is kept. Returns `true` if anything was dropped.
    pub fn discard_existing(&mut self, table: &str) -> bool {
        let key = table.to_lowercase();
        let checks_before = self.checks.len();
        self.checks.retain(|t| !t.eq_ignore_ascii_case(table));
        let mut dropped = self.checks.len() != checks_before;

        if let Some(&position) = self.positions.get(&key) {
            if self.tables[position].command == TableCommand::Alter {
                self.tables.remove(position);
                self.positions = self
                    .tables
                    .iter()
                    .enumerate()
                    .map(|(position, change)| (change.table.to_lowercase(), position))
                    .collect();
                dropped = true;
            }
        }
        dropped
    }

    /// Pending table changes in first-staged order.
    #[must_use]
    pub fn tables(&self) -> &[PendingTableChange] {
        &self.tables
    }

    /// Staged renames in staging order.
    #[must_use]
    pub fn renames(&self) -> &[ObsoleteRename] {
        &self.renames
    }

    /// Tables staged for a consistency check.
    #[must_use]
    pub fn checks(&self) -> &[String] {
        &self.checks
    }

    /// Returns `true` if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.renames.is_empty() && self.checks.is_empty()
    }
}

/// One step of commit replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStep {
    /// Archival rename to the given name.
    Rename {
        /// Archive name.
        to: String,
    },
    /// Table creation.
    Create,
    /// Table alteration.
    Alter,
    /// Consistency check and repair.
    Repair,
}

impl fmt::Display for ReplayStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rename { to } => write!(f, "rename to {to}"),
            Self::Create => write!(f, "create"),
            Self::Alter => write!(f, "alter"),
            Self::Repair => write!(f, "repair"),
        }
    }
}

/// A replay step that reached the backend successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    /// Table the step applied to.
    pub table: String,
    /// What was done.
    pub step: ReplayStep,
}

/// A replay step that failed.
#[derive(Debug)]
pub struct ChangeFailure {
    /// Table the step applied to.
    pub table: String,
    /// What was attempted.
    pub step: ReplayStep,
    /// Backend failure.
    pub error: BackendError,
}

/// Outcome of committing a session.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Steps applied (or, in dry-run mode, that would have been applied).
    pub applied: Vec<AppliedChange>,
    /// Steps that failed.
    pub failures: Vec<ChangeFailure>,
    /// Whether the commit ran without touching the backend.
    pub dry_run: bool,
}

impl CommitReport {
    /// Returns `true` if every step succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns `true` if nothing was staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_is_created_once_per_table() {
        let mut staged = StagedChanges::new();
        staged
            .entry("Page", TableCommand::Create)
            .add_field("Title", FieldSpec::new("text"));
        staged
            .entry("page", TableCommand::Alter)
            .add_field("Content", FieldSpec::new("text"));

        assert_eq!(staged.tables().len(), 1);
        let change = staged.get("PAGE").unwrap();
        assert_eq!(change.command, TableCommand::Create);
        assert_eq!(change.new_fields.len(), 2);
        assert!(staged.is_created("Page"));
    }

    #[test]
    fn alterations_on_created_table_become_new_fields() {
        let mut staged = StagedChanges::new();
        let change = staged.entry("Page", TableCommand::Create);
        change.alter_field("Title", FieldSpec::new("text"));
        change.alter_index("Title", IndexSpec::new("(Title)"));

        assert!(change.altered_fields.is_empty());
        assert!(change.altered_indexes.is_empty());
        assert_eq!(change.new_fields.len(), 1);
        assert_eq!(change.new_indexes.len(), 1);
    }

    #[test]
    fn checks_are_deduplicated() {
        let mut staged = StagedChanges::new();
        staged.stage_check("Member");
        staged.stage_check("member");
        assert_eq!(staged.checks().len(), 1);
        assert!(!staged.is_empty());
    }

    #[test]
    fn discard_drops_alter_and_check_only() {
        let mut staged = StagedChanges::new();
        staged
            .entry("Log", TableCommand::Alter)
            .add_field("Level", FieldSpec::new("int"));
        staged.entry("Page", TableCommand::Create);
        staged.entry("Member", TableCommand::Alter);
        staged.stage_check("log");

        assert!(staged.discard_existing("LOG"));
        assert!(staged.get("Log").is_none());
        assert!(staged.checks().is_empty());
        assert_eq!(staged.get("member").unwrap().table, "Member");
        assert_eq!(staged.tables().len(), 2);

        assert!(!staged.discard_existing("Page"));
        assert!(staged.is_created("Page"));
    }

    #[test]
    fn tables_keep_staging_order() {
        let mut staged = StagedChanges::new();
        staged.entry("B", TableCommand::Alter);
        staged.entry("A", TableCommand::Create);
        staged.entry("b", TableCommand::Alter);

        let names: Vec<&str> = staged.tables().iter().map(|c| c.table.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }
}
