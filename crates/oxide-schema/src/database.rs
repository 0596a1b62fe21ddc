//! Schema reconciliation engine.
//!
//! A [`Database`] owns one backend connection. Reconciliation happens inside a
//! session:
//!
//! ```text
//! Closed --begin_schema_update--> Active --end_schema_update--> Closed
//! ```
//!
//! While active, `require_*` and `dont_require_table` compare the desired
//! shape with a lazily-fetched [`SnapshotCache`] and stage the differences.
//! Nothing is written until `end_schema_update`, which replays the staged
//! changes with one create-or-alter call per table.

use tracing::{debug, info, warn};

use crate::backend::{Backend, ExecResult, Statement};
use crate::config::SchemaConfig;
use crate::definition::TableDefinition;
use crate::error::{BackendError, Result, SchemaError, Severity};
use crate::events::{ChangeKind, Notifier, SchemaEvent};
use crate::query::{BufferedRows, Query};
use crate::registry::FieldTypeRegistry;
use crate::snapshot::SnapshotCache;
use crate::spec::{FieldSpec, IndexDescriptor, SpecMatch};
use crate::staged::{
    AppliedChange, ChangeFailure, CommitReport, ReplayStep, StagedChanges, TableCommand,
};

#[derive(Debug, Default)]
struct Session {
    snapshot: SnapshotCache,
    staged: StagedChanges,
}

/// A database connection with schema reconciliation and batched writes.
pub struct Database<B: Backend> {
    pub(crate) backend: B,
    pub(crate) config: SchemaConfig,
    registry: FieldTypeRegistry,
    session: Option<Session>,
    notifier: Notifier,
}

fn closed(operation: &'static str) -> SchemaError {
    SchemaError::SessionState {
        operation,
        expected: "active",
        actual: "closed",
    }
}

fn read_error(err: BackendError) -> SchemaError {
    SchemaError::backend(Severity::Error, err)
}

impl<B: Backend> Database<B> {
    /// Wraps a backend with the default configuration.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, SchemaConfig::default())
    }

    /// Wraps a backend with the given configuration.
    #[must_use]
    pub fn with_config(backend: B, config: SchemaConfig) -> Self {
        Self {
            backend,
            notifier: Notifier::new(config.quiet),
            config,
            registry: FieldTypeRegistry::default(),
            session: None,
        }
    }

    /// Replaces the field-type registry.
    #[must_use]
    pub fn with_registry(mut self, registry: FieldTypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the field-type registry for registering custom types.
    pub fn field_types_mut(&mut self) -> &mut FieldTypeRegistry {
        &mut self.registry
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SchemaConfig {
        &self.config
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the backend mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Consumes the database and returns the backend.
    #[must_use]
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Returns `true` between `begin_schema_update` and `end_schema_update`.
    #[must_use]
    pub const fn is_schema_update_active(&self) -> bool {
        self.session.is_some()
    }

    /// Returns the changes staged so far, if a session is active.
    #[must_use]
    pub fn staged(&self) -> Option<&StagedChanges> {
        self.session.as_ref().map(|s| &s.staged)
    }

    /// Notifications emitted since the last [`Database::take_events`].
    #[must_use]
    pub fn events(&self) -> &[SchemaEvent] {
        self.notifier.events()
    }

    /// Drains the notification stream.
    pub fn take_events(&mut self) -> Vec<SchemaEvent> {
        self.notifier.take()
    }

    /// Opens a schema session: resets the snapshot and the staged change set.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::SessionState`] if a session is already active,
    /// or a backend error if the table list can't be read.
    pub fn begin_schema_update(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(SchemaError::SessionState {
                operation: "begin schema update",
                expected: "closed",
                actual: "active",
            });
        }
        let mut session = Session::default();
        session
            .snapshot
            .load_tables(&mut self.backend)
            .map_err(read_error)?;
        self.session = Some(session);
        info!(dry_run = self.config.dry_run, "Schema update started");
        Ok(())
    }

    /// Requires a table with the given fields and indexes.
    ///
    /// A missing table is staged for creation. An existing one is staged for
    /// a consistency check (if enabled). Every field and index is then
    /// reconciled with [`Database::require_field`] and
    /// [`Database::require_index`]. Field descriptors are resolved before
    /// anything is staged, so an unknown type leaves the session untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Configuration`] for an unknown field type,
    /// [`SchemaError::SessionState`] outside a session, or a backend error
    /// if introspection fails.
    pub fn require_table(&mut self, table: &str, definition: &TableDefinition) -> Result<()> {
        let fields = definition
            .fields()
            .map(|(name, descriptor)| self.registry.resolve(descriptor).map(|spec| (name, spec)))
            .collect::<Result<Vec<_>>>()?;

        let session = self.session.as_mut().ok_or_else(|| closed("require table"))?;
        let exists = session
            .snapshot
            .table_exists(&mut self.backend, table)
            .map_err(read_error)?;
        if !exists {
            if !session.staged.is_created(table) {
                session.staged.entry(table, TableCommand::Create);
                self.notifier
                    .emit(ChangeKind::Created, format!("Table {table}: created"));
            }
        } else if self.config.check_existing_tables {
            session.staged.stage_check(table);
        }

        for (name, spec) in fields {
            self.require_field(table, name, spec)?;
        }
        for (name, descriptor) in definition.indexes() {
            self.require_index(table, name, descriptor.clone())?;
        }
        Ok(())
    }

    /// Requires a field with the given spec.
    ///
    /// Collation clauses are stripped when the backend doesn't support them.
    /// The field is staged as created when the table is new or the field is
    /// missing, and as changed when the existing spec differs.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::SessionState`] outside a session, or a backend
    /// error if introspection fails.
    pub fn require_field(
        &mut self,
        table: &str,
        field: &str,
        spec: impl Into<FieldSpec>,
    ) -> Result<()> {
        let mut spec = spec.into();
        if !self.backend.supports_collations() {
            spec = spec.without_collation();
        }

        let session = self.session.as_mut().ok_or_else(|| closed("require field"))?;
        let new_table = !session
            .snapshot
            .table_exists(&mut self.backend, table)
            .map_err(read_error)?;

        if new_table {
            if !session.staged.is_created(table) {
                self.notifier
                    .emit(ChangeKind::Created, format!("Table {table}: created"));
            }
            self.notifier.emit(
                ChangeKind::Created,
                format!("Field {table}.{field}: created as {spec}"),
            );
            session
                .staged
                .entry(table, TableCommand::Create)
                .add_field(field, spec);
            return Ok(());
        }

        let existing = session
            .snapshot
            .fields_of(&mut self.backend, table)
            .map_err(read_error)?
            .get(field)
            .cloned();

        let Some(existing) = existing else {
            self.notifier.emit(
                ChangeKind::Created,
                format!("Field {table}.{field}: created as {spec}"),
            );
            session
                .staged
                .entry(table, TableCommand::Alter)
                .add_field(field, spec);
            return Ok(());
        };

        let mode = self.config.spec_comparison;
        let outcome = mode.compare(existing.as_str(), spec.as_str());
        if outcome == SpecMatch::Stale {
            warn!(
                table = %table,
                field = %field,
                existing = %existing,
                desired = %spec,
                "Field spec differs only in formatting"
            );
        }
        if mode.needs_alter(outcome) {
            self.notifier.emit(
                ChangeKind::Changed,
                format!("Field {table}.{field}: changed to {spec} (from {existing})"),
            );
            session
                .staged
                .entry(table, TableCommand::Alter)
                .alter_field(field, spec);
        } else {
            debug!(table = %table, field = %field, "Field is up to date");
        }
        Ok(())
    }

    /// Requires an index.
    ///
    /// [`IndexDescriptor::Shorthand`] expands to a single-column index on the
    /// column named like the index. Staging follows the same rules as
    /// [`Database::require_field`].
    ///
    /// # Errors
    ///
    /// As [`Database::require_field`].
    pub fn require_index(
        &mut self,
        table: &str,
        index: &str,
        descriptor: impl Into<IndexDescriptor>,
    ) -> Result<()> {
        let spec = descriptor.into().resolve(index);

        let session = self.session.as_mut().ok_or_else(|| closed("require index"))?;
        let new_table = !session
            .snapshot
            .table_exists(&mut self.backend, table)
            .map_err(read_error)?;

        if new_table {
            if !session.staged.is_created(table) {
                self.notifier
                    .emit(ChangeKind::Created, format!("Table {table}: created"));
            }
            self.notifier.emit(
                ChangeKind::Created,
                format!("Index {table}.{index}: created as {spec}"),
            );
            session
                .staged
                .entry(table, TableCommand::Create)
                .add_index(index, spec);
            return Ok(());
        }

        let existing = session
            .snapshot
            .indexes_of(&mut self.backend, table)
            .map_err(read_error)?
            .get(index)
            .cloned();

        let Some(existing) = existing else {
            self.notifier.emit(
                ChangeKind::Created,
                format!("Index {table}.{index}: created as {spec}"),
            );
            session
                .staged
                .entry(table, TableCommand::Alter)
                .add_index(index, spec);
            return Ok(());
        };

        let mode = self.config.spec_comparison;
        let outcome = mode.compare(existing.as_str(), spec.as_str());
        if outcome == SpecMatch::Stale {
            warn!(
                table = %table,
                index = %index,
                existing = %existing,
                desired = %spec,
                "Index spec differs only in formatting"
            );
        }
        if mode.needs_alter(outcome) {
            self.notifier.emit(
                ChangeKind::Changed,
                format!("Index {table}.{index}: changed to {spec} (from {existing})"),
            );
            session
                .staged
                .entry(table, TableCommand::Alter)
                .alter_index(index, spec);
        } else {
            debug!(table = %table, index = %index, "Index is up to date");
        }
        Ok(())
    }

    /// Archives a table that is no longer required.
    ///
    /// The table is renamed to `<prefix><table>`, or `<prefix><table>N` with
    /// the smallest `N >= 2` that is free. Nothing is dropped. Returns the
    /// archive name, or `None` if the table doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::SessionState`] outside a session, or a backend
    /// error if the table list can't be read.
    pub fn dont_require_table(&mut self, table: &str) -> Result<Option<String>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| closed("archive table"))?;
        if !session
            .snapshot
            .table_exists(&mut self.backend, table)
            .map_err(read_error)?
        {
            debug!(table = %table, "Table not present, nothing to archive");
            return Ok(None);
        }

        let from = session
            .snapshot
            .actual_name(table)
            .unwrap_or(table)
            .to_string();
        let base = format!("{}{from}", self.config.obsolete_prefix);
        let mut archive = base.clone();
        let mut suffix = 1;
        while session
            .snapshot
            .table_exists(&mut self.backend, &archive)
            .map_err(read_error)?
            || session.staged.is_created(&archive)
        {
            suffix += 1;
            archive = format!("{base}{suffix}");
        }

        if session.staged.discard_existing(&from) {
            debug!(table = %from, "Dropped staged changes of archived table");
        }
        session.staged.stage_rename(&from, &archive);
        session.snapshot.record_rename(&from, &archive);
        self.notifier.emit(
            ChangeKind::Obsolete,
            format!("Table {from}: renamed to {archive}"),
        );
        Ok(Some(archive))
    }

    /// Commits the session: replays staged renames, then one create or alter
    /// per table, then consistency checks. The session closes whether or not
    /// every step succeeds.
    ///
    /// Failed steps don't stop the replay; they are collected and returned as
    /// [`SchemaError::Commit`] with the per-table outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::SessionState`] outside a session and
    /// [`SchemaError::Commit`] when any replay step fails.
    pub fn end_schema_update(&mut self) -> Result<CommitReport> {
        let session = self.session.take().ok_or_else(|| closed("end schema update"))?;
        let staged = session.staged;
        let dry_run = self.config.dry_run;
        let mut report = CommitReport {
            dry_run,
            ..CommitReport::default()
        };

        for rename in staged.renames() {
            let result = if dry_run {
                Ok(())
            } else {
                self.backend.rename_table(&rename.from, &rename.to)
            };
            let step = ReplayStep::Rename {
                to: rename.to.clone(),
            };
            self.record(&mut report, &rename.from, step, result);
        }

        for change in staged.tables() {
            if change.command == TableCommand::Alter && change.is_empty() {
                continue;
            }
            let (step, result) = match change.command {
                TableCommand::Create => (
                    ReplayStep::Create,
                    if dry_run {
                        Ok(())
                    } else {
                        self.backend.create_table(
                            &change.table,
                            &change.new_fields,
                            &change.new_indexes,
                        )
                    },
                ),
                TableCommand::Alter => (
                    ReplayStep::Alter,
                    if dry_run {
                        Ok(())
                    } else {
                        self.backend.alter_table(
                            &change.table,
                            &change.new_fields,
                            &change.new_indexes,
                            &change.altered_fields,
                            &change.altered_indexes,
                        )
                    },
                ),
            };
            self.record(&mut report, &change.table, step, result);
        }

        if !dry_run {
            for table in staged.checks() {
                self.check_and_repair(&mut report, table);
            }
        }

        info!(
            applied = report.applied.len(),
            failed = report.failures.len(),
            dry_run,
            "Schema update finished"
        );
        if report.is_success() {
            Ok(report)
        } else {
            Err(SchemaError::Commit(report))
        }
    }

    fn check_and_repair(&mut self, report: &mut CommitReport, table: &str) {
        match self.backend.check_table(table) {
            Ok(true) => debug!(table = %table, "Table check passed"),
            Ok(false) => {
                warn!(table = %table, "Table check failed, repairing");
                let result = self.backend.repair_table(table);
                if result.is_ok() {
                    self.notifier
                        .emit(ChangeKind::Repaired, format!("Table {table}: repaired"));
                }
                self.record(report, table, ReplayStep::Repair, result);
            }
            Err(err) => {
                warn!(
                    table = %table,
                    severity = %Severity::Warning,
                    error = %err,
                    "Table check could not run"
                );
                self.record(report, table, ReplayStep::Repair, Err(err));
            }
        }
    }

    fn record(
        &mut self,
        report: &mut CommitReport,
        table: &str,
        step: ReplayStep,
        result: std::result::Result<(), BackendError>,
    ) {
        match result {
            Ok(()) => {
                info!(table = %table, step = %step, "Applied schema change");
                report.applied.push(AppliedChange {
                    table: table.to_string(),
                    step,
                });
            }
            Err(error) => {
                warn!(table = %table, step = %step, error = %error, "Schema change failed");
                self.notifier.emit(
                    ChangeKind::Error,
                    format!("Table {table}: {step} failed: {error}"),
                );
                report.failures.push(ChangeFailure {
                    table: table.to_string(),
                    step,
                    error,
                });
            }
        }
    }

    /// Executes a statement and returns the raw result.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the statement fails.
    pub fn execute(&mut self, statement: &Statement) -> Result<ExecResult> {
        debug!(verb = statement.verb(), table = ?statement.table(), "Executing statement");
        self.backend
            .execute(statement)
            .map_err(|e| SchemaError::backend(Severity::Error, e))
    }

    /// Executes a statement and wraps its rows in a [`Query`].
    ///
    /// # Errors
    ///
    /// Returns a backend error if the statement fails.
    pub fn query(&mut self, statement: &Statement) -> Result<Query<BufferedRows>> {
        let result = self.execute(statement)?;
        Ok(Query::new(BufferedRows::new(result.rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BackendCall, MemoryBackend};
    use crate::spec::{IndexSpec, SpecComparison};

    fn page_backend() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        backend.add_table(
            "Page",
            [
                ("ID", "int(11) not null auto_increment"),
                ("Title", "varchar(255)"),
            ],
            [("Title", "(Title)")],
        );
        backend
    }

    #[test]
    fn require_before_begin_fails_fast() {
        let mut db = Database::new(page_backend());
        let err = db.require_field("Page", "Title", "text").unwrap_err();
        assert!(matches!(
            err,
            SchemaError::SessionState {
                actual: "closed",
                ..
            }
        ));
        assert!(db.end_schema_update().is_err());
        assert!(db.dont_require_table("Page").is_err());
    }

    #[test]
    fn nested_begin_is_rejected() {
        let mut db = Database::new(page_backend());
        db.begin_schema_update().unwrap();
        let err = db.begin_schema_update().unwrap_err();
        assert!(matches!(
            err,
            SchemaError::SessionState {
                actual: "active",
                ..
            }
        ));
        assert!(db.is_schema_update_active());
    }

    #[test]
    fn new_table_is_staged_once_with_all_fields() {
        let mut db = Database::new(MemoryBackend::new());
        db.begin_schema_update().unwrap();

        let definition = TableDefinition::new()
            .field("ID", "int(11) not null auto_increment")
            .field("Email", "varchar(100)")
            .index("Email", IndexDescriptor::Shorthand);
        db.require_table("Member", &definition).unwrap();
        db.require_field("Member", "Surname", "varchar(50)").unwrap();

        let staged = db.staged().unwrap();
        assert_eq!(staged.tables().len(), 1);
        let change = staged.get("member").unwrap();
        assert_eq!(change.command, TableCommand::Create);
        assert_eq!(
            change.new_fields.names().collect::<Vec<_>>(),
            vec!["ID", "Email", "Surname"]
        );
        assert_eq!(change.new_indexes.get("Email"), Some(&IndexSpec::new("(Email)")));

        db.end_schema_update().unwrap();
        assert_eq!(
            db.backend()
                .count_calls(|c| matches!(c, BackendCall::CreateTable { .. })),
            1
        );
        assert!(db.backend().has_table("Member"));
    }

    #[test]
    fn changed_and_missing_fields_coalesce_into_one_alter() {
        let mut db = Database::new(page_backend());
        db.begin_schema_update().unwrap();
        db.require_field("Page", "Title", "varchar(100)").unwrap();
        db.require_field("Page", "Content", "mediumtext").unwrap();
        db.require_field("Page", "ID", "int(11) not null auto_increment")
            .unwrap();
        db.require_index("Page", "Title", "unique (Title)").unwrap();

        let change = db.staged().unwrap().get("Page").unwrap().clone();
        assert_eq!(change.command, TableCommand::Alter);
        assert_eq!(change.new_fields.names().collect::<Vec<_>>(), vec!["Content"]);
        assert_eq!(change.altered_fields.names().collect::<Vec<_>>(), vec!["Title"]);
        assert_eq!(
            change.altered_indexes.get("Title"),
            Some(&IndexSpec::new("unique(Title)"))
        );

        let report = db.end_schema_update().unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(
            db.backend()
                .count_calls(|c| matches!(c, BackendCall::AlterTable { .. })),
            1
        );
    }

    #[test]
    fn events_describe_changes() {
        let mut db = Database::new(page_backend());
        db.begin_schema_update().unwrap();
        db.require_field("Page", "Title", "varchar(100)").unwrap();
        db.require_field("Page", "Sort", "int(11)").unwrap();

        let events = db.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ChangeKind::Changed);
        assert_eq!(
            events[0].message,
            "Field Page.Title: changed to varchar(100) (from varchar(255))"
        );
        assert_eq!(events[1].kind, ChangeKind::Created);
    }

    #[test]
    fn quiet_config_suppresses_events() {
        let config = SchemaConfig::new().quiet(true);
        let mut db = Database::with_config(page_backend(), config);
        db.begin_schema_update().unwrap();
        db.require_field("Page", "Sort", "int(11)").unwrap();
        assert!(db.events().is_empty());
        assert_eq!(db.staged().unwrap().tables().len(), 1);
    }

    #[test]
    fn collation_is_stripped_without_backend_support() {
        let mut db = Database::new(page_backend());
        db.begin_schema_update().unwrap();
        db.require_field(
            "Page",
            "Title",
            "varchar(255) character set utf8 collate utf8_general_ci",
        )
        .unwrap();
        assert!(db.staged().unwrap().get("Page").is_none());

        let mut backend = page_backend();
        backend.set_collations(true);
        let mut db = Database::new(backend);
        db.begin_schema_update().unwrap();
        db.require_field(
            "Page",
            "Title",
            "varchar(255) character set utf8 collate utf8_general_ci",
        )
        .unwrap();
        assert!(db.staged().unwrap().get("Page").is_some());
    }

    #[test]
    fn normalized_comparison_ignores_formatting() {
        let config = SchemaConfig::new().spec_comparison(SpecComparison::Normalized);
        let mut db = Database::with_config(page_backend(), config);
        db.begin_schema_update().unwrap();
        db.require_field("Page", "Title", "VARCHAR( 255 )").unwrap();
        assert!(db.staged().unwrap().get("Page").is_none());

        let mut db = Database::new(page_backend());
        db.begin_schema_update().unwrap();
        db.require_field("Page", "Title", "VARCHAR( 255 )").unwrap();
        assert!(db.staged().unwrap().get("Page").is_some());
    }

    #[test]
    fn unknown_field_type_stages_nothing() {
        let mut db = Database::new(MemoryBackend::new());
        db.begin_schema_update().unwrap();
        let definition = TableDefinition::new()
            .field("Title", "Varchar(50)")
            .field("Price", "Money");
        let err = db.require_table("Product", &definition).unwrap_err();
        assert!(matches!(err, SchemaError::Configuration(_)));
        assert!(db.staged().unwrap().is_empty());
    }

    #[test]
    fn dry_run_reports_without_touching_backend() {
        let config = SchemaConfig::new().dry_run(true);
        let mut db = Database::with_config(page_backend(), config);
        db.begin_schema_update().unwrap();
        db.require_field("Page", "Sort", "int(11)").unwrap();
        db.require_table("Log", &TableDefinition::new().field("ID", "int"))
            .unwrap();
        db.dont_require_table("Page").unwrap();

        let report = db.end_schema_update().unwrap();
        assert!(report.dry_run);
        assert_eq!(report.applied.len(), 3);
        let backend = db.backend();
        assert_eq!(
            backend.count_calls(|c| matches!(
                c,
                BackendCall::CreateTable { .. }
                    | BackendCall::AlterTable { .. }
                    | BackendCall::RenameTable { .. }
                    | BackendCall::CheckTable(_)
            )),
            0
        );
        assert!(!backend.has_table("Log"));
    }

    #[test]
    fn unhealthy_table_is_repaired_at_commit() {
        let mut backend = page_backend();
        backend.mark_unhealthy("Page");
        let mut db = Database::new(backend);
        db.begin_schema_update().unwrap();
        db.require_table("Page", &TableDefinition::new()).unwrap();
        db.take_events();

        let report = db.end_schema_update().unwrap();
        assert_eq!(report.applied[0].step, ReplayStep::Repair);
        let events = db.take_events();
        assert_eq!(events[0].kind, ChangeKind::Repaired);
        assert_eq!(
            db.backend()
                .count_calls(|c| matches!(c, BackendCall::RepairTable(_))),
            1
        );
    }

    #[test]
    fn checks_can_be_disabled() {
        let config = SchemaConfig::new().check_existing_tables(false);
        let mut db = Database::with_config(page_backend(), config);
        db.begin_schema_update().unwrap();
        db.require_table("Page", &TableDefinition::new()).unwrap();
        db.end_schema_update().unwrap();
        assert_eq!(
            db.backend()
                .count_calls(|c| matches!(c, BackendCall::CheckTable(_))),
            0
        );
    }
}
