//! Engine configuration.
//!
//! Passed explicitly to [`Database`](crate::Database); there is no global state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::spec::SpecComparison;

/// How `manipulate` writes an update intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStrategy {
    /// UPDATE, then INSERT if no row was affected. Not atomic: a concurrent
    /// writer between the two statements can cause a duplicate-key failure
    /// or a lost update.
    #[default]
    UpdateThenInsert,
    /// Use the backend's atomic upsert when it has one and the intent has an
    /// id; otherwise behave like `UpdateThenInsert`.
    Native,
}

/// Configuration for a [`Database`](crate::Database).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Suppress the notification stream.
    pub quiet: bool,
    /// How existing and desired specs are compared.
    pub spec_comparison: SpecComparison,
    /// Run the backend consistency check on tables that already exist.
    pub check_existing_tables: bool,
    /// Prefix for archived tables.
    pub obsolete_prefix: String,
    /// Compute and report the diff without issuing DDL.
    pub dry_run: bool,
    /// Update strategy for `manipulate`.
    pub upsert: UpsertStrategy,
    /// Primary key column used by `manipulate`.
    pub id_column: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            quiet: false,
            spec_comparison: SpecComparison::Raw,
            check_existing_tables: true,
            obsolete_prefix: "_obsolete_".to_string(),
            dry_run: false,
            upsert: UpsertStrategy::UpdateThenInsert,
            id_column: "ID".to_string(),
        }
    }
}

impl SchemaConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Json`] for malformed input and
    /// [`SchemaError::Configuration`] when [`validate`](Self::validate) fails.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Io`] if the file can't be read, otherwise as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks values that serde can't.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Configuration`] for an empty prefix or id column.
    pub fn validate(&self) -> Result<()> {
        if self.obsolete_prefix.is_empty() {
            return Err(SchemaError::Configuration(
                "obsolete_prefix must not be empty".into(),
            ));
        }
        if self.id_column.is_empty() {
            return Err(SchemaError::Configuration("id_column must not be empty".into()));
        }
        Ok(())
    }

    /// Suppresses notifications.
    #[must_use]
    pub const fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Sets the spec comparison mode.
    #[must_use]
    pub const fn spec_comparison(mut self, mode: SpecComparison) -> Self {
        self.spec_comparison = mode;
        self
    }

    /// Enables or disables consistency checks of existing tables.
    #[must_use]
    pub const fn check_existing_tables(mut self, enabled: bool) -> Self {
        self.check_existing_tables = enabled;
        self
    }

    /// Sets the archive prefix.
    #[must_use]
    pub fn obsolete_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.obsolete_prefix = prefix.into();
        self
    }

    /// Enables dry-run mode.
    #[must_use]
    pub const fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Sets the update strategy.
    #[must_use]
    pub const fn upsert(mut self, strategy: UpsertStrategy) -> Self {
        self.upsert = strategy;
        self
    }

    /// Sets the primary key column.
    #[must_use]
    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = SchemaConfig::default();
        assert!(!config.quiet);
        assert!(config.check_existing_tables);
        assert_eq!(config.obsolete_prefix, "_obsolete_");
        assert_eq!(config.id_column, "ID");
        assert_eq!(config.spec_comparison, SpecComparison::Raw);
        assert_eq!(config.upsert, UpsertStrategy::UpdateThenInsert);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config =
            SchemaConfig::from_json_str(r#"{"quiet": true, "spec_comparison": "normalized"}"#)
                .unwrap();
        assert!(config.quiet);
        assert_eq!(config.spec_comparison, SpecComparison::Normalized);
        assert_eq!(config.obsolete_prefix, "_obsolete_");
    }

    #[test]
    fn rejects_empty_prefix() {
        let err = SchemaConfig::from_json_str(r#"{"obsolete_prefix": ""}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Configuration(_)));
    }

    #[test]
    fn rejects_unknown_strategy() {
        let err = SchemaConfig::from_json_str(r#"{"upsert": "merge"}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Json(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"dry_run": true, "upsert": "native"}}"#).unwrap();

        let config = SchemaConfig::from_json_file(file.path()).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.upsert, UpsertStrategy::Native);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SchemaConfig::from_json_file("/nonexistent/oxide-schema.json").unwrap_err();
        assert!(matches!(err, SchemaError::Io(_)));
    }
}
