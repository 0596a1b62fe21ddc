//! Lazily-fetched view of the live schema.
//!
//! The table list is read once per session; each table's fields and indexes
//! are read on first access and then memoized for the rest of the session,
//! even after staged changes are committed. Table names are compared
//! case-insensitively.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::backend::Backend;
use crate::error::BackendError;
use crate::spec::{FieldSpec, IndexSpec, SpecMap};

/// Memoized tables, fields, and indexes.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    /// Lowercased name -> name as reported by the backend.
    tables: Option<BTreeMap<String, String>>,
    fields: HashMap<String, SpecMap<FieldSpec>>,
    indexes: HashMap<String, SpecMap<IndexSpec>>,
}

fn key(table: &str) -> String {
    table.to_lowercase()
}

impl SnapshotCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything fetched so far.
    pub fn clear(&mut self) {
        self.tables = None;
        self.fields.clear();
        self.indexes.clear();
    }

    /// Fetches the table list if it hasn't been fetched yet.
    ///
    /// # Errors
    ///
    /// Propagates the backend's failure to list tables.
    pub fn load_tables<B: Backend + ?Sized>(&mut self, backend: &mut B) -> Result<(), BackendError> {
        if self.tables.is_none() {
            let names = backend.list_tables()?;
            debug!(count = names.len(), "Fetched table list");
            self.tables = Some(names.into_iter().map(|n| (key(&n), n)).collect());
        }
        Ok(())
    }

    /// Returns `true` if the table exists (case-insensitive).
    ///
    /// # Errors
    ///
    /// Propagates the backend's failure to list tables.
    pub fn table_exists<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        table: &str,
    ) -> Result<bool, BackendError> {
        self.load_tables(backend)?;
        Ok(self
            .tables
            .as_ref()
            .is_some_and(|tables| tables.contains_key(&key(table))))
    }

    /// Returns the backend's spelling of a table name, if it exists.
    #[must_use]
    pub fn actual_name(&self, table: &str) -> Option<&str> {
        self.tables
            .as_ref()
            .and_then(|tables| tables.get(&key(table)))
            .map(String::as_str)
    }

    /// Returns the table's fields, fetching them on first access.
    ///
    /// # Errors
    ///
    /// Propagates the backend's failure to list tables or fields.
    pub fn fields_of<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        table: &str,
    ) -> Result<&SpecMap<FieldSpec>, BackendError> {
        let k = key(table);
        if !self.fields.contains_key(&k) {
            self.load_tables(backend)?;
            let fields = backend.list_fields(self.actual_name(table).unwrap_or(table))?;
            debug!(table = %table, count = fields.len(), "Fetched field list");
            self.fields.insert(k.clone(), fields);
        }
        Ok(&self.fields[&k])
    }

    /// Returns the table's indexes, fetching them on first access.
    ///
    /// # Errors
    ///
    /// Propagates the backend's failure to list tables or indexes.
    pub fn indexes_of<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        table: &str,
    ) -> Result<&SpecMap<IndexSpec>, BackendError> {
        let k = key(table);
        if !self.indexes.contains_key(&k) {
            self.load_tables(backend)?;
            let indexes = backend.list_indexes(self.actual_name(table).unwrap_or(table))?;
            debug!(table = %table, count = indexes.len(), "Fetched index list");
            self.indexes.insert(k.clone(), indexes);
        }
        Ok(&self.indexes[&k])
    }

    /// Records a rename so later lookups in the session see the new name.
    ///
    /// Has no effect on the table list if it hasn't been fetched yet.
    pub fn record_rename(&mut self, from: &str, to: &str) {
        if let Some(tables) = self.tables.as_mut() {
            tables.remove(&key(from));
            tables.insert(key(to), to.to_string());
        }
        if let Some(fields) = self.fields.remove(&key(from)) {
            self.fields.insert(key(to), fields);
        }
        if let Some(indexes) = self.indexes.remove(&key(from)) {
            self.indexes.insert(key(to), indexes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BackendCall, MemoryBackend};

    fn backend_with_page() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        backend.add_table(
            "SiteTree",
            [("ID", "int(11) not null auto_increment"), ("Title", "varchar(255)")],
            [("Title", "(Title)")],
        );
        backend
    }

    #[test]
    fn table_lookup_is_case_insensitive() {
        let mut backend = backend_with_page();
        let mut cache = SnapshotCache::new();

        assert!(cache.table_exists(&mut backend, "sitetree").unwrap());
        assert!(cache.table_exists(&mut backend, "SITETREE").unwrap());
        assert!(!cache.table_exists(&mut backend, "Member").unwrap());
        assert_eq!(cache.actual_name("sitetree"), Some("SiteTree"));
    }

    #[test]
    fn fields_are_fetched_once() {
        let mut backend = backend_with_page();
        let mut cache = SnapshotCache::new();

        let fields = cache.fields_of(&mut backend, "SiteTree").unwrap();
        assert_eq!(fields.len(), 2);
        cache.fields_of(&mut backend, "sitetree").unwrap();
        cache.indexes_of(&mut backend, "SiteTree").unwrap();
        cache.indexes_of(&mut backend, "SiteTree").unwrap();
        cache.table_exists(&mut backend, "SiteTree").unwrap();

        assert_eq!(backend.count_calls(|c| matches!(c, BackendCall::ListFields(_))), 1);
        assert_eq!(backend.count_calls(|c| matches!(c, BackendCall::ListIndexes(_))), 1);
        assert_eq!(backend.count_calls(|c| matches!(c, BackendCall::ListTables)), 1);
    }

    #[test]
    fn clear_forces_refetch() {
        let mut backend = backend_with_page();
        let mut cache = SnapshotCache::new();

        cache.table_exists(&mut backend, "SiteTree").unwrap();
        cache.clear();
        cache.table_exists(&mut backend, "SiteTree").unwrap();
        assert_eq!(backend.count_calls(|c| matches!(c, BackendCall::ListTables)), 2);
    }

    #[test]
    fn rename_moves_cached_entries() {
        let mut backend = backend_with_page();
        let mut cache = SnapshotCache::new();

        cache.fields_of(&mut backend, "SiteTree").unwrap();
        cache.record_rename("SiteTree", "_obsolete_SiteTree");

        assert!(!cache.table_exists(&mut backend, "SiteTree").unwrap());
        assert!(cache.table_exists(&mut backend, "_obsolete_SiteTree").unwrap());
        cache.fields_of(&mut backend, "_obsolete_SiteTree").unwrap();
        assert_eq!(backend.count_calls(|c| matches!(c, BackendCall::ListFields(_))), 1);
    }
}
