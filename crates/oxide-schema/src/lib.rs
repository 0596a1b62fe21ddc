//! Declarative schema reconciliation for relational databases.
//!
//! `oxide-schema` lets callers describe the tables they need and converges the
//! live database towards that description:
//! - Missing tables, fields, and indexes are created
//! - Changed field and index specs are altered
//! - Tables that are no longer required are archived under an obsolete name,
//!   never dropped
//!
//! # Architecture
//!
//! - **Snapshot** - Lazily-fetched, memoized view of the live schema
//! - **Staged changes** - One pending create or alter per table
//! - **Database** - Session state machine that diffs and commits
//! - **Registry** - Named field-type constructors (`Varchar(255)`, `Int`, ...)
//! - **Manipulate** - Batched insert/update writes with update-or-insert fallback
//! - **Query** - Position-tracked cursor over backend row primitives
//! - **Backend** - The contract drivers implement; see `oxide-schema-sqlite`
//!
//! # Example
//!
//! ```rust
//! use oxide_schema::memory::MemoryBackend;
//! use oxide_schema::prelude::*;
//!
//! let mut db = Database::new(MemoryBackend::new());
//!
//! db.begin_schema_update()?;
//! db.require_table(
//!     "Page",
//!     &TableDefinition::new()
//!         .field("ID", "PrimaryKey")
//!         .field("Title", "varchar(255)")
//!         .field("Sort", "Int")
//!         .index("Sort", IndexDescriptor::Shorthand),
//! )?;
//! let report = db.end_schema_update()?;
//! assert_eq!(report.applied.len(), 1);
//!
//! let batch = ManipulationBatch::new().with(
//!     "Page",
//!     WriteIntent::update().id(1).field("Title", "Home"),
//! );
//! db.manipulate(&batch)?;
//!
//! let mut titles = db.query(&Statement::Select {
//!     table: "Page".into(),
//!     columns: vec!["Title".into()],
//!     predicate: None,
//! })?;
//! assert_eq!(titles.value(), Some(Value::from("Home")));
//! # Ok::<(), oxide_schema::SchemaError>(())
//! ```

pub mod backend;
pub mod config;
pub mod database;
pub mod definition;
pub mod error;
pub mod events;
pub mod manipulate;
pub mod memory;
pub mod query;
pub mod registry;
pub mod snapshot;
pub mod spec;
pub mod staged;
pub mod value;

pub use backend::{Backend, ExecResult, FieldValues, Predicate, Statement};
pub use config::{SchemaConfig, UpsertStrategy};
pub use database::Database;
pub use definition::TableDefinition;
pub use error::{BackendError, Result, SchemaError, Severity};
pub use events::{ChangeKind, SchemaEvent};
pub use manipulate::{ManipulationBatch, ManipulationReport, WriteCommand, WriteIntent, WriteOutcome};
pub use query::{BufferedRows, Query, RowSource};
pub use registry::FieldTypeRegistry;
pub use spec::{FieldSpec, IndexDescriptor, IndexSpec, SpecComparison, SpecMap};
pub use staged::CommitReport;
pub use value::{Row, Value};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backend::{Backend, ExecResult, FieldValues, Predicate, Statement};
    pub use crate::config::{SchemaConfig, UpsertStrategy};
    pub use crate::database::Database;
    pub use crate::definition::TableDefinition;
    pub use crate::error::{BackendError, Result, SchemaError, Severity};
    pub use crate::events::{ChangeKind, SchemaEvent};
    pub use crate::manipulate::{
        ManipulationBatch, ManipulationReport, WriteCommand, WriteIntent, WriteOutcome,
    };
    pub use crate::query::{BufferedRows, Query, RowSource};
    pub use crate::registry::FieldTypeRegistry;
    pub use crate::spec::{
        FieldSpec, IndexDescriptor, IndexKind, IndexSpec, SpecComparison, SpecMap,
    };
    pub use crate::staged::{CommitReport, ReplayStep};
    pub use crate::value::{Row, Value};
}
