//! SQLite backend for `oxide-schema`.
//!
//! [`SqliteBackend`] implements the blocking
//! [`Backend`](oxide_schema::Backend) contract on top of an sqlx SQLite pool:
//!
//! - Field specs are written verbatim after the column name and introspected
//!   back from `sqlite_master`, so reconciliation is idempotent
//! - Changed columns are applied by rebuilding the table (SQLite has no
//!   `ALTER COLUMN`), keeping rows and indexes
//! - Indexes are named `<table>_<index>`; fulltext indexes are rejected
//! - Collation clauses are not supported and are stripped by the engine
//!
//! # Example
//!
//! ```rust
//! use oxide_schema::prelude::*;
//! use oxide_schema_sqlite::SqliteBackend;
//!
//! let mut db = Database::new(SqliteBackend::memory()?);
//! db.begin_schema_update()?;
//! db.require_table(
//!     "Member",
//!     &TableDefinition::new()
//!         .field("ID", "integer primary key autoincrement")
//!         .field("Email", "varchar(255) not null")
//!         .index("Email", "unique (Email)"),
//! )?;
//! db.end_schema_update()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod backend;
pub mod ddl;

pub use backend::SqliteBackend;
