//! [`Backend`] implementation over an sqlx SQLite pool.

use std::str::FromStr;
use std::time::Duration;

use oxide_schema::{
    Backend, BackendError, ExecResult, FieldSpec, IndexSpec, Row, SpecMap, Statement, Value,
};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, ValueRef};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::ddl::{self, RenderedStatement};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn sql_error(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> BackendError {
    let context = context.into();
    move |err| BackendError::with_source(format!("{context}: {err}"), err)
}

/// Binds a value parameter to a query.
fn bind_param(query: SqliteQuery<'_>, value: Value) -> SqliteQuery<'_> {
    match value {
        Value::Null => query.bind(Option::<i64>::None),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        Value::Blob(b) => query.bind(b),
        nested @ (Value::List(_) | Value::Map(_)) => {
            query.bind(serde_json::Value::from(nested).to_string())
        }
    }
}

fn decode_row(row: &SqliteRow) -> Result<Row, BackendError> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row
            .try_get_raw(index)
            .map_err(sql_error(format!("Failed to read column {}", column.name())))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            let read = sql_error(format!("Failed to decode column {}", column.name()));
            match type_name.as_str() {
                "INTEGER" | "INT" | "BOOLEAN" => Value::Int(row.try_get(index).map_err(read)?),
                "REAL" | "NUMERIC" => Value::Float(row.try_get(index).map_err(read)?),
                "BLOB" => Value::Blob(row.try_get(index).map_err(read)?),
                _ => Value::Text(row.try_get(index).map_err(read)?),
            }
        };
        decoded.push(column.name(), value);
    }
    Ok(decoded)
}

/// A SQLite database exposed through the blocking [`Backend`] contract.
///
/// Calls run to completion on a private current-thread runtime, so this type
/// must not be used from inside another tokio runtime.
#[derive(Debug)]
pub struct SqliteBackend {
    pool: SqlitePool,
    runtime: Runtime,
}

impl SqliteBackend {
    /// Opens (and creates if missing) the database at `url`, e.g.
    /// `sqlite://data.db`.
    ///
    /// # Errors
    ///
    /// Fails if the url is invalid, the runtime can't start, or the database
    /// can't be opened.
    pub fn connect(url: &str) -> Result<Self, BackendError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BackendError::with_source("Failed to create runtime", e))?;
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sql_error(format!("Invalid database url {url}")))?
            .create_if_missing(true);
        let pool = runtime
            .block_on(
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None::<Duration>)
                    .max_lifetime(None::<Duration>)
                    .connect_with(options),
            )
            .map_err(sql_error(format!("Failed to connect to {url}")))?;
        info!(url = %url, "Connected to SQLite");
        Ok(Self { pool, runtime })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// As [`SqliteBackend::connect`].
    pub fn memory() -> Result<Self, BackendError> {
        Self::connect("sqlite::memory:")
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn run(&self, sql: &str) -> Result<(), BackendError> {
        debug!(sql = %sql, "Executing DDL");
        self.runtime
            .block_on(sqlx::query(sql).execute(&self.pool))
            .map(|_| ())
            .map_err(sql_error(format!("Failed to execute {sql}")))
    }

    /// Runs statements in one transaction.
    fn run_all(&self, statements: &[String]) -> Result<(), BackendError> {
        self.runtime.block_on(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(sql_error("Failed to begin transaction"))?;
            for sql in statements {
                debug!(sql = %sql, "Executing DDL");
                sqlx::query(sql)
                    .execute(&mut *tx)
                    .await
                    .map_err(sql_error(format!("Failed to execute {sql}")))?;
            }
            tx.commit()
                .await
                .map_err(sql_error("Failed to commit transaction"))
        })
    }

    fn fetch_strings(&self, sql: &str, param: &str) -> Result<Vec<String>, BackendError> {
        let rows = self
            .runtime
            .block_on(sqlx::query(sql).bind(param).fetch_all(&self.pool))
            .map_err(sql_error(format!("Failed to query {sql}")))?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>(0)
                    .map_err(sql_error("Failed to read schema row"))
            })
            .collect()
    }

    fn table_sql(&self, table: &str) -> Result<String, BackendError> {
        self.fetch_strings(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ? COLLATE NOCASE",
            table,
        )?
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::new(format!("Table {table} doesn't exist")))
    }

    fn index_sqls(&self, table: &str) -> Result<Vec<String>, BackendError> {
        self.fetch_strings(
            "SELECT sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ? COLLATE NOCASE AND sql IS NOT NULL ORDER BY name",
            table,
        )
    }

    /// Rebuilds a table with changed column specs, keeping data and indexes.
    ///
    /// New fields are declared on the staging table directly, so no separate
    /// `ADD COLUMN` is needed.
    fn rebuild_statements(
        &self,
        table: &str,
        new_fields: &SpecMap<FieldSpec>,
        altered_fields: &SpecMap<FieldSpec>,
    ) -> Result<Vec<String>, BackendError> {
        let columns = ddl::parse_columns(&self.table_sql(table)?);
        let mut fields = SpecMap::new();
        for (name, spec) in &columns {
            let spec = altered_fields
                .get(name)
                .cloned()
                .unwrap_or_else(|| FieldSpec::new(spec.as_str()));
            fields.insert(name.as_str(), spec);
        }
        for (name, spec) in new_fields.iter() {
            fields.insert(name, spec.clone());
        }

        let staging = format!("_oxide_rebuild_{table}");
        let column_list = columns
            .iter()
            .map(|(name, _)| ddl::quote_identifier(name))
            .collect::<Vec<_>>()
            .join(", ");

        let mut statements = vec![
            ddl::create_table(&staging, &fields),
            format!(
                "INSERT INTO {} ({column_list}) SELECT {column_list} FROM {}",
                ddl::quote_identifier(&staging),
                ddl::quote_identifier(table)
            ),
            format!("DROP TABLE {}", ddl::quote_identifier(table)),
            ddl::rename_table(&staging, table),
        ];
        statements.extend(self.index_sqls(table)?);
        Ok(statements)
    }

    fn run_statement(
        &self,
        rendered: RenderedStatement,
        returns_rows: bool,
    ) -> Result<ExecResult, BackendError> {
        let RenderedStatement { sql, params } = rendered;
        debug!(sql = %sql, params = params.len(), "Executing statement");
        let query = params
            .into_iter()
            .fold(sqlx::query(&sql), bind_param);

        if returns_rows {
            let rows = self
                .runtime
                .block_on(query.fetch_all(&self.pool))
                .map_err(sql_error(format!("Failed to execute {sql}")))?;
            let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
            return Ok(ExecResult {
                rows,
                ..ExecResult::default()
            });
        }

        let result = self
            .runtime
            .block_on(query.execute(&self.pool))
            .map_err(sql_error(format!("Failed to execute {sql}")))?;
        Ok(ExecResult {
            affected_rows: result.rows_affected(),
            generated_id: Some(result.last_insert_rowid()),
            rows: Vec::new(),
        })
    }
}

impl Backend for SqliteBackend {
    fn list_tables(&mut self) -> Result<Vec<String>, BackendError> {
        let rows = self
            .runtime
            .block_on(
                sqlx::query(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .fetch_all(&self.pool),
            )
            .map_err(sql_error("Failed to list tables"))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(sql_error("Failed to read table name")))
            .collect()
    }

    fn list_fields(&mut self, table: &str) -> Result<SpecMap<FieldSpec>, BackendError> {
        let sql = self.table_sql(table)?;
        Ok(ddl::parse_columns(&sql)
            .into_iter()
            .map(|(name, spec)| (name, FieldSpec::new(spec)))
            .collect())
    }

    fn list_indexes(&mut self, table: &str) -> Result<SpecMap<IndexSpec>, BackendError> {
        let mut indexes = SpecMap::new();
        for sql in self.index_sqls(table)? {
            if let Some((name, spec)) = ddl::parse_index(&sql) {
                let name = ddl::strip_index_prefix(table, &name)
                    .map_or_else(|| name.clone(), str::to_string);
                indexes.insert(name, spec);
            }
        }
        Ok(indexes)
    }

    fn create_table(
        &mut self,
        table: &str,
        fields: &SpecMap<FieldSpec>,
        indexes: &SpecMap<IndexSpec>,
    ) -> Result<(), BackendError> {
        let mut statements = vec![ddl::create_table(table, fields)];
        for (index, spec) in indexes.iter() {
            statements.push(ddl::create_index(table, index, spec)?);
        }
        self.run_all(&statements)?;
        info!(table = %table, fields = fields.len(), indexes = indexes.len(), "Created table");
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
        let mut statements: Vec<String> = if altered_fields.is_empty() {
            new_fields
                .iter()
                .map(|(field, spec)| ddl::add_column(table, field, spec))
                .collect()
        } else {
            self.rebuild_statements(table, new_fields, altered_fields)?
        };
        for (index, spec) in altered_indexes.iter() {
            statements.push(ddl::drop_index(table, index));
            statements.push(ddl::create_index(table, index, spec)?);
        }
        for (index, spec) in new_indexes.iter() {
            statements.push(ddl::create_index(table, index, spec)?);
        }
        if !statements.is_empty() {
            self.run_all(&statements)?;
        }
        info!(
            table = %table,
            new_fields = new_fields.len(),
            altered_fields = altered_fields.len(),
            "Altered table"
        );
        Ok(())
    }

    /// Renames the table and moves its `{from}_*` indexes to `{to}_*` in
    /// the same transaction, leaving the old index names free.
    fn rename_table(&mut self, from: &str, to: &str) -> Result<(), BackendError> {
        let mut statements = vec![ddl::rename_table(from, to)];
        let mut moved = 0;
        for sql in self.index_sqls(from)? {
            let Some((name, spec)) = ddl::parse_index(&sql) else {
                continue;
            };
            if let Some(index) = ddl::strip_index_prefix(from, &name) {
                statements.push(ddl::drop_index(from, index));
                statements.push(ddl::create_index(to, index, &spec)?);
                moved += 1;
            }
        }
        self.run_all(&statements)?;
        info!(from = %from, to = %to, indexes = moved, "Renamed table");
        Ok(())
    }

    fn create_field(
        &mut self,
        table: &str,
        field: &str,
        spec: &FieldSpec,
    ) -> Result<(), BackendError> {
        self.run(&ddl::add_column(table, field, spec))
    }

    fn execute(&mut self, statement: &Statement) -> Result<ExecResult, BackendError> {
        let rendered = ddl::render(statement);
        match statement {
            Statement::Select { .. } | Statement::Raw(_) => {
                let returns_rows = matches!(statement, Statement::Select { .. })
                    || rendered.sql.trim_start().to_ascii_lowercase().starts_with("select");
                self.run_statement(rendered, returns_rows)
            }
            Statement::Update { fields, .. } if fields.is_empty() => {
                let result = self.run_statement(rendered, true)?;
                let matched = result
                    .rows
                    .first()
                    .and_then(Row::first)
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                Ok(ExecResult {
                    affected_rows: u64::try_from(matched).unwrap_or(0),
                    ..ExecResult::default()
                })
            }
            Statement::Update { .. } => {
                let mut result = self.run_statement(rendered, false)?;
                result.generated_id = None;
                Ok(result)
            }
            Statement::Insert { .. } | Statement::Upsert { .. } => {
                self.run_statement(rendered, false)
            }
        }
    }

    fn supports_collations(&self) -> bool {
        false
    }

    fn supports_native_upsert(&self) -> bool {
        true
    }

    fn check_table(&mut self, table: &str) -> Result<bool, BackendError> {
        let sql = format!("PRAGMA integrity_check({})", ddl::quote_identifier(table));
        let rows = self
            .runtime
            .block_on(sqlx::query(&sql).fetch_all(&self.pool))
            .map_err(sql_error(format!("Failed to check table {table}")))?;
        let healthy = rows
            .iter()
            .all(|row| row.try_get::<String, _>(0).is_ok_and(|s| s == "ok"));
        debug!(table = %table, healthy, "Checked table");
        Ok(healthy)
    }

    fn repair_table(&mut self, table: &str) -> Result<(), BackendError> {
        self.run(&format!("REINDEX {}", ddl::quote_identifier(table)))
    }
}
