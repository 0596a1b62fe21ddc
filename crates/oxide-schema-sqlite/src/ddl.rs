//! SQL rendering for SQLite.
//!
//! Field specs are opaque: they are written after the quoted column name
//! exactly as given, and read back from `sqlite_master` the same way, so a
//! spec round-trips unchanged.

use std::sync::LazyLock;

use oxide_schema::spec::{IndexDefinition, IndexKind};
use oxide_schema::{BackendError, FieldSpec, IndexSpec, Predicate, SpecMap, Statement, Value};
use regex::Regex;

static CREATE_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*create\s+(unique\s+)?index\s+(?:if\s+not\s+exists\s+)?("[^"]+"|\S+)\s+on\s+("[^"]+"|\S+)\s*\((.*)\)\s*$"#)
        .expect("valid index regex")
});

/// Table-level constraints that are not column definitions.
const TABLE_CONSTRAINTS: &[&str] = &["constraint", "primary", "unique", "check", "foreign"];

/// Quotes an identifier with double quotes.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn unquote_identifier(name: &str) -> String {
    let name = name.trim();
    match name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => name
            .trim_matches(|c| c == '`' || c == '[' || c == ']')
            .to_string(),
    }
}

/// Global index name for a table-scoped index.
#[must_use]
pub fn index_name(table: &str, index: &str) -> String {
    format!("{table}_{index}")
}

/// The logical index name when `name` carries the `{table}_` prefix.
#[must_use]
pub fn strip_index_prefix<'a>(table: &str, name: &'a str) -> Option<&'a str> {
    let prefix = index_name(table, "");
    match name.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(&prefix) => Some(&name[prefix.len()..]),
        _ => None,
    }
}

/// `"name" spec`.
#[must_use]
pub fn column_definition(field: &str, spec: &FieldSpec) -> String {
    format!("{} {}", quote_identifier(field), spec.as_str())
}

/// `CREATE TABLE` with every column.
#[must_use]
pub fn create_table(table: &str, fields: &SpecMap<FieldSpec>) -> String {
    let columns: Vec<String> = fields
        .iter()
        .map(|(field, spec)| column_definition(field, spec))
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        quote_identifier(table),
        columns.join(", ")
    )
}

/// `ALTER TABLE ... ADD COLUMN`.
#[must_use]
pub fn add_column(table: &str, field: &str, spec: &FieldSpec) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_identifier(table),
        column_definition(field, spec)
    )
}

/// `ALTER TABLE ... RENAME TO`.
#[must_use]
pub fn rename_table(from: &str, to: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_identifier(from),
        quote_identifier(to)
    )
}

/// `CREATE [UNIQUE] INDEX`. Fulltext indexes have no SQLite equivalent.
///
/// # Errors
///
/// Fails for fulltext indexes and for specs that aren't `[kind] (col, ...)`.
pub fn create_index(table: &str, index: &str, spec: &IndexSpec) -> Result<String, BackendError> {
    let definition = spec.definition().ok_or_else(|| {
        BackendError::new(format!("Index {table}.{index}: unrecognized spec '{spec}'"))
    })?;
    let unique = match definition.kind {
        IndexKind::Index => "",
        IndexKind::Unique => "UNIQUE ",
        IndexKind::Fulltext => {
            return Err(BackendError::new(format!(
                "Index {table}.{index}: fulltext indexes are not supported by SQLite"
            )))
        }
    };
    let columns: Vec<String> = definition
        .columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect();
    Ok(format!(
        "CREATE {unique}INDEX {} ON {} ({})",
        quote_identifier(&index_name(table, index)),
        quote_identifier(table),
        columns.join(", ")
    ))
}

/// `DROP INDEX IF EXISTS`.
#[must_use]
pub fn drop_index(table: &str, index: &str) -> String {
    format!(
        "DROP INDEX IF EXISTS {}",
        quote_identifier(&index_name(table, index))
    )
}

/// Splits the column list of a stored `CREATE TABLE` statement into
/// `(name, spec)` pairs, skipping table constraints.
#[must_use]
pub fn parse_columns(create_sql: &str) -> Vec<(String, String)> {
    let (Some(open), Some(close)) = (create_sql.find('('), create_sql.rfind(')')) else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    split_top_level(&create_sql[open + 1..close])
        .into_iter()
        .filter_map(|definition| {
            let definition = definition.trim();
            let (name, spec) = split_name(definition)?;
            let first_word = definition
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            if !definition.starts_with('"') && TABLE_CONSTRAINTS.contains(&first_word.as_str()) {
                return None;
            }
            Some((unquote_identifier(name), spec.trim().to_string()))
        })
        .collect()
}

/// Parses a stored `CREATE INDEX` statement into an index spec.
#[must_use]
pub fn parse_index(create_sql: &str) -> Option<(String, IndexSpec)> {
    let caps = CREATE_INDEX.captures(create_sql)?;
    let name = unquote_identifier(&caps[2]);
    let columns: Vec<String> = split_top_level(&caps[4])
        .iter()
        .map(|c| unquote_identifier(c))
        .collect();
    let kind = if caps.get(1).is_some() {
        IndexKind::Unique
    } else {
        IndexKind::Index
    };
    Some((name, IndexDefinition { kind, columns }.to_spec()))
}

fn split_name(definition: &str) -> Option<(&str, &str)> {
    if let Some(rest) = definition.strip_prefix('"') {
        let end = rest.find('"')? + 1;
        return Some((&definition[..=end], &definition[end + 1..]));
    }
    Some(
        definition
            .find(char::is_whitespace)
            .map_or((definition, ""), |end| (&definition[..end], &definition[end..])),
    )
}

/// Splits on commas that are outside parentheses and quotes.
fn split_top_level(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in list.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(ch);
                current.push(ch);
            }
            (None, '(') => {
                depth += 1;
                current.push(ch);
            }
            (None, ')') => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            (None, ',') if depth == 0 => parts.push(std::mem::take(&mut current)),
            (None, c) => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// A statement rendered to SQL with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStatement {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Values for the placeholders, in order.
    pub params: Vec<Value>,
}

fn render_predicate(predicate: &Predicate, params: &mut Vec<Value>) -> String {
    match predicate {
        Predicate::Eq { column, value } if value.is_null() => {
            format!("{} IS NULL", quote_identifier(column))
        }
        Predicate::Eq { column, value } => {
            params.push(value.clone());
            format!("{} = ?", quote_identifier(column))
        }
        Predicate::And(parts) if parts.is_empty() => "1 = 1".to_string(),
        Predicate::And(parts) => {
            let parts: Vec<String> = parts
                .iter()
                .map(|p| format!("({})", render_predicate(p, params)))
                .collect();
            parts.join(" AND ")
        }
        Predicate::Raw(filter) => filter.clone(),
    }
}

/// Renders a data statement.
#[must_use]
pub fn render(statement: &Statement) -> RenderedStatement {
    let mut params = Vec::new();
    let sql = match statement {
        Statement::Select {
            table,
            columns,
            predicate,
        } => {
            let projection = if columns.is_empty() {
                "*".to_string()
            } else {
                columns
                    .iter()
                    .map(|c| quote_identifier(c))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let mut sql = format!("SELECT {projection} FROM {}", quote_identifier(table));
            if let Some(predicate) = predicate {
                sql.push_str(" WHERE ");
                sql.push_str(&render_predicate(predicate, &mut params));
            }
            sql
        }
        Statement::Insert { table, fields } if fields.is_empty() => {
            format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(table))
        }
        Statement::Insert { table, fields } => {
            let columns: Vec<String> = fields.keys().map(|c| quote_identifier(c)).collect();
            params.extend(fields.values().cloned());
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_identifier(table),
                columns.join(", "),
                vec!["?"; fields.len()].join(", ")
            )
        }
        Statement::Update {
            table,
            fields,
            predicate,
        } if fields.is_empty() => {
            // Nothing to assign; report how many rows would have matched.
            format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                quote_identifier(table),
                render_predicate(predicate, &mut params)
            )
        }
        Statement::Update {
            table,
            fields,
            predicate,
        } => {
            let assignments: Vec<String> = fields
                .keys()
                .map(|c| format!("{} = ?", quote_identifier(c)))
                .collect();
            params.extend(fields.values().cloned());
            format!(
                "UPDATE {} SET {} WHERE {}",
                quote_identifier(table),
                assignments.join(", "),
                render_predicate(predicate, &mut params)
            )
        }
        Statement::Upsert { table, fields, key } => {
            let columns: Vec<String> = fields.keys().map(|c| quote_identifier(c)).collect();
            params.extend(fields.values().cloned());
            let updates: Vec<String> = fields
                .keys()
                .filter(|c| *c != key)
                .map(|c| format!("{0} = excluded.{0}", quote_identifier(c)))
                .collect();
            let action = if updates.is_empty() {
                "DO NOTHING".to_string()
            } else {
                format!("DO UPDATE SET {}", updates.join(", "))
            };
            format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {action}",
                quote_identifier(table),
                columns.join(", "),
                vec!["?"; fields.len()].join(", "),
                quote_identifier(key)
            )
        }
        Statement::Raw(sql) => sql.clone(),
    };
    RenderedStatement { sql, params }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_schema::FieldValues;

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_identifier("Page"), "\"Page\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn strips_table_prefix_from_index_names() {
        assert_eq!(strip_index_prefix("Page", "page_Sort"), Some("Sort"));
        assert_eq!(strip_index_prefix("Page", "_obsolete_Page_Sort"), None);
        assert_eq!(strip_index_prefix("_obsolete_Page", "_obsolete_Page_Sort"), Some("Sort"));
        assert_eq!(strip_index_prefix("Page", "Pag"), None);
    }

    #[test]
    fn parses_stored_create_table() {
        let sql = r#"CREATE TABLE "Page" ("ID" integer primary key autoincrement, "Price" decimal(9, 2) not null default 0, "Title" text default 'a, b', UNIQUE ("Title"))"#;
        let columns = parse_columns(sql);
        assert_eq!(
            columns,
            vec![
                ("ID".to_string(), "integer primary key autoincrement".to_string()),
                ("Price".to_string(), "decimal(9, 2) not null default 0".to_string()),
                ("Title".to_string(), "text default 'a, b'".to_string()),
            ]
        );
    }

    #[test]
    fn parses_added_columns() {
        let sql = r#"CREATE TABLE "Page" ("ID" integer primary key, "Content" text)"#;
        assert_eq!(parse_columns(sql).len(), 2);
    }

    #[test]
    fn renders_and_parses_indexes() {
        let sql = create_index("Page", "Title", &IndexSpec::new("unique (Title, Sort)")).unwrap();
        assert_eq!(
            sql,
            r#"CREATE UNIQUE INDEX "Page_Title" ON "Page" ("Title", "Sort")"#
        );
        let (name, spec) = parse_index(&sql).unwrap();
        assert_eq!(name, "Page_Title");
        assert_eq!(spec, IndexSpec::new("unique(Title,Sort)"));

        assert!(create_index("Page", "Body", &IndexSpec::new("fulltext (Body)")).is_err());
    }

    #[test]
    fn renders_update_with_binds() {
        let fields: FieldValues = [("Title".to_string(), Value::from("Home"))]
            .into_iter()
            .collect();
        let rendered = render(&Statement::Update {
            table: "Page".into(),
            fields,
            predicate: Predicate::And(vec![
                Predicate::eq("ID", 1),
                Predicate::eq("Deleted", Value::Null),
            ]),
        });
        assert_eq!(
            rendered.sql,
            r#"UPDATE "Page" SET "Title" = ? WHERE ("ID" = ?) AND ("Deleted" IS NULL)"#
        );
        assert_eq!(rendered.params, vec![Value::from("Home"), Value::Int(1)]);
    }

    #[test]
    fn renders_upsert() {
        let fields: FieldValues = [
            ("ID".to_string(), Value::Int(3)),
            ("Title".to_string(), Value::from("Blog")),
        ]
        .into_iter()
        .collect();
        let rendered = render(&Statement::Upsert {
            table: "Page".into(),
            fields,
            key: "ID".into(),
        });
        assert_eq!(
            rendered.sql,
            r#"INSERT INTO "Page" ("ID", "Title") VALUES (?, ?) ON CONFLICT("ID") DO UPDATE SET "Title" = excluded."Title""#
        );
    }
}
