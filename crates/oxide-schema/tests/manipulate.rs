//! Integration tests for batched writes.

mod common;

use std::collections::BTreeMap;

use common::{database, database_with, select_all};
use oxide_schema::memory::{BackendCall, MemoryBackend};
use oxide_schema::prelude::*;

fn page_backend() -> MemoryBackend {
    let mut backend = MemoryBackend::new();
    backend.add_table(
        "Page",
        [
            ("ID", "int(11) not null auto_increment"),
            ("Title", "varchar(255)"),
            ("Meta", "text"),
        ],
        [],
    );
    backend
}

fn writes(backend: &MemoryBackend) -> Vec<Statement> {
    backend
        .calls()
        .iter()
        .filter_map(|call| match call {
            BackendCall::Execute(statement) => Some(statement.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn update_without_match_falls_back_to_one_insert() {
    let mut db = database(page_backend());
    let batch = ManipulationBatch::new().with(
        "Page",
        WriteIntent::update().id(7).field("Title", "About"),
    );

    let report = db.manipulate(&batch).unwrap();
    assert_eq!(
        report.outcome("Page"),
        Some(WriteOutcome::UpdateFellBackToInsert { id: Some(7) })
    );

    let statements = writes(db.backend());
    assert_eq!(statements.len(), 2);
    assert!(matches!(statements[0], Statement::Update { .. }));
    let Statement::Insert { fields, .. } = &statements[1] else {
        panic!("Expected insert, got {:?}", statements[1]);
    };
    let expected: FieldValues = [
        ("ID".to_string(), Value::Int(7)),
        ("Title".to_string(), Value::from("About")),
    ]
    .into_iter()
    .collect();
    assert_eq!(fields, &expected);
}

#[test]
fn update_with_match_does_not_insert() {
    let mut db = database(page_backend());
    db.manipulate(&ManipulationBatch::new().with("Page", WriteIntent::insert().id(1)))
        .unwrap();

    let report = db
        .manipulate(&ManipulationBatch::new().with(
            "Page",
            WriteIntent::update().id(1).field("Title", "Home"),
        ))
        .unwrap();
    assert_eq!(report.outcome("Page"), Some(WriteOutcome::Updated { rows: 1 }));
    assert_eq!(db.backend().rows("Page").len(), 1);
}

#[test]
fn insert_carries_explicit_id() {
    let mut db = database(page_backend());
    let report = db
        .manipulate(&ManipulationBatch::new().with(
            "Page",
            WriteIntent::insert().id(42).field("Title", "Contact"),
        ))
        .unwrap();
    assert_eq!(
        report.outcome("Page"),
        Some(WriteOutcome::Inserted { id: Some(42) })
    );

    let mut rows = select_all(&mut db, "Page");
    assert_eq!(rows.value(), Some(Value::Int(42)));
}

#[test]
fn where_clause_replaces_id_match() {
    let mut db = database(page_backend());
    for title in ["A", "B"] {
        db.manipulate(&ManipulationBatch::new().with(
            "Page",
            WriteIntent::insert().field("Title", title),
        ))
        .unwrap();
    }

    let report = db
        .manipulate(&ManipulationBatch::new().with(
            "Page",
            WriteIntent::update()
                .filter(Predicate::eq("Title", "B"))
                .field("Meta", "updated"),
        ))
        .unwrap();
    assert_eq!(report.outcome("Page"), Some(WriteOutcome::Updated { rows: 1 }));

    let rows: Vec<Row> = select_all(&mut db, "Page").into_iter().collect();
    assert_eq!(rows[0].get("Meta"), None);
    assert_eq!(rows[1].get("Meta"), Some(&Value::from("updated")));
}

#[test]
fn empty_strings_become_null_at_any_depth() {
    let mut db = database(page_backend());
    let meta: BTreeMap<String, Value> = [
        ("Keywords".to_string(), Value::from("")),
        (
            "Authors".to_string(),
            Value::List(vec![Value::from("Ada"), Value::from("")]),
        ),
    ]
    .into_iter()
    .collect();
    let batch = ManipulationBatch::new().with(
        "Page",
        WriteIntent::insert()
            .field("Title", "")
            .field("Meta", Value::Map(meta)),
    );
    db.manipulate(&batch).unwrap();

    let row = &db.backend().rows("Page")[0];
    assert_eq!(row.get("Title"), Some(&Value::Null));
    let Some(Value::Map(meta)) = row.get("Meta") else {
        panic!("Expected map, got {:?}", row.get("Meta"));
    };
    assert_eq!(meta.get("Keywords"), Some(&Value::Null));
    assert_eq!(
        meta.get("Authors"),
        Some(&Value::List(vec![Value::from("Ada"), Value::Null]))
    );
}

#[test]
fn invalid_batch_writes_nothing() {
    let mut db = database(page_backend());
    let batch = ManipulationBatch::new()
        .with("Page", WriteIntent::insert().field("Title", "Fine"))
        .with("Log", WriteIntent::update().field("Message", "no target"));

    let err = db.manipulate(&batch).unwrap_err();
    assert!(matches!(err, SchemaError::Configuration(_)));
    assert!(writes(db.backend()).is_empty());
}

#[test]
fn unknown_command_in_json_is_a_configuration_error() {
    let err = ManipulationBatch::from_json_str(r#"{"Page": {"command": "replace", "id": 1}}"#)
        .unwrap_err();
    assert!(matches!(err, SchemaError::Configuration(_)));
}

#[test]
fn backend_failure_is_fatal() {
    let mut backend = page_backend();
    backend.fail_on("Page");
    let mut db = database(backend);

    let err = db
        .manipulate(&ManipulationBatch::new().with("Page", WriteIntent::insert()))
        .unwrap_err();
    assert_eq!(err.severity(), Severity::Fatal);
}

#[test]
fn native_upsert_is_a_single_statement() {
    let config = SchemaConfig::new().upsert(UpsertStrategy::Native);
    let mut db = database_with(page_backend(), config);

    let batch = ManipulationBatch::new().with(
        "Page",
        WriteIntent::update().id(3).field("Title", "Blog"),
    );
    let report = db.manipulate(&batch).unwrap();
    assert_eq!(report.outcome("Page"), Some(WriteOutcome::Upserted));
    db.manipulate(&batch).unwrap();

    let statements = writes(db.backend());
    assert_eq!(statements.len(), 2);
    assert!(statements
        .iter()
        .all(|s| matches!(s, Statement::Upsert { key, .. } if key == "ID")));
    assert_eq!(db.backend().rows("Page").len(), 1);
}

#[test]
fn native_upsert_falls_back_without_backend_support() {
    let mut backend = page_backend();
    backend.set_native_upsert(false);
    let config = SchemaConfig::new().upsert(UpsertStrategy::Native);
    let mut db = database_with(backend, config);

    let report = db
        .manipulate(&ManipulationBatch::new().with(
            "Page",
            WriteIntent::update().id(3).field("Title", "Blog"),
        ))
        .unwrap();
    assert_eq!(
        report.outcome("Page"),
        Some(WriteOutcome::UpdateFellBackToInsert { id: Some(3) })
    );
}

#[test]
fn json_batch_round_trip_through_manipulate() {
    let mut db = database(page_backend());
    let batch = ManipulationBatch::from_json_str(
        r#"{"Page": {"command": "update", "id": 5, "fields": {"Title": "Terms", "Meta": ""}}}"#,
    )
    .unwrap();
    db.manipulate(&batch).unwrap();

    let mut rows = select_all(&mut db, "Page");
    let record = rows.record().unwrap();
    assert_eq!(record.get("ID"), Some(&Value::Int(5)));
    assert_eq!(record.get("Title"), Some(&Value::from("Terms")));
    assert_eq!(record.get("Meta"), Some(&Value::Null));
}

#[test]
fn configured_id_column_drives_match_and_fallback() {
    let mut backend = MemoryBackend::new().with_id_column("RecordID");
    backend.add_table("Log", [("RecordID", "int"), ("Message", "text")], []);
    let config = SchemaConfig::new().id_column("RecordID");
    let mut db = database_with(backend, config);

    let batch = ManipulationBatch::new().with(
        "Log",
        WriteIntent::update().id(12).field("Message", "first"),
    );
    let report = db.manipulate(&batch).unwrap();
    assert_eq!(
        report.outcome("Log"),
        Some(WriteOutcome::UpdateFellBackToInsert { id: Some(12) })
    );

    let batch = ManipulationBatch::new().with(
        "Log",
        WriteIntent::update().id(12).field("Message", "second"),
    );
    let report = db.manipulate(&batch).unwrap();
    assert_eq!(report.outcome("Log"), Some(WriteOutcome::Updated { rows: 1 }));

    let rows = db.backend().rows("Log");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("RecordID"), Some(&Value::Int(12)));
    assert_eq!(rows[0].get("Message"), Some(&Value::from("second")));
}
