#![allow(dead_code)]

use oxide_schema::memory::MemoryBackend;
use oxide_schema::prelude::*;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs a fmt subscriber once per test binary.
pub fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .without_time()
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// A backend holding a populated `SiteTree` table and an `OldLog` table.
pub fn site_backend() -> MemoryBackend {
    let mut backend = MemoryBackend::new();
    backend.add_table(
        "SiteTree",
        [
            ("ID", "int(11) not null auto_increment"),
            ("Title", "varchar(255)"),
            ("Sort", "int(11) not null default 0"),
        ],
        [("Sort", "(Sort)")],
    );
    backend.add_table("OldLog", [("Message", "text")], []);
    backend
}

pub fn database(backend: MemoryBackend) -> Database<MemoryBackend> {
    init_tracing();
    Database::new(backend)
}

pub fn database_with(backend: MemoryBackend, config: SchemaConfig) -> Database<MemoryBackend> {
    init_tracing();
    Database::with_config(backend, config)
}

pub fn select_all(db: &mut Database<MemoryBackend>, table: &str) -> Query<BufferedRows> {
    db.query(&Statement::Select {
        table: table.to_string(),
        columns: Vec::new(),
        predicate: None,
    })
    .unwrap_or_else(|e| panic!("Failed to select from {table}: {e}"))
}

/// Event messages of a given kind, in emission order.
pub fn messages(db: &mut Database<MemoryBackend>, kind: ChangeKind) -> Vec<String> {
    db.take_events()
        .into_iter()
        .filter(|e| e.kind == kind)
        .map(|e| e.message)
        .collect()
}
