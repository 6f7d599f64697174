use rusqlite::Connection;
use vellum_core::db::migrations::latest_version;
use vellum_core::db::{open_db, open_db_in_memory, open_with_config, DbError};
use vellum_core::StoreConfig;

const TABLES: [&str; 7] = [
    "forms", "shadows", "commits", "roots", "versions", "heads", "views",
];

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in TABLES {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn foreign_keys_are_enforced() {
    let conn = open_db_in_memory().unwrap();
    let enabled: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(enabled, 1);

    let err = conn
        .execute("INSERT INTO shadows (form_id) VALUES (42);", [])
        .unwrap_err();
    assert!(err.to_string().contains("FOREIGN KEY"));
}

#[test]
fn default_view_is_seeded() {
    let conn = open_db_in_memory().unwrap();
    let name: String = conn
        .query_row("SELECT name FROM views WHERE id = 1;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(name, "default");
}

#[test]
fn only_one_active_head_per_root_and_view() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO forms (kind) VALUES ('product');
         INSERT INTO shadows (form_id) VALUES (1);
         INSERT INTO commits (form_id, shadow_id) VALUES (1, 1);
         INSERT INTO versions (kind, content_commit_id) VALUES ('product', 1);
         INSERT INTO roots (kind) VALUES ('product');
         INSERT INTO heads (root_id, view_id, version_id) VALUES (1, 1, 1);",
    )
    .unwrap();

    let duplicate = conn.execute(
        "INSERT INTO heads (root_id, view_id, version_id) VALUES (1, 1, 1);",
        [],
    );
    assert!(duplicate.is_err());

    conn.execute("UPDATE heads SET archived_at = 1 WHERE id = 1;", [])
        .unwrap();
    conn.execute(
        "INSERT INTO heads (root_id, view_id, version_id) VALUES (1, 1, 1);",
        [],
    )
    .unwrap();
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vellum.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "heads");

    let views: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM views;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(views, 1);
}

#[test]
fn open_with_config_uses_configured_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("configured.db");
    let config = StoreConfig {
        db_path: Some(path.clone()),
        busy_timeout_ms: 250,
        ..StoreConfig::default()
    };

    let conn = open_with_config(&config).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    assert!(path.exists());
}

#[test]
fn open_with_default_config_is_in_memory() {
    let conn = open_with_config(&StoreConfig::default()).unwrap();
    assert_table_exists(&conn, "forms");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
