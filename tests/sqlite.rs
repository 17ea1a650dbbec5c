use chrono::NaiveDate;
use serde_json::json;

use anydb::{Adapter, AnyDbError, Connection, ConnectionConfig, QueryOutcome, SqlValue};

const MEMORY: &str = "sqlite::memory:";

async fn memory_connection() -> Connection {
    let mut adapter = Adapter::with_default_drivers();
    adapter.register_config(ConnectionConfig::new(MEMORY, "sqlite"));
    adapter.connect(MEMORY).await.unwrap()
}

async fn seed(conn: &Connection) {
    conn.query("CREATE TABLE test(ID INTEGER PRIMARY KEY, TEXT VARCHAR(255))")
        .finish()
        .await
        .unwrap();
    for (id, text) in [(1, "a"), (2, "b"), (3, "b")] {
        let outcome = conn
            .query_with("INSERT INTO test VALUES (?, ?)", &[id.into(), text.into()])
            .finish()
            .await
            .unwrap();
        assert_eq!(outcome, QueryOutcome::Updated(1));
    }
}

#[tokio::test]
async fn test_create_insert_select() {
    let mut conn = memory_connection().await;

    let created = conn
        .query("CREATE TABLE t(ID INTEGER, TEXT VARCHAR(255))")
        .finish()
        .await
        .unwrap();
    assert_eq!(created.update_count(), Some(0));

    let inserted = conn
        .query("INSERT INTO t VALUES (1,'a')")
        .finish()
        .await
        .unwrap();
    assert_eq!(inserted.update_count(), Some(1));

    let outcome = conn.query("SELECT * FROM t").finish().await.unwrap();
    let result = outcome.rows().unwrap();
    assert_eq!(
        serde_json::to_value(result).unwrap(),
        json!({"rows": [{"ID": 1, "TEXT": "a"}]})
    );

    conn.end().await.unwrap();
}

#[tokio::test]
async fn test_row_events_match_result() {
    let mut conn = memory_connection().await;
    seed(&conn).await;

    let mut ids = Vec::new();
    let outcome = conn
        .query("SELECT ID FROM test ORDER BY ID")
        .for_each_row(|row| ids.push(row.get("ID").unwrap().as_i64().unwrap()))
        .await
        .unwrap();

    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(outcome.rows().unwrap().len(), ids.len());
    conn.end().await.unwrap();
}

#[tokio::test]
async fn test_select_filtered_by_bound_parameter() {
    let mut conn = memory_connection().await;
    seed(&conn).await;

    let by_id = conn
        .query_with("SELECT * FROM test WHERE ID = ?", &[2.into()])
        .finish()
        .await
        .unwrap()
        .into_rows()
        .unwrap()
        .single_row()
        .unwrap();
    assert_eq!(by_id.get("TEXT").unwrap(), &SqlValue::Text("b".to_string()));

    let by_text = conn
        .query_with("SELECT ID FROM test WHERE TEXT = ? ORDER BY ID", &["b".into()])
        .finish()
        .await
        .unwrap()
        .into_rows()
        .unwrap();
    let ids: Vec<_> = by_text
        .rows_ref()
        .iter()
        .map(|row| row.get("ID").unwrap().clone())
        .collect();
    assert_eq!(ids, vec![SqlValue::Int64(2), SqlValue::Int64(3)]);

    conn.end().await.unwrap();
}

#[tokio::test]
async fn test_dates_and_nulls() {
    let mut conn = memory_connection().await;
    conn.query("CREATE TABLE events(ID INTEGER, DAY DATE, NOTE TEXT, SCORE REAL, DONE BOOLEAN)")
        .finish()
        .await
        .unwrap();

    let day = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    conn.query_with(
        "INSERT INTO events VALUES (?, ?, ?, ?, ?)",
        &[1.into(), day.into(), SqlValue::Null, 0.5.into(), true.into()],
    )
    .finish()
    .await
    .unwrap();

    let row = conn
        .query_with("SELECT * FROM events WHERE DAY = ?", &[day.into()])
        .finish()
        .await
        .unwrap()
        .into_rows()
        .unwrap()
        .single_row()
        .unwrap();

    assert_eq!(row.get("DAY").unwrap().as_str(), Some("2020-01-02"));
    assert!(row.get("NOTE").unwrap().is_null());
    assert_eq!(row.get("SCORE").unwrap(), &SqlValue::Float64(0.5));
    assert_eq!(row.get("DONE").unwrap().as_i64(), Some(1));
    conn.end().await.unwrap();
}

#[tokio::test]
async fn test_round_trip_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("roundtrip.db").display());

    let mut adapter = Adapter::with_default_drivers();
    adapter.register_config(ConnectionConfig::new(url.as_str(), "sqlite"));

    let mut writer = adapter.connect(url.as_str()).await.unwrap();
    writer
        .query("CREATE TABLE test(ID INTEGER PRIMARY KEY, TEXT VARCHAR(255))")
        .finish()
        .await
        .unwrap();
    writer
        .query_with(
            "INSERT INTO test VALUES (?, ?)",
            &[42.into(), "héllo wörld".into()],
        )
        .finish()
        .await
        .unwrap();
    writer.end().await.unwrap();

    let mut reader = adapter.connect(url.as_str()).await.unwrap();
    let row = reader
        .query_with("SELECT * FROM test WHERE ID = ?", &[42.into()])
        .finish()
        .await
        .unwrap()
        .into_rows()
        .unwrap()
        .single_row()
        .unwrap();

    assert_eq!(row.get("ID").unwrap(), &SqlValue::Int64(42));
    assert_eq!(row.get("TEXT").unwrap().as_str(), Some("héllo wörld"));
    reader.end().await.unwrap();
}

#[tokio::test]
async fn test_prepare_error_for_missing_table() {
    let mut conn = memory_connection().await;

    let err = conn.query("DROP TABLE test").finish().await.unwrap_err();
    assert!(matches!(err, AnyDbError::Prepare(_)));

    let err = conn.query("SELEC oops").finish().await.unwrap_err();
    assert!(matches!(err, AnyDbError::Prepare(_)));
    conn.end().await.unwrap();
}

#[tokio::test]
async fn test_too_many_parameters() {
    let mut conn = memory_connection().await;

    let err = conn
        .query_with("SELECT ?", &[1.into(), 2.into()])
        .finish()
        .await
        .unwrap_err();
    assert!(matches!(err, AnyDbError::Bind { index: 2, .. }));
    conn.end().await.unwrap();
}

#[tokio::test]
async fn test_properties_applied_as_pragmas() {
    let mut adapter = Adapter::with_default_drivers();
    adapter.register_config(
        ConnectionConfig::new(MEMORY, "sqlite").property("foreign_keys", "ON"),
    );
    let mut conn = adapter.connect(MEMORY).await.unwrap();

    let row = conn
        .query("SELECT foreign_keys FROM pragma_foreign_keys()")
        .finish()
        .await
        .unwrap()
        .into_rows()
        .unwrap()
        .single_row()
        .unwrap();
    assert_eq!(row.get("foreign_keys").unwrap().as_i64(), Some(1));
    conn.end().await.unwrap();
}

#[tokio::test]
async fn test_missing_library_path() {
    let mut adapter = Adapter::with_default_drivers();
    adapter.register_config(
        ConnectionConfig::new(MEMORY, "sqlite").libpath("/nonexistent/anydb/driver.so"),
    );

    let err = adapter.connect(MEMORY).await.unwrap_err();
    assert!(matches!(err, AnyDbError::DriverInit(_)));
    assert!(!adapter.runtime("sqlite").unwrap().is_initialized());
}

#[tokio::test]
async fn test_registry_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anydb.toml");
    std::fs::write(
        &path,
        "[[connection]]\nuri = \"sqlite::memory:\"\ndrivername = \"sqlite\"\n",
    )
    .unwrap();

    let registry = anydb::ConfigRegistry::load(&path).unwrap();
    let adapter = Adapter::with_default_drivers().with_registry(registry);

    let mut conn = adapter.connect(MEMORY).await.unwrap();
    let outcome = conn.query("SELECT 1 AS ONE").finish().await.unwrap();
    assert_eq!(
        serde_json::to_value(outcome.rows().unwrap()).unwrap(),
        json!({"rows": [{"ONE": 1}]})
    );
    conn.end().await.unwrap();
}
