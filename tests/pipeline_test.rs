use async_trait::async_trait;
use logiq::error::{ErrorKind, LogiqError, Result};
use logiq::executor::QueryExecutor;
use logiq::llm::{CompletionBackend, Strategy, StrategyKind};
use logiq::pipeline::{Pipeline, QueryRequest, Stage};
use logiq::query_log::{FileQueryLog, MemoryQueryLog};
use logiq::schema::SchemaRegistry;
use logiq::validator::ValidatorOptions;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Fleet store with three trucks, one of them in maintenance
fn create_fleet_db(dir: &Path) -> PathBuf {
    let path = dir.join("fleet.db");
    let conn = Connection::open(&path).unwrap();
    for ddl in SchemaRegistry::canonical().ddl() {
        conn.execute(&ddl, []).unwrap();
    }
    conn.execute_batch(
        "INSERT INTO drivers VALUES ('D1', 'Ana Ruiz', 'C-1001');
         INSERT INTO drivers VALUES ('D2', 'Luis Gomez', 'C-1002');
         INSERT INTO trucks VALUES ('T1', 'AB-123', 'FH16', 'Volvo', 'D1', 'north', 'active');
         INSERT INTO trucks VALUES ('T2', 'CD-456', 'R450', 'Scania', 'D2', 'south', 'maintenance');
         INSERT INTO trucks VALUES ('T3', 'EF-789', 'FH13', 'Volvo', NULL, 'north', 'active');
         INSERT INTO alerts VALUES ('A1', 'T1', '2024-03-01T08:00:00', 'speed', 'critical', 'Over 120 km/h');",
    )
    .unwrap();
    path
}

struct FailingBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionBackend for FailingBackend {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LogiqError::Llm("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Always answers with the same SQL, whatever it is asked
struct FixedSql(&'static str);

#[async_trait]
impl CompletionBackend for FixedSql {
    async fn complete(&self, system: &str, _prompt: &str) -> Result<String> {
        if system.contains("fleet operations analyst") {
            return Ok("Summary from the backend.".to_string());
        }
        Ok(format!("```sql\n{}\n```", self.0))
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

fn pipeline(strategy: Strategy, db: &Path, log: Arc<MemoryQueryLog>) -> Pipeline {
    Pipeline::with_parts(strategy, ValidatorOptions::default(), QueryExecutor::new(db), log)
}

#[tokio::test]
async fn test_maintenance_question_without_backend() {
    let dir = TempDir::new().unwrap();
    let db = create_fleet_db(dir.path());
    let log = Arc::new(MemoryQueryLog::new());

    let response = pipeline(Strategy::TemplateFallback, &db, log.clone())
        .run(&QueryRequest::new("dispatcher", "Lista de camiones en mantenimiento"))
        .await
        .unwrap();

    assert_eq!(response.sql, "SELECT * FROM trucks WHERE status = 'maintenance' LIMIT 1000;");
    assert_eq!(response.rows_count, 1);
    assert_eq!(response.rows[0]["truck_id"], "T2");
    assert!(response.rows.iter().all(|r| r["status"] == "maintenance"));
    assert!(response.explanation.contains("maintenance"));
    assert_eq!(response.generation_strategy, StrategyKind::TemplateFallback);

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].stage, Stage::Completed);
    assert_eq!(records[0].caller_id, "dispatcher");
    assert_eq!(records[0].rows_count, 1);
    assert_eq!(records[0].execution_time_ms, response.execution_time_ms);
}

#[tokio::test]
async fn test_backend_failure_falls_back_to_templates() {
    let dir = TempDir::new().unwrap();
    let db = create_fleet_db(dir.path());
    let log = Arc::new(MemoryQueryLog::new());
    let backend = Arc::new(FailingBackend {
        calls: AtomicUsize::new(0),
    });

    let response = pipeline(
        Strategy::remote(backend.clone(), Duration::from_secs(1)),
        &db,
        log.clone(),
    )
    .run(&QueryRequest::new("ops", "¿Cuántos camiones Volvo hay?"))
    .await
    .unwrap();

    assert_eq!(response.generation_strategy, StrategyKind::TemplateFallback);
    assert_eq!(response.rows_count, 1);
    assert_eq!(response.rows[0]["total"], 2);
    // one call for generation, one for the explanation
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert!(log.records()[0].is_success());
}

#[tokio::test]
async fn test_backend_sql_goes_through_validator() {
    let dir = TempDir::new().unwrap();
    let db = create_fleet_db(dir.path());
    let log = Arc::new(MemoryQueryLog::new());

    let err = pipeline(
        Strategy::remote(Arc::new(FixedSql("DELETE FROM trucks")), Duration::from_secs(1)),
        &db,
        log.clone(),
    )
    .run(&QueryRequest::new("mallory", "remove every truck"))
    .await
    .unwrap_err();

    assert_eq!(err.kind, ErrorKind::NotReadOnly);
    assert_eq!(err.stage, Stage::Validated);
    assert!(err.is_rejection());

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sql, "DELETE FROM trucks");
    assert_eq!(records[0].error_kind, Some(ErrorKind::NotReadOnly));
    assert_eq!(records[0].generation_strategy, Some(StrategyKind::RemoteBackend));

    let conn = Connection::open(&db).unwrap();
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM trucks", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 3);
}

#[tokio::test]
async fn test_backend_sql_and_summary_used_when_valid() {
    let dir = TempDir::new().unwrap();
    let db = create_fleet_db(dir.path());
    let log = Arc::new(MemoryQueryLog::new());

    let response = pipeline(
        Strategy::remote(
            Arc::new(FixedSql("SELECT name FROM drivers ORDER BY name")),
            Duration::from_secs(1),
        ),
        &db,
        log,
    )
    .run(&QueryRequest::new("ops", "who drives for us?"))
    .await
    .unwrap();

    assert_eq!(response.sql, "SELECT name FROM drivers ORDER BY name LIMIT 1000;");
    assert_eq!(response.generation_strategy, StrategyKind::RemoteBackend);
    assert_eq!(response.explanation, "Summary from the backend. (2 rows returned)");
}

#[tokio::test]
async fn test_unknown_table_from_backend_is_rejected() {
    let dir = TempDir::new().unwrap();
    let db = create_fleet_db(dir.path());
    let log = Arc::new(MemoryQueryLog::new());

    let err = pipeline(
        Strategy::remote(Arc::new(FixedSql("SELECT * FROM sqlite_master")), Duration::from_secs(1)),
        &db,
        log,
    )
    .run(&QueryRequest::new("ops", "show internals"))
    .await
    .unwrap_err();

    assert_eq!(err.kind, ErrorKind::UnknownTable);
    assert!(err.message.contains("sqlite_master"));
}

#[tokio::test]
async fn test_file_log_gets_one_line_per_request() {
    let dir = TempDir::new().unwrap();
    let db = create_fleet_db(dir.path());
    let log = Arc::new(FileQueryLog::open(dir.path().join("logs/queries.log")).unwrap());
    let pipeline = Pipeline::with_parts(
        Strategy::TemplateFallback,
        ValidatorOptions::default(),
        QueryExecutor::new(&db),
        log.clone(),
    );

    pipeline
        .run(&QueryRequest::new("a", "alertas críticas"))
        .await
        .unwrap();
    pipeline.run(&QueryRequest::new("b", "")).await.unwrap_err();
    pipeline
        .run(&QueryRequest::new("c", "how many drivers"))
        .await
        .unwrap();

    let records = log.recent(10).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].caller_id, "a");
    assert!(records[1].sql.is_empty());
    assert_eq!(records[1].error_kind, Some(ErrorKind::GenerationFailed));
    assert_eq!(records[2].rows_count, 1);
}

#[tokio::test]
async fn test_health_reports_truck_count() {
    let dir = TempDir::new().unwrap();
    let db = create_fleet_db(dir.path());
    let report = pipeline(Strategy::TemplateFallback, &db, Arc::new(MemoryQueryLog::new()))
        .health()
        .await;
    assert_eq!(report.status, "healthy");
    assert_eq!(report.trucks_count, Some(3));
}

#[tokio::test]
async fn test_backend_limit_tricks_stay_capped() {
    let dir = TempDir::new().unwrap();
    let db = create_fleet_db(dir.path());
    Connection::open(&db)
        .unwrap()
        .execute_batch(
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 1500)
             INSERT INTO telemetry SELECT 'M' || i, 'T1', '2024-01-01T10:00:00', 80.0, 50.0, 90.0 FROM n;",
        )
        .unwrap();

    let run = |sql: &'static str| {
        let db = db.clone();
        async move {
            pipeline(
                Strategy::remote(Arc::new(FixedSql(sql)), Duration::from_secs(1)),
                &db,
                Arc::new(MemoryQueryLog::new()),
            )
            .run(&QueryRequest::new("ops", "telemetry dump"))
            .await
        }
    };

    let err = run("SELECT * FROM telemetry LIMIT -1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::LimitTooHigh);
    assert_eq!(err.stage, Stage::Validated);

    let err = run("SELECT * FROM telemetry LIMIT 0x7fffffff").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::LimitTooHigh);

    let response = run("SELECT * FROM telemetry WHERE truck_id <> 'limit'").await.unwrap();
    assert_eq!(response.rows_count, 1000);

    let response = run("SELECT * FROM telemetry WHERE truck_id IN (SELECT truck_id FROM trucks LIMIT 5)")
        .await
        .unwrap();
    assert_eq!(response.rows_count, 1000);
}
