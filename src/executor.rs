//! Query Executor
//!
//! Runs validated SQL against the SQLite fleet store. Each call opens its own
//! read-only connection on the blocking pool; the connection is dropped when
//! the closure returns.

use crate::error::{LogiqError, Result};
use crate::validator::ValidatedQuery;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rows returned by one query, in store order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub count: usize,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    db_path: PathBuf,
}

impl QueryExecutor {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn execute(&self, query: &ValidatedQuery) -> Result<QueryResult> {
        let path = self.db_path.clone();
        let sql = query.as_str().to_string();

        let result = tokio::task::spawn_blocking(move || run_query(&path, &sql))
            .await
            .map_err(|e| LogiqError::Execution(format!("query task failed: {}", e)))??;

        info!("📊 Query returned {} rows", result.count);
        Ok(result)
    }

    /// Number of trucks in the store; used for health reporting.
    pub async fn ping(&self) -> Result<i64> {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_read_only(&path)?;
            conn.query_row("SELECT COUNT(*) FROM trucks", [], |row| row.get::<_, i64>(0))
                .map_err(|e| LogiqError::Execution(e.to_string()))
        })
        .await
        .map_err(|e| LogiqError::Execution(format!("ping task failed: {}", e)))?
    }
}

fn open_read_only(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(LogiqError::StorageUnavailable(format!(
            "database not found at {}",
            path.display()
        )));
    }
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| LogiqError::StorageUnavailable(format!("{}: {}", path.display(), e)))
}

fn run_query(path: &Path, sql: &str) -> Result<QueryResult> {
    let conn = open_read_only(path)?;
    debug!("Executing: {}", sql);

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| LogiqError::Execution(e.to_string()))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt
        .query([])
        .map_err(|e| LogiqError::Execution(e.to_string()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| LogiqError::Execution(e.to_string()))? {
        let mut record = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let value = row
                .get_ref(i)
                .map_err(|e| LogiqError::Execution(e.to_string()))?;
            record.insert(name.clone(), to_json(value));
        }
        out.push(record);
    }

    Ok(QueryResult {
        count: out.len(),
        columns,
        rows: out,
    })
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}
