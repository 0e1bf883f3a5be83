//! Query Log
//!
//! Append-only record of every pipeline request, one JSON object per line.

use crate::error::{ErrorKind, LogiqError, Result};
use crate::llm::StrategyKind;
use crate::pipeline::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// One request outcome, success or failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogRecord {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub caller_id: String,
    pub question: String,
    /// Empty when the request failed before a query was generated
    pub sql: String,
    pub stage: Stage,
    pub execution_time_ms: f64,
    pub rows_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_strategy: Option<StrategyKind>,
}

impl QueryLogRecord {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub trait QueryLogSink: Send + Sync {
    fn append(&self, record: &QueryLogRecord) -> Result<()>;
}

/// Newline-delimited JSON file sink
pub struct FileQueryLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileQueryLog {
    /// Open (or create) the log file, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Query log at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last `limit` records, oldest first. Lines that do not parse are skipped.
    pub fn recent(&self, limit: usize) -> Result<Vec<QueryLogRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QueryLogRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("⚠️  Skipping malformed query log line {}: {}", number + 1, e),
            }
        }
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}

impl QueryLogSink for FileQueryLog {
    fn append(&self, record: &QueryLogRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| LogiqError::QueryLog("query log mutex poisoned".to_string()))?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// In-process sink, used by tests and embedders that ship records elsewhere.
#[derive(Default)]
pub struct MemoryQueryLog {
    records: Mutex<Vec<QueryLogRecord>>,
}

impl MemoryQueryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<QueryLogRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl QueryLogSink for MemoryQueryLog {
    fn append(&self, record: &QueryLogRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| LogiqError::QueryLog("query log mutex poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}
