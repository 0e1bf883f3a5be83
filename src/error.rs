use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogiqError {
    #[error("Empty SQL query")]
    EmptyQuery,

    #[error("Only SELECT or WITH queries are allowed; query starts with: {0}")]
    NotReadOnly(String),

    #[error("Banned token detected: '{0}'. DML/DDL commands are not allowed")]
    BannedToken(String),

    #[error("Multiple SQL statements are not allowed; found ';' inside the query")]
    MultipleStatements,

    #[error("Tables not allowed: {}", .0.join(", "))]
    UnknownTable(Vec<String>),

    #[error("No valid table referenced in the query")]
    NoTableReferenced,

    #[error("LIMIT too high: {value}. Maximum allowed: {max}")]
    LimitTooHigh { value: u64, max: u64 },

    #[error("LIMIT must be a plain row count no greater than {max}; found: LIMIT {clause}")]
    InvalidLimit { clause: String, max: u64 },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Query log error: {0}")]
    QueryLog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LogiqError>;

/// Machine-readable error kind returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    EmptyQuery,
    NotReadOnly,
    BannedToken,
    MultipleStatements,
    UnknownTable,
    NoTableReferenced,
    LimitTooHigh,
    StorageUnavailable,
    ExecutionError,
    GenerationFailed,
}

impl ErrorKind {
    /// Validation kinds are rejections of the request itself; the rest are server-side failures.
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            ErrorKind::EmptyQuery
                | ErrorKind::NotReadOnly
                | ErrorKind::BannedToken
                | ErrorKind::MultipleStatements
                | ErrorKind::UnknownTable
                | ErrorKind::NoTableReferenced
                | ErrorKind::LimitTooHigh
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl LogiqError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LogiqError::EmptyQuery => ErrorKind::EmptyQuery,
            LogiqError::NotReadOnly(_) => ErrorKind::NotReadOnly,
            LogiqError::BannedToken(_) => ErrorKind::BannedToken,
            LogiqError::MultipleStatements => ErrorKind::MultipleStatements,
            LogiqError::UnknownTable(_) => ErrorKind::UnknownTable,
            LogiqError::NoTableReferenced => ErrorKind::NoTableReferenced,
            LogiqError::LimitTooHigh { .. } | LogiqError::InvalidLimit { .. } => ErrorKind::LimitTooHigh,
            LogiqError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            LogiqError::GenerationFailed(_) | LogiqError::Llm(_) => ErrorKind::GenerationFailed,
            LogiqError::Execution(_)
            | LogiqError::QueryLog(_)
            | LogiqError::Config(_)
            | LogiqError::Io(_)
            | LogiqError::Json(_) => ErrorKind::ExecutionError,
        }
    }
}
