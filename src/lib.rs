//! Logiq - fleet question answering over a guarded SQL pipeline
//!
//! A natural-language question is turned into SQL (generative backend or
//! keyword templates), checked against the canonical fleet schema, executed
//! read-only on SQLite and summarized.

pub mod config;
pub mod error;
pub mod executor;
pub mod explainer;
pub mod generator;
pub mod llm;
pub mod pipeline;
pub mod query_log;
pub mod schema;
pub mod validator;

pub use config::{BackendConfig, PipelineConfig};
pub use error::{ErrorKind, LogiqError, Result};
pub use executor::{QueryExecutor, QueryResult};
pub use generator::{GeneratedQuery, QueryGenerator};
pub use llm::{CompletionBackend, Strategy, StrategyKind};
pub use pipeline::{HealthReport, Pipeline, PipelineError, QueryRequest, QueryResponse, Stage};
pub use query_log::{FileQueryLog, MemoryQueryLog, QueryLogRecord, QueryLogSink};
pub use schema::SchemaRegistry;
pub use validator::{QueryValidator, ValidatedQuery, ValidationReport, ValidatorOptions};
