//! Pipeline Orchestrator
//!
//! Received → Generated → Validated → Executed → Explained → Completed.
//! Any stage may fail; the first failure is terminal. Every request, whatever
//! its outcome, produces exactly one query log record.

use crate::config::PipelineConfig;
use crate::error::{ErrorKind, LogiqError, Result};
use crate::executor::QueryExecutor;
use crate::explainer::ExplanationGenerator;
use crate::generator::QueryGenerator;
use crate::llm::{Strategy, StrategyKind};
use crate::query_log::{FileQueryLog, QueryLogRecord, QueryLogSink};
use crate::schema::{SchemaDescription, SchemaRegistry};
use crate::validator::{QueryValidator, ValidationReport, ValidatorOptions};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Generated,
    Validated,
    Executed,
    Explained,
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Generated => "generation",
            Stage::Validated => "validation",
            Stage::Executed => "execution",
            Stage::Explained => "explanation",
            Stage::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub caller_id: String,
    pub question: String,
}

impl QueryRequest {
    pub fn new(caller_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            question: question.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub question: String,
    pub sql: String,
    pub rows: Vec<Map<String, Value>>,
    pub explanation: String,
    /// Wall-clock latency of the whole request, two decimals
    pub execution_time_ms: f64,
    pub rows_count: usize,
    pub generation_strategy: StrategyKind,
}

/// Terminal failure of a request. `stage` is the step that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{stage} failed [{kind}]: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub message: String,
}

impl PipelineError {
    fn at(stage: Stage, err: LogiqError) -> Self {
        Self {
            kind: err.kind(),
            stage,
            message: err.to_string(),
        }
    }

    /// True for validation failures (the caller's request was refused).
    pub fn is_rejection(&self) -> bool {
        self.kind.is_rejection()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trucks_count: Option<i64>,
    pub backend: StrategyKind,
}

/// Partial data gathered while a request moves through the stages
#[derive(Default)]
struct RunTrace {
    sql: String,
    strategy: Option<StrategyKind>,
}

pub struct Pipeline {
    schema: &'static SchemaRegistry,
    generator: QueryGenerator,
    validator: QueryValidator,
    executor: QueryExecutor,
    explainer: ExplanationGenerator,
    log: Arc<dyn QueryLogSink>,
}

impl Pipeline {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let log = Arc::new(FileQueryLog::open(&config.log_path)?);
        info!(
            "🚀 Pipeline ready (db: {}, backend: {})",
            config.database_path.display(),
            config.backend.mode()
        );
        Ok(Self::with_parts(
            Strategy::from_config(&config.backend),
            config.validator.clone(),
            QueryExecutor::new(&config.database_path),
            log,
        ))
    }

    /// Assemble a pipeline from explicit parts; generator and explainer share `strategy`.
    pub fn with_parts(
        strategy: Strategy,
        validator: ValidatorOptions,
        executor: QueryExecutor,
        log: Arc<dyn QueryLogSink>,
    ) -> Self {
        let schema = SchemaRegistry::canonical();
        Self {
            schema,
            generator: QueryGenerator::new(strategy.clone(), schema),
            validator: QueryValidator::new(schema, validator),
            executor,
            explainer: ExplanationGenerator::new(strategy),
            log,
        }
    }

    pub async fn run(&self, request: &QueryRequest) -> std::result::Result<QueryResponse, PipelineError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        info!("🔍 [{}] {} asked: {}", request_id, request.caller_id, request.question);

        let mut trace = RunTrace::default();
        let outcome = self.run_stages(request, &mut trace).await;
        let elapsed = round_ms(started.elapsed());

        let record = match &outcome {
            Ok(response) => QueryLogRecord {
                request_id,
                timestamp: Utc::now(),
                caller_id: request.caller_id.clone(),
                question: request.question.clone(),
                sql: response.sql.clone(),
                stage: Stage::Completed,
                execution_time_ms: elapsed,
                rows_count: response.rows_count,
                error: None,
                error_kind: None,
                generation_strategy: Some(response.generation_strategy),
            },
            Err(e) => QueryLogRecord {
                request_id,
                timestamp: Utc::now(),
                caller_id: request.caller_id.clone(),
                question: request.question.clone(),
                sql: trace.sql.clone(),
                stage: e.stage,
                execution_time_ms: elapsed,
                rows_count: 0,
                error: Some(e.message.clone()),
                error_kind: Some(e.kind),
                generation_strategy: trace.strategy,
            },
        };

        if let Err(e) = self.log.append(&record) {
            error!("❌ [{}] Failed to write query log record: {}", request_id, e);
        }

        match outcome {
            Ok(mut response) => {
                response.execution_time_ms = elapsed;
                info!("✅ [{}] {} rows in {}ms", request_id, response.rows_count, elapsed);
                Ok(response)
            }
            Err(e) => {
                if e.is_rejection() {
                    warn!("🚫 [{}] Rejected at {}: {}", request_id, e.stage, e.message);
                } else {
                    error!("❌ [{}] Failed at {}: {}", request_id, e.stage, e.message);
                }
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        request: &QueryRequest,
        trace: &mut RunTrace,
    ) -> std::result::Result<QueryResponse, PipelineError> {
        let generated = self
            .generator
            .generate(&request.question)
            .await
            .map_err(|e| PipelineError::at(Stage::Generated, e))?;
        trace.sql = generated.sql.clone();
        trace.strategy = Some(generated.strategy);

        let validated = self
            .validator
            .validate(&generated.sql)
            .map_err(|e| PipelineError::at(Stage::Validated, e))?;
        trace.sql = validated.as_str().to_string();

        let result = self
            .executor
            .execute(&validated)
            .await
            .map_err(|e| PipelineError::at(Stage::Executed, e))?;

        let explanation = self
            .explainer
            .explain(&request.question, validated.as_str(), &result)
            .await;

        Ok(QueryResponse {
            question: request.question.clone(),
            sql: validated.into_string(),
            rows_count: result.count,
            rows: result.rows,
            explanation,
            execution_time_ms: 0.0,
            generation_strategy: generated.strategy,
        })
    }

    pub async fn health(&self) -> HealthReport {
        let backend = self.generator.strategy();
        match self.executor.ping().await {
            Ok(count) => HealthReport {
                status: "healthy".to_string(),
                database: "connected".to_string(),
                trucks_count: Some(count),
                backend,
            },
            Err(e) => {
                warn!("⚠️  Health check failed: {}", e);
                HealthReport {
                    status: "degraded".to_string(),
                    database: e.to_string(),
                    trucks_count: None,
                    backend,
                }
            }
        }
    }

    pub fn schema(&self) -> SchemaDescription {
        self.schema.describe()
    }

    pub fn validate_and_explain(&self, sql: &str) -> ValidationReport {
        self.validator.validate_and_explain(sql)
    }
}

fn round_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}
