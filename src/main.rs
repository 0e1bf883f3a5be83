use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logiq::config::PipelineConfig;
use logiq::pipeline::{Pipeline, QueryRequest};
use logiq::query_log::FileQueryLog;
use logiq::schema::SchemaRegistry;
use logiq::validator::QueryValidator;
use logiq::BackendConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "logiq")]
#[command(about = "Ask questions about the fleet in natural language, answered with guarded SQL")]
struct Args {
    /// Path to the SQLite fleet database (or set LOGIQ_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to the query log (or set LOGIQ_LOG_PATH)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// OpenAI API key (or set OPENAI_API_KEY); without one, templates are used
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Allow queries without a table reference
    #[arg(long, global = true)]
    lenient: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a natural-language question
    Ask {
        question: String,

        /// Caller identity recorded in the query log
        #[arg(short, long, default_value = "cli")]
        user: String,
    },
    /// Check a SQL query against the safety rules without running it
    Validate { sql: String },
    /// Print the canonical schema
    Schema,
    /// Show the most recent query log records
    Logs {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Check database connectivity and backend mode
    Health,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(db) = &args.db {
        config.database_path = db.clone();
    }
    if let Some(log_file) = &args.log_file {
        config.log_path = log_file.clone();
    }
    if let Some(key) = &args.api_key {
        config.backend = BackendConfig::from_env_with_key(Some(key.clone()))?;
    }
    config.validator.strict = !args.lenient;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args).context("loading configuration")?;

    match &args.command {
        Command::Ask { question, user } => {
            let pipeline = Pipeline::from_config(&config)?;
            match pipeline.run(&QueryRequest::new(user.clone(), question.clone())).await {
                Ok(response) => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("{}", serde_json::to_string_pretty(&e)?);
                    // 2 for refused requests, 1 for server-side failures
                    Ok(ExitCode::from(if e.is_rejection() { 2 } else { 1 }))
                }
            }
        }
        Command::Validate { sql } => {
            let validator = QueryValidator::new(SchemaRegistry::canonical(), config.validator.clone());
            let report = validator.validate_and_explain(sql);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.valid { ExitCode::SUCCESS } else { ExitCode::from(2) })
        }
        Command::Schema => {
            let schema = SchemaRegistry::canonical().describe();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Logs { limit } => {
            let log = FileQueryLog::open(&config.log_path)
                .with_context(|| format!("opening query log {}", config.log_path.display()))?;
            let records = log.recent(*limit)?;
            info!("📜 {} records from {}", records.len(), log.path().display());
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let pipeline = Pipeline::from_config(&config)?;
            let report = pipeline.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.status == "healthy" { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
    }
}
