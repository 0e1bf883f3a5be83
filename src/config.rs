//! Pipeline Configuration
//!
//! Built once at startup and handed to every component. Whether the
//! generative backend is available is decided here and nowhere else.

use crate::error::{LogiqError, Result};
use crate::validator::ValidatorOptions;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "data/logiq.db";
pub const DEFAULT_LOG_PATH: &str = "logs/queries.log";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Placeholder keys shipped in sample env files; treated as "not configured".
const PLACEHOLDER_KEYS: [&str; 3] = ["dummy-api-key", "your_api_key_here", "changeme"];

/// Generative backend settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Template matcher and result-shape analyzer only
    Disabled,
    Remote {
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    },
}

impl BackendConfig {
    /// Remote backend, or `Disabled` when the key is missing, empty or a placeholder.
    pub fn from_key(api_key: Option<String>, model: String, base_url: String, timeout: Duration) -> Self {
        match api_key {
            Some(key) if !key.trim().is_empty() && !PLACEHOLDER_KEYS.contains(&key.trim()) => {
                BackendConfig::Remote {
                    api_key: key.trim().to_string(),
                    model,
                    base_url: base_url.trim_end_matches('/').to_string(),
                    timeout,
                }
            }
            _ => BackendConfig::Disabled,
        }
    }

    /// Model, endpoint and timeout from `LOGIQ_LLM_*`, paired with the given key.
    pub fn from_env_with_key(api_key: Option<String>) -> Result<Self> {
        let model = std::env::var("LOGIQ_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url = std::env::var("LOGIQ_LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout = parse_timeout(std::env::var("LOGIQ_LLM_TIMEOUT_SECS").ok().as_deref())?;
        Ok(Self::from_key(api_key, model, base_url, timeout))
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, BackendConfig::Remote { .. })
    }

    pub fn mode(&self) -> &'static str {
        if self.is_configured() {
            "remote"
        } else {
            "templates"
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_path: PathBuf,
    pub log_path: PathBuf,
    pub backend: BackendConfig,
    pub validator: ValidatorOptions,
}

impl PipelineConfig {
    pub fn new(database_path: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            log_path: log_path.into(),
            backend: BackendConfig::Disabled,
            validator: ValidatorOptions::default(),
        }
    }

    /// Read configuration from the environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path = std::env::var("LOGIQ_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        let log_path = std::env::var("LOGIQ_LOG_PATH").unwrap_or_else(|_| DEFAULT_LOG_PATH.to_string());
        let backend = BackendConfig::from_env_with_key(std::env::var("OPENAI_API_KEY").ok())?;

        Ok(Self {
            database_path: PathBuf::from(database_path),
            log_path: PathBuf::from(log_path),
            backend,
            validator: ValidatorOptions::default(),
        })
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }
}

/// Backend timeout in whole seconds; unset means the default, zero or garbage is an error.
fn parse_timeout(raw: Option<&str>) -> Result<Duration> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    };
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(LogiqError::Config(format!(
            "LOGIQ_LLM_TIMEOUT_SECS must be a positive number of seconds, got {:?}",
            raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(key: Option<&str>) -> BackendConfig {
        BackendConfig::from_key(
            key.map(String::from),
            DEFAULT_MODEL.to_string(),
            "http://localhost:8000/v1/".to_string(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_missing_or_placeholder_key_disables_backend() {
        assert_eq!(remote(None), BackendConfig::Disabled);
        assert_eq!(remote(Some("   ")), BackendConfig::Disabled);
        assert_eq!(remote(Some("dummy-api-key")), BackendConfig::Disabled);
        assert_eq!(remote(None).mode(), "templates");
    }

    #[test]
    fn test_real_key_enables_backend() {
        let config = remote(Some("sk-test"));
        assert!(config.is_configured());
        match config {
            BackendConfig::Remote { base_url, api_key, .. } => {
                assert_eq!(base_url, "http://localhost:8000/v1");
                assert_eq!(api_key, "sk-test");
            }
            BackendConfig::Disabled => panic!("expected remote backend"),
        }
    }

    #[test]
    fn test_timeout_parsing() {
        assert_eq!(parse_timeout(None).unwrap(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(parse_timeout(Some("  ")).unwrap(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(parse_timeout(Some(" 45 ")).unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_bad_timeout_is_config_error() {
        for raw in ["0", "-3", "20s", "soon", "1.5"] {
            match parse_timeout(Some(raw)) {
                Err(LogiqError::Config(message)) => assert!(message.contains(raw), "{}", message),
                other => panic!("expected Config error for {:?}, got {:?}", raw, other),
            }
        }
    }
}
