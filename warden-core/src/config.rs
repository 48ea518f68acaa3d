//! Gateway settings: YAML file first, then `WARDEN_*` environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_policy::DEFAULT_MAX_CLAUSE_LENGTH;
use warden_store::DEFAULT_ROW_LIMIT;
use warden_types::Tariff;

pub const ENV_LLM_URL: &str = "WARDEN_LLM_URL";
pub const ENV_LLM_MODEL: &str = "WARDEN_LLM_MODEL";
pub const ENV_LLM_API_KEY: &str = "WARDEN_LLM_API_KEY";
pub const ENV_MAX_RETRIES: &str = "WARDEN_MAX_RETRIES";
pub const ENV_DB: &str = "WARDEN_DB";
pub const ENV_AUDIT_LOG: &str = "WARDEN_AUDIT_LOG";

pub const DEFAULT_MAX_REQUEST_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
    #[error("invalid config: {0}")]
    Parse(String),
    #[error("invalid value for {name}: '{value}'")]
    InvalidEnv { name: String, value: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub llm: LlmConfig,
    pub max_retries: u32,
    /// Longest request, in characters, that is sent to the generator.
    pub max_request_chars: usize,
    pub tariff: Tariff,
    pub clause_max_tokens: u32,
    pub code_max_tokens: u32,
    pub max_clause_length: usize,
    pub row_limit: usize,
    pub db_path: PathBuf,
    pub audit_log: PathBuf,
    /// Table descriptor for log queries; the built-in `audit_logs` layout
    /// when unset.
    pub schema_path: Option<PathBuf>,
    /// Record/enum contracts for scaffolds. A missing file here is not an
    /// error; prompts fall back to generic guidance.
    pub contracts_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            max_retries: 2,
            max_request_chars: DEFAULT_MAX_REQUEST_CHARS,
            tariff: Tariff::default(),
            clause_max_tokens: 200,
            code_max_tokens: 4000,
            max_clause_length: DEFAULT_MAX_CLAUSE_LENGTH,
            row_limit: DEFAULT_ROW_LIMIT,
            db_path: PathBuf::from("data/nl_query_logs.db"),
            audit_log: PathBuf::from("data/scaffold_audit.jsonl"),
            schema_path: None,
            contracts_path: Some(PathBuf::from("contracts.yaml")),
        }
    }
}

impl GatewayConfig {
    /// Defaults, overlaid by `path` (if given), overlaid by the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_path(p)?,
            None => Self::default(),
        };
        cfg.apply_env(|name| std::env::var(name).ok())?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_LLM_URL) {
            self.llm.url = url;
        }
        if let Some(model) = get(ENV_LLM_MODEL) {
            self.llm.model = model;
        }
        if let Some(key) = get(ENV_LLM_API_KEY) {
            self.llm.api_key = Some(key);
        }
        if let Some(raw) = get(ENV_MAX_RETRIES) {
            self.max_retries = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_MAX_RETRIES.to_string(),
                value: raw.clone(),
            })?;
        }
        if let Some(db) = get(ENV_DB) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(log) = get(ENV_AUDIT_LOG) {
            self.audit_log = PathBuf::from(log);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }
}
