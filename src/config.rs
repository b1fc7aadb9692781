//! Engine configuration
//!
//! Values come from the process environment, after an optional `.env` file
//! has been folded in by `dotenv`.

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

pub const DEFAULT_LLM_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_LLM_MODEL: &str = "llama3";
pub const DEFAULT_TABLE_NAMESPACE: &str = "workspace.fars_database";
pub const DEFAULT_CODEBOOK_PATH: &str = "fars_codebook.csv";
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// How the final answer is produced from a successful result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    /// Second generation call under the enumerated answer format rules.
    #[default]
    Generated,
    /// Deterministic template rendering, no second call.
    Template,
}

impl std::str::FromStr for AnswerMode {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "generated" | "llm" => Ok(AnswerMode::Generated),
            "template" => Ok(AnswerMode::Template),
            other => Err(QueryError::Config(format!(
                "Unknown answer mode '{}' (expected 'generated' or 'template')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WarehouseConfig {
    pub host: Option<String>,
    pub token: Option<String>,
    pub warehouse_id: Option<String>,
    /// Seconds the warehouse may hold the request open before we start polling.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u32,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_wait_timeout_secs() -> u32 {
    30
}

fn default_max_polls() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    pub table_namespace: String,
    pub codebook_path: PathBuf,
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    pub max_retries: u32,
    #[serde(default)]
    pub answer_mode: AnswerMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            warehouse: WarehouseConfig {
                wait_timeout_secs: default_wait_timeout_secs(),
                max_polls: default_max_polls(),
                ..WarehouseConfig::default()
            },
            table_namespace: DEFAULT_TABLE_NAMESPACE.to_string(),
            codebook_path: PathBuf::from(DEFAULT_CODEBOOK_PATH),
            schema_path: None,
            max_retries: DEFAULT_MAX_RETRIES,
            answer_mode: AnswerMode::default(),
        }
    }
}

impl EngineConfig {
    /// Build configuration from the environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("LLM_BASE_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("LLM_MODEL") {
            config.llm.model = model;
        }
        config.llm.api_key = get("LLM_API_KEY").or_else(|| get("OPENAI_API_KEY"));

        config.warehouse.host = get("DATABRICKS_HOST");
        config.warehouse.token = get("DATABRICKS_TOKEN");
        config.warehouse.warehouse_id = get("DATABRICKS_WAREHOUSE_ID").or_else(|| {
            get("DATABRICKS_HTTP_PATH").and_then(|p| warehouse_id_from_http_path(&p))
        });

        if let Some(ns) = get("FARS_TABLE_NAMESPACE") {
            config.table_namespace = ns.trim_matches('.').to_string();
        }
        if let Some(path) = get("FARS_CODEBOOK_PATH") {
            config.codebook_path = PathBuf::from(path);
        }
        config.schema_path = get("FARS_SCHEMA_PATH").map(PathBuf::from);

        if let Some(raw) = get("FARS_MAX_RETRIES") {
            config.max_retries = raw.trim().parse().map_err(|_| {
                QueryError::Config(format!("FARS_MAX_RETRIES must be a non-negative integer, got '{}'", raw))
            })?;
        }
        if let Some(mode) = get("FARS_ANSWER_MODE") {
            config.answer_mode = mode.parse()?;
        }

        Ok(config)
    }
}

/// Extract the warehouse id from an HTTP path like `/sql/1.0/warehouses/abc123`.
pub fn warehouse_id_from_http_path(http_path: &str) -> Option<String> {
    let mut parts = http_path.trim_matches('/').split('/');
    while let Some(part) = parts.next() {
        if part == "warehouses" || part == "endpoints" {
            return parts.next().filter(|id| !id.is_empty()).map(str::to_string);
        }
    }
    None
}
