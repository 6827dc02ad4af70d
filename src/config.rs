//! Configuration module for the content memory.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CM_` and use double underscores
//! to separate nested levels:
//! - `CM_STORE__DIMENSION=3072` sets `store.dimension`
//! - `CM_EMBEDDING__MODEL=text-embedding-3-large` sets `embedding.model`
//! - `CM_EMBEDDING__RETRY__RATE_LIMIT_RETRIES=8` sets `embedding.retry.rate_limit_retries`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding the settings file, searched for from the current
/// directory upwards.
pub const CONFIG_DIR: &str = ".content-memory";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Store location and behaviour
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoreConfig {
    /// Directory holding the index and record files
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Vector dimension; must match the embedding model
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Persist after every Nth single insertion (batches always persist)
    #[serde(default = "default_save_every")]
    pub save_every: usize,

    /// Default number of search results
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Default minimum similarity for search results
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
}

/// Which embedding backend to use.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP API
    #[default]
    #[serde(rename = "openai")]
    OpenAi,

    /// Offline feature hashing, for development and tests
    Hash,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// Backend to use
    #[serde(default)]
    pub provider: ProviderKind,

    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model name sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// API key; prefer `api_key_env` so keys stay out of settings.toml
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable consulted when `api_key` is unset
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Character budget applied before sending text
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Texts per provider request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Send `dimensions` with requests (text-embedding-3 models only)
    #[serde(default = "default_false")]
    pub request_dimensions: bool,

    /// Retry behaviour
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after rate-limit responses
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,

    /// First rate-limit backoff in milliseconds, doubled on each retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Longest single backoff in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Retries after other transient failures
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    /// Flat delay between transient retries in milliseconds
    #[serde(default = "default_transient_delay_ms")]
    pub transient_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_store_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("store")
}
fn default_dimension() -> usize {
    crate::vector::VECTOR_DIMENSION_1536
}
fn default_save_every() -> usize {
    10
}
fn default_k() -> usize {
    5
}
fn default_threshold() -> f32 {
    0.7
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_chars() -> usize {
    crate::embedding::DEFAULT_MAX_CHARS
}
fn default_batch_size() -> usize {
    crate::embedding::DEFAULT_BATCH_SIZE
}
fn default_false() -> bool {
    false
}
fn default_rate_limit_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_transient_retries() -> u32 {
    3
}
fn default_transient_delay_ms() -> u64 {
    1_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            dimension: default_dimension(),
            save_every: default_save_every(),
            default_k: default_k(),
            default_threshold: default_threshold(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            api_base: default_api_base(),
            model: default_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_ms: default_timeout_ms(),
            max_chars: default_max_chars(),
            batch_size: default_batch_size(),
            request_dimensions: false,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            rate_limit_retries: default_rate_limit_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            transient_retries: default_transient_retries(),
            transient_delay_ms: default_transient_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EmbeddingConfig {
    /// Returns the configured API key, falling back to `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.is_empty())
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path))
            // Double underscore separates nested levels, single underscores
            // stay inside field names
            .merge(Env::prefixed("CM_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the settings file by looking for the config directory
    /// from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join("settings.toml"))
    }

    /// Checks the values figment cannot validate on its own.
    pub fn validate(&self) -> Result<(), String> {
        if self.store.dimension == 0 {
            return Err("store.dimension must be greater than zero".to_string());
        }
        if self.store.save_every == 0 {
            return Err("store.save_every must be at least 1".to_string());
        }
        if !(-1.0..=1.0).contains(&self.store.default_threshold) {
            return Err("store.default_threshold must be between -1.0 and 1.0".to_string());
        }
        if self.embedding.batch_size == 0 {
            return Err("embedding.batch_size must be at least 1".to_string());
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(
        dir: impl AsRef<Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = dir.as_ref().join(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = r#"# Content Memory Configuration File

# Version of the configuration schema
version = 1

[store]
# Directory holding index.bin, metadata.json, id_map.json and vectors.json
path = ".content-memory/store"

# Vector dimension, must match the embedding model
# text-embedding-3-small: 1536, text-embedding-3-large: 3072
dimension = 1536

# Persist after every Nth single insertion (batch operations always persist)
save_every = 10

# Search defaults
default_k = 5
default_threshold = 0.7

[embedding]
# "openai" for any OpenAI-compatible API, "hash" for offline feature hashing
provider = "openai"
api_base = "https://api.openai.com/v1"
model = "text-embedding-3-small"

# The API key is read from this environment variable
api_key_env = "OPENAI_API_KEY"

# Per-request timeout in milliseconds
timeout_ms = 30000

# Texts are trimmed, whitespace-collapsed and cut to this many characters
max_chars = 24000

# Texts per request
batch_size = 100

# Send the store dimension with each request (text-embedding-3 models only)
request_dimensions = false

[embedding.retry]
# Rate limits back off exponentially: base_delay_ms * 2^attempt
rate_limit_retries = 5
base_delay_ms = 1000
max_delay_ms = 60000

# Other transient failures retry with a flat delay
transient_retries = 3
transient_delay_ms = 1000

[logging]
# Overridden by RUST_LOG
level = "info"
"#;

        std::fs::write(&config_path, template)?;
        Ok(config_path)
    }
}
