//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.postbox/config.json`) and environment.
//! Secrets and the database URL can be supplied through the environment instead of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Env var holding the model credential. Overrides `model.apiKey`.
pub const MODEL_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Env var overriding `database.url`.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Env var overriding the config file path.
pub const CONFIG_PATH_ENV: &str = "POSTBOX_CONFIG_PATH";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Message store location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Reply model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// How the caller identity is read from requests.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Local event substrate settings.
    #[serde(default)]
    pub events: EventsConfig,
}

/// HTTP bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port (default 3000).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_port() -> u16 {
    3000
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// sqlx SQLite URL, e.g. `sqlite://data/postbox.db` or `sqlite::memory:`.
    /// Default: `postbox.db` next to the config file. Overridden by DATABASE_URL.
    pub url: Option<String>,
}

/// Reply model: which backend, which model, and generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// "gemini" or "placeholder". When absent, Gemini is used if a credential is configured.
    #[serde(default)]
    pub backend: Option<String>,

    /// Model name (default "gemini-1.5-pro").
    #[serde(default = "default_model_name")]
    pub model: String,

    /// API base URL (default Google Generative Language v1beta).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Credential. Overridden by GEMINI_API_KEY env.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub generation: GenerationConfig,
}

fn default_model_name() -> String {
    "gemini-1.5-pro".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: None,
            model: default_model_name(),
            base_url: None,
            api_key: None,
            generation: GenerationConfig::default(),
        }
    }
}

/// Sampling parameters sent with every generate call. Serialized as the API's `generationConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_response_mime_type")]
    pub response_mime_type: String,
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    0.95
}

fn default_top_k() -> u32 {
    64
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_response_mime_type() -> String {
    "text/plain".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
            response_mime_type: default_response_mime_type(),
        }
    }
}

/// Caller identity comes from an upstream auth proxy via a trusted header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Header carrying the signed-in user id (default "x-user-id").
    #[serde(default = "default_user_header")]
    pub user_header: String,

    /// Identity used when the header is absent. Only honoured on a loopback bind.
    #[serde(default)]
    pub dev_user_id: Option<String>,
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
            dev_user_id: None,
        }
    }
}

/// Local event substrate: queue size and retry policy for subscribed functions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsConfig {
    /// Attempts per function run, including the first (default 4).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds (default 1000).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Bounded event queue size (default 64).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Recorded step outputs older than this are pruned when the store opens (default 168, one week).
    /// Redelivering an event older than the window runs its steps again.
    #[serde(default = "default_step_retention_hours")]
    pub step_retention_hours: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    64
}

fn default_step_retention_hours() -> u64 {
    168
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            queue_capacity: default_queue_capacity(),
            step_retention_hours: default_step_retention_hours(),
        }
    }
}

/// Trimmed, non-empty env value wins; otherwise the trimmed, non-empty config value.
fn env_or_config(env_value: Option<String>, config_value: Option<&str>) -> Option<String> {
    env_value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            config_value
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the model credential: env GEMINI_API_KEY overrides config.
pub fn resolve_model_api_key(config: &Config) -> Option<String> {
    env_or_config(
        std::env::var(MODEL_API_KEY_ENV).ok(),
        config.model.api_key.as_deref(),
    )
}

/// Resolve the database URL: env DATABASE_URL, then `database.url`, then `postbox.db`
/// beside the config file.
pub fn resolve_database_url(config: &Config, config_path: &Path) -> String {
    env_or_config(
        std::env::var(DATABASE_URL_ENV).ok(),
        config.database.url.as_deref(),
    )
    .unwrap_or_else(|| default_database_url(config_path))
}

fn default_database_url(config_path: &Path) -> String {
    format!("sqlite://{}", config_dir(config_path).join("postbox.db").display())
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".postbox").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Directory holding the config file ("." for a bare file name).
pub fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Load config from the default path (or POSTBOX_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
