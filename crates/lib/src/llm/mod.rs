//! Reply model capability and backend selection.
//!
//! The workflow only sees [`ChatBackend`]. Which implementation it gets is decided once
//! from configuration: Gemini when a credential is present, otherwise the placeholder.

mod gemini;
mod placeholder;
mod priming;

use crate::config::{self, Config};
use async_trait::async_trait;
use std::sync::Arc;

pub use gemini::{
    ChatSession, Content, GeminiBackend, GeminiClient, GenerateContentResponse, Part,
};
pub use placeholder::{PlaceholderBackend, PLACEHOLDER_REPLY};
pub use priming::priming_history;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model api error: {0}")]
    Api(String),
    #[error("model returned no text")]
    EmptyResponse,
}

/// Turns one user message into one reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn reply(&self, text: &str) -> Result<String, LlmError>;
}

/// Which backend to use (from model.backend and the credential).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    Gemini,
    Placeholder,
}

/// "placeholder" forces the placeholder. Anything else (or nothing) selects Gemini when a
/// credential is available and falls back to the placeholder otherwise.
pub fn resolve_backend(model: &config::ModelConfig, api_key: Option<&str>) -> BackendChoice {
    let requested = model
        .backend
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if requested == "placeholder" {
        return BackendChoice::Placeholder;
    }
    match api_key {
        Some(_) => BackendChoice::Gemini,
        None => {
            if requested == "gemini" {
                log::warn!(
                    "model.backend is gemini but no credential is set ({}); using placeholder replies",
                    config::MODEL_API_KEY_ENV
                );
            }
            BackendChoice::Placeholder
        }
    }
}

/// Build the configured backend.
pub fn build_backend(config: &Config) -> Arc<dyn ChatBackend> {
    let api_key = config::resolve_model_api_key(config);
    match (resolve_backend(&config.model, api_key.as_deref()), api_key) {
        (BackendChoice::Gemini, Some(key)) => {
            log::info!("reply backend: gemini ({})", config.model.model);
            let client = GeminiClient::new(
                key,
                config.model.model.clone(),
                config.model.base_url.clone(),
            );
            Arc::new(GeminiBackend::new(
                client,
                priming_history(),
                config.model.generation.clone(),
            ))
        }
        _ => {
            log::info!("reply backend: placeholder");
            Arc::new(PlaceholderBackend)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    #[test]
    fn credential_selects_gemini() {
        let model = ModelConfig::default();
        assert_eq!(resolve_backend(&model, Some("key")), BackendChoice::Gemini);
        assert_eq!(resolve_backend(&model, None), BackendChoice::Placeholder);
    }

    #[test]
    fn explicit_placeholder_wins_over_credential() {
        let model = ModelConfig {
            backend: Some("Placeholder".to_string()),
            ..ModelConfig::default()
        };
        assert_eq!(
            resolve_backend(&model, Some("key")),
            BackendChoice::Placeholder
        );
    }

    #[test]
    fn gemini_without_credential_falls_back() {
        let model = ModelConfig {
            backend: Some("gemini".to_string()),
            ..ModelConfig::default()
        };
        assert_eq!(resolve_backend(&model, None), BackendChoice::Placeholder);
    }

    #[tokio::test]
    async fn forced_placeholder_backend_replies_with_placeholder() {
        let mut config = Config::default();
        config.model.backend = Some("placeholder".to_string());
        let backend = build_backend(&config);
        assert_eq!(backend.name(), "placeholder");
        assert_eq!(
            backend.reply("hello").await.expect("reply"),
            PLACEHOLDER_REPLY
        );
    }
}
