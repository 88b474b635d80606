//! Gemini API client (generateContent) and chat sessions.
//!
//! A [`ChatSession`] holds the conversation so far; each `send_message` posts the whole
//! history plus the new user turn and appends the model's answer.

use super::{ChatBackend, LlmError};
use crate::config::GenerationConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the Gemini REST API.
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

/// One conversation turn: role ("user" or "model") and its text parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// Non-text parts (inline data etc.) deserialize with empty text.
    #[serde(default)]
    pub text: String,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part { text: text.into() }],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    generation_config: &'a GenerationConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate's parts ("" when there is none).
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

impl GeminiClient {
    pub fn new(api_key: String, model: impl Into<String>, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            api_key,
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Start a session seeded with `history`.
    pub fn start_chat(&self, history: Vec<Content>, generation_config: GenerationConfig) -> ChatSession<'_> {
        ChatSession {
            client: self,
            history,
            generation_config,
        }
    }

    /// POST /models/{model}:generateContent
    pub async fn generate_content(
        &self,
        contents: &[Content],
        generation_config: &GenerationConfig,
    ) -> Result<GenerateContentResponse, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateContentRequest {
            contents,
            generation_config,
        };
        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: GenerateContentResponse = res.json().await?;
        Ok(data)
    }
}

/// Multi-turn conversation against one client.
pub struct ChatSession<'a> {
    client: &'a GeminiClient,
    history: Vec<Content>,
    generation_config: GenerationConfig,
}

impl ChatSession<'_> {
    /// Send one user turn; returns the model's text and records both turns in the history.
    pub async fn send_message(&mut self, text: &str) -> Result<String, LlmError> {
        let mut contents = self.history.clone();
        contents.push(Content::user(text));
        let response = self
            .client
            .generate_content(&contents, &self.generation_config)
            .await?;
        let reply = response.text();
        if reply.is_empty() {
            let reason = response
                .candidates
                .first()
                .and_then(|c| c.finish_reason.as_deref())
                .unwrap_or("none");
            log::debug!("gemini returned no text (finish reason: {})", reason);
            return Err(LlmError::EmptyResponse);
        }
        contents.push(Content::model(reply.clone()));
        self.history = contents;
        Ok(reply)
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }
}

/// [`ChatBackend`] that opens a fresh primed session per reply.
pub struct GeminiBackend {
    client: GeminiClient,
    priming: Vec<Content>,
    generation_config: GenerationConfig,
}

impl GeminiBackend {
    pub fn new(client: GeminiClient, priming: Vec<Content>, generation_config: GenerationConfig) -> Self {
        Self {
            client,
            priming,
            generation_config,
        }
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn reply(&self, text: &str) -> Result<String, LlmError> {
        log::debug!("gemini: generating reply with {}", self.client.model());
        let mut session = self
            .client
            .start_chat(self.priming.clone(), self.generation_config.clone());
        session.send_message(text).await
    }
}
