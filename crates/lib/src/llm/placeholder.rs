//! Backend used when no model credential is configured.

use super::{ChatBackend, LlmError};
use async_trait::async_trait;

pub const PLACEHOLDER_REPLY: &str = "Add OPENAI_API_KEY environment variable to get AI responses.";

/// Replies with [`PLACEHOLDER_REPLY`] without calling any model.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderBackend;

#[async_trait]
impl ChatBackend for PlaceholderBackend {
    fn name(&self) -> &str {
        "placeholder"
    }

    async fn reply(&self, _text: &str) -> Result<String, LlmError> {
        Ok(PLACEHOLDER_REPLY.to_string())
    }
}
