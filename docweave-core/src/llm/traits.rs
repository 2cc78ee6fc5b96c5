//! The text-completion capability every provider implements

use super::errors::AiError;
use super::types::{CompletionOptions, CompletionResponse, Prompt};
use async_trait::async_trait;

/// A single opaque text-completion backend
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Get the name of this provider
    fn name(&self) -> &str;

    /// Get the model ID being used
    fn model(&self) -> &str;

    /// Check if the provider is configured and reachable
    async fn is_available(&self) -> bool;

    /// Complete a prompt
    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, AiError>;
}
