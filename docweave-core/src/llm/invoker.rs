//! Primary/fallback invocation policy
//!
//! One attempt on the primary provider, at most one on the fallback. A
//! timeout or an empty answer counts as a provider failure. No other retries.

use super::errors::AiError;
use super::traits::CompletionProvider;
use super::types::{Completion, CompletionOptions, CompletionResponse, Prompt, estimate_tokens};
use markup_regex::fences;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Calls the completion capability for one prompt
#[derive(Clone)]
pub struct AiInvoker {
    primary: Arc<dyn CompletionProvider>,
    fallback: Option<Arc<dyn CompletionProvider>>,
    timeout: Duration,
    options: CompletionOptions,
}

impl AiInvoker {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(primary: Arc<dyn CompletionProvider>) -> Self {
        Self {
            primary,
            fallback: None,
            timeout: Self::DEFAULT_TIMEOUT,
            options: CompletionOptions::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn CompletionProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    pub fn fallback_name(&self) -> Option<&str> {
        self.fallback.as_deref().map(|p| p.name())
    }

    /// Run `prompt` on the primary provider, then once on the fallback.
    ///
    /// `default_confidence` is used when the provider reports none.
    pub async fn invoke_prompt(&self, prompt: &Prompt, default_confidence: f32) -> Result<Completion, AiError> {
        let primary_error = match self.attempt(self.primary.as_ref(), prompt).await {
            Ok(response) => return Ok(Self::finish(response, self.primary.as_ref(), false, default_confidence)),
            Err(err) => err,
        };

        let Some(fallback) = self.fallback.as_deref() else {
            error!("Provider {} failed with no fallback configured: {}", self.primary.name(), primary_error);
            return Err(AiError::exhausted(vec![self.primary.name().to_string()], &primary_error));
        };

        warn!(
            "Provider {} failed ({}), trying fallback {}",
            self.primary.name(),
            primary_error,
            fallback.name()
        );

        match self.attempt(fallback, prompt).await {
            Ok(response) => Ok(Self::finish(response, fallback, true, default_confidence)),
            Err(fallback_error) => {
                error!("Fallback provider {} failed: {}", fallback.name(), fallback_error);
                Err(AiError::exhausted(
                    vec![self.primary.name().to_string(), fallback.name().to_string()],
                    &fallback_error,
                ))
            }
        }
    }

    async fn attempt(
        &self,
        provider: &dyn CompletionProvider,
        prompt: &Prompt,
    ) -> Result<CompletionResponse, AiError> {
        debug!("Invoking {} ({})", provider.name(), provider.model());

        let response = tokio::time::timeout(self.timeout, provider.complete(prompt, &self.options))
            .await
            .map_err(|_| AiError::timeout(self.timeout))??;

        let text = normalize_response(&response.text);
        if text.trim().is_empty() {
            return Err(AiError::empty_response(provider.name()));
        }

        let tokens_used = if response.tokens_used > 0 {
            response.tokens_used
        } else {
            estimate_tokens(prompt.char_len() + text.len())
        };

        Ok(CompletionResponse { text: text.to_string(), tokens_used, ..response })
    }

    fn finish(
        response: CompletionResponse,
        provider: &dyn CompletionProvider,
        used_fallback: bool,
        default_confidence: f32,
    ) -> Completion {
        Completion {
            text: response.text,
            tokens_used: response.tokens_used,
            confidence: response.confidence.unwrap_or(default_confidence).clamp(0.0, 1.0),
            provider: provider.name().to_string(),
            used_fallback,
        }
    }
}

/// Drop a single code fence wrapping all of the output.
///
/// Unfenced output is returned untouched, surrounding whitespace included.
pub fn normalize_response(text: &str) -> &str {
    let trimmed = text.trim();
    let inner = fences::unwrap(trimmed);
    if inner.len() < trimmed.len() { inner } else { text }
}
