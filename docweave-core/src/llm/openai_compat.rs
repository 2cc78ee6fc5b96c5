//! OpenAI-compatible provider for Groq, Together, OpenRouter and similar services
//!
//! Many providers offer OpenAI-compatible APIs with different base URLs.

use super::errors::AiError;
use super::traits::CompletionProvider;
use super::types::{CompletionOptions, CompletionResponse, Message, Prompt};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Connection settings for one OpenAI-compatible endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiCompatConfig {
    pub provider: String,
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    pub timeout_secs: u64,
    pub auth_header: String,
    pub auth_prefix: String,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
            auth_header: "Authorization".to_string(),
            auth_prefix: "Bearer".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

/// OpenAI-compatible provider that can work with multiple services
pub struct OpenAiCompatProvider {
    client: Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatProvider {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AiError::config(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn api_key(&self) -> Result<String, AiError> {
        std::env::var(&self.config.api_key_env).map_err(|_| {
            AiError::auth(format!(
                "{} API key not found in ${}",
                self.config.provider, self.config.api_key_env
            ))
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn is_available(&self) -> bool {
        std::env::var(&self.config.api_key_env).is_ok()
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, AiError> {
        let api_key = self.api_key()?;
        let model = options.model.as_deref().unwrap_or(&self.config.model);

        let request = ChatCompletionRequest {
            model,
            messages: &prompt.messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let mut req = self.client.post(self.endpoint());
        if self.config.auth_prefix.is_empty() {
            req = req.header(&self.config.auth_header, api_key);
        } else {
            req = req.header(&self.config.auth_header, format!("{} {}", self.config.auth_prefix, api_key));
        }

        debug!("Sending {} messages to {} ({})", prompt.messages.len(), self.config.provider, model);
        let response = req.json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AiError::auth(body),
                StatusCode::TOO_MANY_REQUESTS => AiError::rate_limit(body, None),
                _ => AiError::api(status.as_u16(), body),
            });
        }

        let result: ChatCompletionResponse = response.json().await?;
        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::empty_response(&self.config.provider))?;

        Ok(CompletionResponse {
            tokens_used: result.usage.map(|u| u.total_tokens).unwrap_or(0),
            confidence: None,
            model: result.model.unwrap_or_else(|| model.to_string()),
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_base_url() {
        let provider = OpenAiCompatProvider::new(OpenAiCompatConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_request_serialization() {
        let prompt = Prompt::new("system").user("hello");
        let request = ChatCompletionRequest {
            model: "m",
            messages: &prompt.messages,
            temperature: Some(0.2),
            max_tokens: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"model": "m-1", "choices": [{"message": {"role": "assistant", "content": "hi"}}],
                       "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.usage.map(|u| u.total_tokens), Some(4));
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_auth_error() {
        let provider = OpenAiCompatProvider::new(OpenAiCompatConfig {
            api_key_env: "DOCWEAVE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(!provider.is_available().await);
        let result = provider.complete(&Prompt::new("s").user("u"), &CompletionOptions::default()).await;
        assert!(matches!(result, Err(AiError::AuthenticationError { .. })));
    }
}
