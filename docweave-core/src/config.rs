//! Engine configuration
//!
//! Loaded from TOML. Every section has defaults, so a file only needs the
//! values it changes.

use crate::document::ChangeTracker;
use crate::execution::{ExecutionMode, Orchestrator, OrchestratorConfig};
use crate::integration::ApplyOptions;
use crate::llm::{AiError, AiInvoker, CompletionOptions, OpenAiCompatConfig, OpenAiCompatProvider};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Main configuration for the instruction engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub execution: ExecutionSettings,
    pub ai: AiSettings,
    pub changes: ChangeSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub mode: ExecutionMode,
    pub stop_on_error: bool,
    /// Concurrent model calls in parallel mode
    pub max_concurrency: usize,
    pub max_depth: u32,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        Self {
            mode: ExecutionMode::Sequential,
            stop_on_error: false,
            max_concurrency: orchestrator.max_concurrency,
            max_depth: orchestrator.max_depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// Per-call timeout; a timeout counts as a provider failure
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: usize,
    pub primary: OpenAiCompatConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<OpenAiCompatConfig>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            temperature: 0.2,
            max_tokens: 4096,
            primary: OpenAiCompatConfig::default(),
            fallback: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeSettings {
    /// Longest excerpt kept in a change record
    pub excerpt_chars: usize,
    /// Confidence attached to coarse document diffs
    pub confidence: f32,
}

impl Default for ChangeSettings {
    fn default() -> Self {
        Self { excerpt_chars: 500, confidence: 0.9 }
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: None,
            temperature: Some(self.ai.temperature),
            max_tokens: Some(self.ai.max_tokens),
        }
    }

    /// Invoker over the configured HTTP providers
    pub fn build_invoker(&self) -> Result<AiInvoker, AiError> {
        let primary = OpenAiCompatProvider::new(self.ai.primary.clone())?;
        let mut invoker = AiInvoker::new(Arc::new(primary))
            .with_timeout(Duration::from_secs(self.ai.timeout_secs.max(1)))
            .with_options(self.completion_options());

        if let Some(fallback) = &self.ai.fallback {
            invoker = invoker.with_fallback(Arc::new(OpenAiCompatProvider::new(fallback.clone())?));
        }
        Ok(invoker)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrency: self.execution.max_concurrency.max(1),
            max_depth: self.execution.max_depth,
        }
    }

    pub fn tracker(&self) -> ChangeTracker {
        ChangeTracker::new(self.changes.excerpt_chars, self.changes.confidence)
    }

    /// Orchestrator configured from these settings around `invoker`
    pub fn orchestrator(&self, invoker: AiInvoker) -> Orchestrator {
        Orchestrator::new(invoker)
            .with_config(self.orchestrator_config())
            .with_tracker(self.tracker())
    }

    /// Request options carrying the configured execution defaults
    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions::default()
            .with_mode(self.execution.mode)
            .stop_on_error(self.execution.stop_on_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docweave.toml");
        std::fs::write(
            &path,
            r#"
[execution]
mode = "parallel"
max_concurrency = 2

[ai.fallback]
provider = "groq"
base_url = "https://api.groq.com/openai/v1"
api_key_env = "GROQ_API_KEY"
model = "llama-3.1-8b-instant"
timeout_secs = 30
auth_header = "Authorization"
auth_prefix = "Bearer"
"#,
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.execution.mode, ExecutionMode::Parallel);
        assert_eq!(config.execution.max_concurrency, 2);
        assert!(!config.execution.stop_on_error);
        assert_eq!(config.ai.primary, OpenAiCompatConfig::default());
        assert_eq!(config.ai.fallback.as_ref().map(|f| f.provider.as_str()), Some("groq"));
        assert_eq!(config.changes, ChangeSettings::default());

        let options = config.apply_options();
        assert_eq!(options.mode, ExecutionMode::Parallel);
        assert!(options.enabled);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docweave.toml");

        let mut config = EngineConfig::default();
        config.execution.stop_on_error = true;
        config.changes.excerpt_chars = 120;
        config.save(&path).unwrap();

        assert_eq!(EngineConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = EngineConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_build_invoker_with_fallback() {
        let mut config = EngineConfig::default();
        config.ai.fallback = Some(OpenAiCompatConfig { provider: "together".to_string(), ..Default::default() });

        let invoker = config.build_invoker().unwrap();
        assert_eq!(invoker.primary_name(), "openai");
        assert_eq!(invoker.fallback_name(), Some("together"));
        assert_eq!(config.orchestrator_config().max_concurrency, config.execution.max_concurrency);
    }
}
