//! Common types for text-completion providers

use serde::{Deserialize, Serialize};

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A fully built prompt: system message, few-shot pairs, then the request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub messages: Vec<Message>,
}

impl Prompt {
    pub fn new(system: impl Into<String>) -> Self {
        Self { messages: vec![Message::system(system)] }
    }

    pub fn example(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.messages.push(Message::user(before));
        self.messages.push(Message::assistant(after));
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::user(content));
        self
    }

    /// The final user request
    pub fn request(&self) -> Option<&str> {
        self.messages.iter().rev().find(|m| m.role == Role::User).map(|m| m.content.as_str())
    }

    /// Rough size used for token estimates when a provider reports none
    pub fn char_len(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// Options for completion requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self { model: None, temperature: Some(0.2), max_tokens: Some(4096) }
    }
}

/// Raw provider answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub tokens_used: u32,
    /// Provider-reported confidence, if the provider has one
    pub confidence: Option<f32>,
    pub model: String,
}

impl CompletionResponse {
    pub fn new(text: impl Into<String>, tokens_used: u32) -> Self {
        Self { text: text.into(), tokens_used, confidence: None, model: String::new() }
    }
}

/// Normalized result of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u32,
    pub confidence: f32,
    /// Name of the provider that produced the text
    pub provider: String,
    pub used_fallback: bool,
}

/// Rough token estimate, four characters per token
pub fn estimate_tokens(chars: usize) -> u32 {
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}
