//! Text-completion integration
//!
//! Providers implement the single [`CompletionProvider`] capability; the
//! [`AiInvoker`] applies the primary/fallback policy on top.

pub mod errors;
pub mod invoker;
pub mod openai_compat;
pub mod prompts;
pub mod traits;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use errors::{AiError, AiResult};
pub use invoker::{AiInvoker, normalize_response};
pub use openai_compat::{OpenAiCompatConfig, OpenAiCompatProvider};
pub use prompts::{PreparedInstruction, PromptTemplates};
pub use traits::CompletionProvider;
pub use types::{Completion, CompletionOptions, CompletionResponse, Message, Prompt, Role};
