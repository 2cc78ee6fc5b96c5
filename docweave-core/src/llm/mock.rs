//! Mock completion provider for testing
//!
//! Queued responses and errors are returned first-in first-out; when the queue
//! is empty an optional handler computes the answer from the prompt content.

#![cfg(test)]

use super::errors::AiError;
use super::prompts::PromptTemplates;
use super::traits::CompletionProvider;
use super::types::{CompletionOptions, CompletionResponse, Prompt};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = Arc<dyn Fn(&str) -> Result<String, AiError> + Send + Sync>;

/// Scripted provider
#[derive(Clone)]
pub struct MockCompletionProvider {
    name: String,
    model: String,
    queue: Arc<Mutex<VecDeque<Result<CompletionResponse, AiError>>>>,
    handler: Option<Handler>,
    call_history: Arc<Mutex<Vec<Prompt>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    delay: Option<Duration>,
    available: bool,
}

impl MockCompletionProvider {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: "mock-model".to_string(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            handler: None,
            call_history: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            delay: None,
            available: true,
        }
    }

    /// Answer every unscripted call by transforming the delimited content
    pub fn transforming<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let mut provider = Self::named(name);
        provider.handler = Some(Arc::new(move |content: &str| Ok(transform(content))));
        provider
    }

    /// Fail every unscripted call
    pub fn failing(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut provider = Self::named(name.clone());
        provider.handler = Some(Arc::new(move |_: &str| Err(AiError::provider(name.clone(), "scripted failure"))));
        provider
    }

    /// Decide per call from the delimited content
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) -> Result<String, AiError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn push_response(&self, response: CompletionResponse) {
        self.queue.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, error: AiError) {
        self.queue.lock().unwrap().push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.call_history.lock().unwrap().len()
    }

    pub fn call_history(&self) -> Vec<Prompt> {
        self.call_history.lock().unwrap().clone()
    }

    /// Most calls that were running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Delimited content of every request, in call order
    pub fn requested_contents(&self) -> Vec<String> {
        self.call_history()
            .iter()
            .filter_map(|p| p.request().and_then(PromptTemplates::extract_content).map(str::to_string))
            .collect()
    }
}

impl Default for MockCompletionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        _options: &CompletionOptions,
    ) -> Result<CompletionResponse, AiError> {
        self.call_history.lock().unwrap().push(prompt.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.queue.lock().unwrap().pop_front();
        if let Some(result) = scripted {
            return result;
        }

        let content = prompt.request().and_then(PromptTemplates::extract_content).unwrap_or_default();
        match &self.handler {
            Some(handler) => handler(content).map(|text| CompletionResponse {
                tokens_used: 10 + (content.len() as u32) / 4,
                model: self.model.clone(),
                confidence: None,
                text,
            }),
            None => Ok(CompletionResponse::new("Mock response", 10)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_handler() {
        let provider = MockCompletionProvider::transforming("upper", |c| c.to_uppercase());
        provider.push_error(AiError::network("down"));

        let prompt = Prompt::new("s").user(PromptTemplates::request("Shout", "hello", &[]));
        let options = CompletionOptions::default();

        assert!(provider.complete(&prompt, &options).await.is_err());
        let response = provider.complete(&prompt, &options).await.unwrap();
        assert_eq!(response.text, "HELLO");
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.requested_contents(), vec!["hello", "hello"]);
    }
}
