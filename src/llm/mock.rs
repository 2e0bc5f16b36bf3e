//! Scripted language model for tests and offline runs.

use super::{CompletionRequest, CompletionResponse, LanguageModel, DEFAULT_CONTEXT_WINDOW};
use crate::error::LlmError;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

type Responder =
    dyn Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync;

/// A model whose answers come from a caller-supplied closure.
///
/// Every request is recorded so tests can inspect what was sent.
pub struct MockLanguageModel {
    responder: Box<Responder>,
    requests: Mutex<Vec<CompletionRequest>>,
    context_window: usize,
    latency: Option<Duration>,
}

impl MockLanguageModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            context_window: DEFAULT_CONTEXT_WINDOW,
            latency: None,
        }
    }

    /// Always answers with `text` and no tool calls.
    pub fn with_text(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(CompletionResponse::text(text.clone()).with_usage(100, 50)))
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    /// Simulated per-call latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let response = (self.responder)(&request);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        response
    }

    fn context_window(&self, _model_id: &str) -> usize {
        self.context_window
    }
}
