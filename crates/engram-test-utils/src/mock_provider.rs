// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock completion provider for deterministic testing.
//!
//! `MockProvider` implements `CompletionProvider` with pre-configured
//! responses, enabling fast, CI-runnable tests without external API calls.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use engram_core::{AgentContext, CompletionProvider, EngramError, ProviderMessage};

/// A mock provider that returns pre-configured responses.
///
/// Responses are popped from a FIFO queue. When the queue is empty, a
/// default "mock response" text is returned. Every context it receives is
/// kept for assertions.
#[derive(Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<String>>,
    contexts: Mutex<Vec<AgentContext>>,
    failure: Mutex<Option<String>>,
    delay: Option<Duration>,
}

impl MockProvider {
    /// Create a new mock provider with an empty response queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock provider pre-loaded with the given responses.
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            ..Self::default()
        }
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add a response to the end of the queue.
    pub fn add_response(&self, text: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(text.into());
        }
    }

    /// Fail every following call with a provider error; `None` recovers.
    pub fn set_failure(&self, message: Option<&str>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = message.map(str::to_string);
        }
    }

    /// Contexts received so far, oldest first.
    pub fn contexts(&self) -> Vec<AgentContext> {
        self.contexts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn last_context(&self) -> Option<AgentContext> {
        self.contexts.lock().ok().and_then(|c| c.last().cloned())
    }

    pub fn call_count(&self) -> usize {
        self.contexts.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn next_response(&self) -> String {
        self.responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| "mock response".to_string())
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock-provider"
    }

    async fn complete(&self, context: AgentContext) -> Result<ProviderMessage, EngramError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push(context);
        }
        let failure = self.failure.lock().ok().and_then(|f| f.clone());
        if let Some(message) = failure {
            return Err(EngramError::Provider {
                message,
                source: None,
            });
        }
        Ok(ProviderMessage::assistant(self.next_response()))
    }
}
