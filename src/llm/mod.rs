//! Black-box text-completion seam.
//!
//! Everything that needs generated text (turn dialogue, distillation,
//! diagnostic summaries) talks to a [`TextCompletion`] implementation; the
//! real provider lives behind this trait and never leaks into the engines.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<String>;
}

#[async_trait]
impl<T: TextCompletion + ?Sized> TextCompletion for Arc<T> {
    async fn complete(&self, req: CompletionRequest) -> Result<String> {
        (**self).complete(req).await
    }
}

/// Which completion backend to construct. The real provider is configured
/// out of band; tests and dry runs use the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompletionProvider {
    #[default]
    Mock,
    Scripted,
}

/// Fixed-response completion for dry runs.
pub struct MockCompletion {
    response: String,
}

impl MockCompletion {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::new("(no comment)")
    }
}

#[async_trait]
impl TextCompletion for MockCompletion {
    async fn complete(&self, _req: CompletionRequest) -> Result<String> {
        Ok(self.response.clone())
    }
}

/// Queue of canned responses, consumed in order. Running past the end of
/// the script is an error so tests fail loudly.
#[derive(Default)]
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedCompletion {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses.lock().push_back(response.into());
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl TextCompletion for ScriptedCompletion {
    async fn complete(&self, _req: CompletionRequest) -> Result<String> {
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| FleetError::completion("scripted completion exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_yields_in_order_then_errors() {
        let llm = ScriptedCompletion::new(["first", "second"]);
        let req = CompletionRequest::new("sys", "user");
        assert_eq!(llm.complete(req.clone()).await.unwrap(), "first");
        assert_eq!(llm.complete(req.clone()).await.unwrap(), "second");
        assert!(llm.complete(req).await.is_err());
    }

    #[tokio::test]
    async fn test_arc_blanket_impl() {
        let llm: Arc<dyn TextCompletion> = Arc::new(MockCompletion::new("hi"));
        let out = llm
            .complete(CompletionRequest::new("sys", "user"))
            .await
            .unwrap();
        assert_eq!(out, "hi");
    }
}
