//! Deterministic model double.
//!
//! `ScriptedModel` replays a queue of prepared outcomes, then falls back to a
//! default. It backs the offline CLI mode and the dispatch tests, where the
//! upstream has to fail or succeed on cue.

use async_trait::async_trait;
use parple_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// What the model does once its script has run out.
#[derive(Debug, Clone)]
pub enum DefaultBehavior {
    /// Echo the prompt back with the model ID.
    Echo,
    /// Always return this text.
    Reply(String),
    /// Always fail with this error.
    Fail(ModelError),
}

#[derive(Debug, Default)]
struct ScriptState {
    outcomes: VecDeque<Result<String, ModelError>>,
    prompts: Vec<String>,
}

/// A model that returns pre-scripted outcomes in order.
#[derive(Debug)]
pub struct ScriptedModel {
    id: String,
    state: Mutex<ScriptState>,
    default: DefaultBehavior,
}

impl ScriptedModel {
    /// Creates a model that echoes every prompt.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), state: Mutex::new(ScriptState::default()), default: DefaultBehavior::Echo }
    }

    /// Creates a model that always answers with `text`.
    #[must_use]
    pub fn replying(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id).with_default(DefaultBehavior::Reply(text.into()))
    }

    /// Creates a model that always fails with `error`.
    #[must_use]
    pub fn failing(id: impl Into<String>, error: ModelError) -> Self {
        Self::new(id).with_default(DefaultBehavior::Fail(error))
    }

    /// Replaces the behaviour used after the script is exhausted.
    #[must_use]
    pub fn with_default(mut self, default: DefaultBehavior) -> Self {
        self.default = default;
        self
    }

    /// Queues a successful reply.
    #[must_use]
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.lock().outcomes.push_back(Ok(text.into()));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn then_fail(self, error: ModelError) -> Self {
        self.lock().outcomes.push_back(Err(error));
        self
    }

    /// Number of generation calls received so far.
    pub fn call_count(&self) -> usize {
        self.lock().prompts.len()
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_outcome(&self, prompt: &str) -> Result<String, ModelError> {
        let scripted = {
            let mut state = self.lock();
            state.prompts.push(prompt.to_string());
            state.outcomes.pop_front()
        };

        scripted.unwrap_or_else(|| match &self.default {
            DefaultBehavior::Echo => Ok(format!("[{}] {}", self.id, prompt)),
            DefaultBehavior::Reply(text) => Ok(text.clone()),
            DefaultBehavior::Fail(error) => Err(error.clone()),
        })
    }
}

#[async_trait]
impl Model for ScriptedModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(model_id = %self.id, prompt_len = prompt.len(), parameters = ?parameters, "ScriptedModel generating text");

        let content = self.next_outcome(prompt)?;
        let prompt_tokens = count_tokens(prompt);
        let completion_tokens = count_tokens(&content);

        Ok(ModelResponse {
            content,
            model_id: Some(self.id.clone()),
            usage: Some(ModelUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let transcript = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.generate_text(&transcript, parameters).await
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Count tokens in a string (simplified: word count).
fn count_tokens(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}
