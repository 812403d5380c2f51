//! Retry and fallback loop around a single upstream request.
//!
//! Each attempt re-runs model selection, so a cooldown armed by one attempt
//! is honoured by the next. Quota errors count toward the failing model's
//! cooldown; other errors are only recorded unless configured otherwise.
//!
//! With the default limits a single request makes at most two attempts while
//! cooldown needs three counted failures, so cooldowns build up across
//! separate requests rather than within one.

use parple_abstraction::{Model, ModelError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::metrics::MetricsRecorder;
use crate::prompt::Assistant;
use crate::selector::{ModelSelector, Selection, SelectionRole};
use crate::tracker::ModelTracker;

/// Substrings that mark an upstream error as quota or rate-limit related.
pub const QUOTA_KEYWORDS: [&str; 4] = ["quota", "rate limit", "resource exhausted", "429"];

/// Whether an error message describes a quota or rate-limit failure.
///
/// Matching ignores case and treats `_` as a space, so `RESOURCE_EXHAUSTED`
/// matches `resource exhausted`.
#[must_use]
pub fn is_quota_error(message: &str) -> bool {
    let normalized = message.to_lowercase().replace('_', " ");
    QUOTA_KEYWORDS.iter().any(|keyword| normalized.contains(keyword))
}

/// Why a request ended without a model answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradeReason {
    /// The last attempt hit a quota or rate limit.
    QuotaExhausted { model: String, message: String },
    /// The last attempt failed for another reason.
    UpstreamFailure { model: String, message: String },
    /// The request never reached a model.
    Internal { message: String },
}

impl DegradeReason {
    /// Human-readable summary for logs and status output.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::QuotaExhausted { message, .. }
            | Self::UpstreamFailure { message, .. }
            | Self::Internal { message } => message,
        }
    }
}

/// Result of one dispatched request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A model produced the text.
    Answered {
        text: String,
        model: String,
        used_fallback: bool,
        attempts: u32,
    },
    /// Every attempt failed; `text` is the caller's apology string.
    Degraded { text: String, reason: DegradeReason },
}

impl DispatchOutcome {
    /// Text to show the user, whichever way the request ended.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Answered { text, .. } | Self::Degraded { text, .. } => text,
        }
    }

    /// Consumes the outcome, keeping only the text.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Answered { text, .. } | Self::Degraded { text, .. } => text,
        }
    }

    /// True when the text is an apology rather than a model answer.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Runs requests against the primary/fallback pair with bounded retries.
pub struct Orchestrator {
    config: DispatchConfig,
    selector: ModelSelector,
    primary: Arc<dyn Model>,
    fallback: Arc<dyn Model>,
    tracker: Arc<ModelTracker>,
    metrics: Arc<MetricsRecorder>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("primary", &self.selector.primary())
            .field("fallback", &self.selector.fallback())
            .field("max_retries", &self.config.max_retries)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator.
    ///
    /// `primary` and `fallback` serve the models named by
    /// `config.primary_model` and `config.fallback_model`.
    #[must_use]
    pub fn new(
        config: DispatchConfig,
        primary: Arc<dyn Model>,
        fallback: Arc<dyn Model>,
        tracker: Arc<ModelTracker>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let selector = ModelSelector::new(config.primary_model.clone(), config.fallback_model.clone());
        Self { config, selector, primary, fallback, tracker, metrics }
    }

    /// The selector used for every attempt.
    #[must_use]
    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    /// Sends `prompt` on behalf of `assistant`, retrying and falling back as needed.
    ///
    /// Never fails: when every attempt errors the outcome is
    /// [`DispatchOutcome::Degraded`] carrying the assistant's apology text.
    pub async fn generate(&self, prompt: &str, assistant: Assistant) -> DispatchOutcome {
        let started = Instant::now();
        let prompt = assistant.wrap(prompt);
        let max_attempts = self.config.max_retries.max(1);

        let mut last_failure: Option<(Selection, ModelError, bool)> = None;

        for attempt in 0..max_attempts {
            let selection = self.selector.select(&self.tracker);
            let used_fallback = selection.is_fallback();
            let model = self.handle_for(&selection);

            debug!(
                assistant = %assistant,
                attempt = attempt + 1,
                max_attempts,
                model = %selection.model,
                role = ?selection.role,
                "Dispatching attempt"
            );

            match model.generate_text(&prompt, None).await {
                Ok(response) => {
                    if let Err(err) = self.tracker.mark_success(&selection.model) {
                        warn!(model = %selection.model, error = %err, "Could not record success");
                    }
                    let elapsed = started.elapsed();
                    self.metrics.track_request(true, elapsed, used_fallback, false);

                    info!(
                        assistant = %assistant,
                        model = %selection.model,
                        used_fallback,
                        attempts = attempt + 1,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Request answered"
                    );
                    return DispatchOutcome::Answered {
                        text: response.content,
                        model: selection.model,
                        used_fallback,
                        attempts: attempt + 1,
                    };
                }
                Err(err) => {
                    let message = err.message();
                    let quota = err.is_quota_exceeded() || is_quota_error(&message);
                    self.record_failure(&selection, &message, quota);

                    if attempt + 1 < max_attempts {
                        let backoff = self.config.backoff_for(attempt);
                        debug!(backoff_ms = backoff.as_millis() as u64, "Backing off before retry");
                        tokio::time::sleep(backoff).await;
                    }
                    last_failure = Some((selection, err, quota));
                }
            }
        }

        self.degrade(assistant, started.elapsed(), last_failure)
    }

    fn handle_for(&self, selection: &Selection) -> &Arc<dyn Model> {
        match selection.role {
            SelectionRole::Fallback => &self.fallback,
            SelectionRole::Primary | SelectionRole::LastResort => &self.primary,
        }
    }

    fn record_failure(&self, selection: &Selection, message: &str, quota: bool) {
        let result = if quota || self.config.count_transient_failures {
            self.tracker.mark_failed(&selection.model, message).map(|status| {
                if quota {
                    warn!(
                        model = %selection.model,
                        error_count = status.error_count,
                        error = %message,
                        "Quota error, switching models for the next attempt"
                    );
                } else {
                    warn!(model = %selection.model, error = %message, "Model request failed");
                }
            })
        } else {
            warn!(model = %selection.model, error = %message, "Model request failed");
            self.tracker.record_error(&selection.model, message)
        };

        if let Err(err) = result {
            warn!(model = %selection.model, error = %err, "Could not record failure");
        }
    }

    fn degrade(
        &self,
        assistant: Assistant,
        elapsed: Duration,
        last_failure: Option<(Selection, ModelError, bool)>,
    ) -> DispatchOutcome {
        let (reason, used_fallback, quota) = match last_failure {
            Some((selection, err, true)) => (
                DegradeReason::QuotaExhausted { model: selection.model.clone(), message: err.message() },
                selection.is_fallback(),
                true,
            ),
            Some((selection, err, false)) => (
                DegradeReason::UpstreamFailure { model: selection.model.clone(), message: err.message() },
                selection.is_fallback(),
                false,
            ),
            None => (DegradeReason::Internal { message: "no attempts were made".to_string() }, false, false),
        };

        self.metrics.track_request(false, elapsed, used_fallback, quota);
        warn!(
            assistant = %assistant,
            reason = %reason.message(),
            "All attempts failed, returning fallback response"
        );

        DispatchOutcome::Degraded { text: assistant.fallback_text().to_string(), reason }
    }
}
