//! The dispatch context handed to request handlers.
//!
//! A [`DispatchService`] owns one queue, one tracker and one metrics recorder.
//! Build it once at startup and share it (it is cheap to clone); separate
//! services never share state.

use parple_abstraction::Model;
use parple_models::{ModelConfig, ModelFactory, ModelType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::DispatchConfig;
use crate::error::Result;
use crate::events::{DispatchEvent, EventBus};
use crate::metrics::{MetricsRecorder, MetricsReport, OptimizationMetrics};
use crate::orchestrator::{DegradeReason, DispatchOutcome, Orchestrator};
use crate::prompt::Assistant;
use crate::queue::RequestQueue;
use crate::tracker::{ModelStatusSnapshot, ModelTracker};

/// Snapshot for monitoring clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Per-model state, primary first.
    pub models: Vec<ModelStatusSnapshot>,
    /// Requests waiting behind the one in flight.
    pub queue_length: usize,
    /// Whether the queue is draining.
    pub is_processing: bool,
    /// Active limits.
    pub config: DispatchConfig,
}

/// Rate-limited, fault-tolerant front door to the upstream models.
#[derive(Debug, Clone)]
pub struct DispatchService {
    config: DispatchConfig,
    orchestrator: Arc<Orchestrator>,
    queue: RequestQueue<DispatchOutcome>,
    tracker: Arc<ModelTracker>,
    metrics: Arc<MetricsRecorder>,
    events: EventBus,
}

impl DispatchService {
    /// Creates a service over explicit model handles.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` fails validation.
    pub fn new(config: DispatchConfig, primary: Arc<dyn Model>, fallback: Arc<dyn Model>) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new();
        let tracker = Arc::new(ModelTracker::new(
            [config.primary_model.clone(), config.fallback_model.clone()],
            config.error_threshold,
            config.cooldown(),
            events.clone(),
        ));
        let metrics = Arc::new(MetricsRecorder::new(events.clone()));
        let queue = RequestQueue::new(config.rate_limit_delay(), events.clone());
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            primary,
            fallback,
            Arc::clone(&tracker),
            Arc::clone(&metrics),
        ));

        info!(
            primary = %config.primary_model,
            fallback = %config.fallback_model,
            max_retries = config.max_retries,
            rate_limit_delay_ms = config.rate_limit_delay_ms,
            "Dispatch service ready"
        );

        Ok(Self { config, orchestrator, queue, tracker, metrics, events })
    }

    /// Creates a service whose models come from [`ModelFactory`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a model cannot be
    /// created (for Gemini, when `GEMINI_API_KEY` is unset).
    pub fn from_factory(config: DispatchConfig, model_type: ModelType) -> Result<Self> {
        let primary = ModelFactory::create(ModelConfig::new(model_type, config.primary_model.clone()))?;
        let fallback = ModelFactory::create(ModelConfig::new(model_type, config.fallback_model.clone()))?;
        Self::new(config, primary, fallback)
    }

    /// Answers a study question. Never fails.
    pub async fn generate_response(&self, user_message: &str) -> String {
        self.generate_response_outcome(user_message).await.into_text()
    }

    /// Answers a study question, reporting whether the answer is degraded.
    pub async fn generate_response_outcome(&self, user_message: &str) -> DispatchOutcome {
        self.dispatch(user_message, Assistant::Study).await
    }

    /// Produces a companion reply for a prepared persona prompt. Never fails.
    pub async fn generate_companion_response(&self, prompt: &str) -> String {
        self.generate_companion_response_outcome(prompt).await.into_text()
    }

    /// Produces a companion reply, reporting whether it is degraded.
    pub async fn generate_companion_response_outcome(&self, prompt: &str) -> DispatchOutcome {
        self.dispatch(prompt, Assistant::Companion).await
    }

    async fn dispatch(&self, prompt: &str, assistant: Assistant) -> DispatchOutcome {
        let orchestrator = Arc::clone(&self.orchestrator);
        let prompt = prompt.to_string();
        let ticket = self.queue.enqueue(async move { Ok(orchestrator.generate(&prompt, assistant).await) });

        match ticket.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(assistant = %assistant, error = %err, "Request did not complete");
                self.metrics.track_request(false, Duration::ZERO, false, false);
                DispatchOutcome::Degraded {
                    text: assistant.fallback_text().to_string(),
                    reason: DegradeReason::Internal { message: err.to_string() },
                }
            }
        }
    }

    /// Current model, queue and config state.
    pub fn get_model_status(&self) -> ServiceStatus {
        ServiceStatus {
            models: self.tracker.snapshot(),
            queue_length: self.queue.len(),
            is_processing: self.queue.is_processing(),
            config: self.config.clone(),
        }
    }

    /// Clears error and cooldown state for one model, or all when `None`.
    pub fn reset_model_status(&self, model: Option<&str>) {
        self.tracker.reset(model);
    }

    /// Model the next attempt would go to.
    pub fn get_current_model(&self) -> String {
        self.orchestrator.selector().select(&self.tracker).model
    }

    /// Raw request counters.
    pub fn get_optimization_metrics(&self) -> OptimizationMetrics {
        self.metrics.snapshot()
    }

    /// Rates and recommendations derived from the current counters.
    pub fn get_metrics_report(&self) -> MetricsReport {
        MetricsReport::from_metrics(&self.metrics.snapshot())
    }

    /// Zeroes the request counters.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Subscribes to state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Active configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }
}
