//! Per-model availability tracking.
//!
//! Each configured model carries an error counter and an optional cooldown
//! deadline. Reaching the error threshold arms the cooldown and zeroes the
//! counter, so the next cooldown needs a full new run of failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, Result};
use crate::events::{DispatchEvent, EventBus};

/// Live state of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStatus {
    /// Nominal flag. Cooldown is the actual selection gate.
    pub is_available: bool,
    /// Failures since the last success or the last cooldown.
    pub error_count: u32,
    /// Last successful completion.
    pub last_used: Option<DateTime<Utc>>,
    /// Most recent failure message.
    pub last_error: Option<String>,
    /// Model is skipped by normal selection until this instant.
    pub cooldown_until: Option<Instant>,
}

impl ModelStatus {
    fn fresh() -> Self {
        Self { is_available: true, error_count: 0, last_used: None, last_error: None, cooldown_until: None }
    }

    /// Whether the cooldown deadline is still ahead of `now`.
    #[must_use]
    pub fn in_cooldown_at(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

/// Serializable view of a [`ModelStatus`] for monitoring clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatusSnapshot {
    pub model: String,
    pub is_available: bool,
    pub error_count: u32,
    pub last_used: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub in_cooldown: bool,
    /// Zero when the model is not cooling down.
    pub cooldown_remaining_ms: u64,
}

/// Tracks error counts and cooldowns for a fixed set of models.
#[derive(Debug)]
pub struct ModelTracker {
    models: Mutex<Vec<(String, ModelStatus)>>,
    error_threshold: u32,
    cooldown: Duration,
    events: EventBus,
}

impl ModelTracker {
    /// Creates a tracker for `model_names`, in the order given.
    #[must_use]
    pub fn new<I, S>(model_names: I, error_threshold: u32, cooldown: Duration, events: EventBus) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let models = model_names.into_iter().map(|name| (name.into(), ModelStatus::fresh())).collect();
        Self { models: Mutex::new(models), error_threshold, cooldown, events }
    }

    /// Records a successful completion on `model`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownModel`] if the model is not tracked.
    pub fn mark_success(&self, model: &str) -> Result<()> {
        self.with_status(model, |status| {
            status.error_count = 0;
            status.last_used = Some(Utc::now());
            status.last_error = None;
            status.cooldown_until = None;
        })?;

        debug!(model = %model, "Model marked successful");
        self.events.emit(DispatchEvent::ModelSucceeded { model: model.to_string() });
        Ok(())
    }

    /// Counts a failure against `model` and arms its cooldown at the threshold.
    ///
    /// Returns the status after the update.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownModel`] if the model is not tracked.
    pub fn mark_failed(&self, model: &str, message: &str) -> Result<ModelStatus> {
        let threshold = self.error_threshold;
        let cooldown = self.cooldown;

        let (status, error_count, tripped) = self.with_status(model, |status| {
            status.error_count += 1;
            status.last_error = Some(message.to_string());
            let error_count = status.error_count;
            let tripped = error_count >= threshold;
            if tripped {
                status.cooldown_until = Some(Instant::now() + cooldown);
                status.error_count = 0;
            }
            (status.clone(), error_count, tripped)
        })?;

        debug!(model = %model, error_count, threshold, "Model failure recorded");
        self.events.emit(DispatchEvent::ModelFailed {
            model: model.to_string(),
            error_count,
            message: message.to_string(),
        });

        if tripped {
            let cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
            warn!(model = %model, cooldown_ms, "Model entered cooldown after repeated failures");
            self.events.emit(DispatchEvent::CooldownStarted { model: model.to_string(), cooldown_ms });
        }

        Ok(status)
    }

    /// Stores `message` as the latest error without touching the counter.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownModel`] if the model is not tracked.
    pub fn record_error(&self, model: &str, message: &str) -> Result<()> {
        self.with_status(model, |status| status.last_error = Some(message.to_string()))
    }

    /// Whether `model` may be picked by normal selection right now.
    ///
    /// Untracked models are never eligible.
    pub fn is_eligible(&self, model: &str) -> bool {
        let now = Instant::now();
        self.lock().iter().find(|(name, _)| name == model).is_some_and(|(_, status)| !status.in_cooldown_at(now))
    }

    /// Current status of one model.
    pub fn status(&self, model: &str) -> Option<ModelStatus> {
        self.lock().iter().find(|(name, _)| name == model).map(|(_, status)| status.clone())
    }

    /// Snapshot of every tracked model, in configured order.
    pub fn snapshot(&self) -> Vec<ModelStatusSnapshot> {
        let now = Instant::now();
        self.lock()
            .iter()
            .map(|(name, status)| {
                let remaining = status.cooldown_until.map_or(Duration::ZERO, |until| until.saturating_duration_since(now));
                ModelStatusSnapshot {
                    model: name.clone(),
                    is_available: status.is_available,
                    error_count: status.error_count,
                    last_used: status.last_used,
                    last_error: status.last_error.clone(),
                    in_cooldown: status.in_cooldown_at(now),
                    cooldown_remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                }
            })
            .collect()
    }

    /// Restores one model, or every model when `model` is `None`, to a fresh state.
    ///
    /// Unknown names are logged and ignored.
    pub fn reset(&self, model: Option<&str>) {
        let reset: Vec<String> = {
            let mut models = self.lock();
            models
                .iter_mut()
                .filter(|(name, _)| model.is_none_or(|wanted| wanted == name))
                .map(|(name, status)| {
                    *status = ModelStatus::fresh();
                    name.clone()
                })
                .collect()
        };

        if reset.is_empty() {
            if let Some(name) = model {
                warn!(model = %name, "Ignoring reset for unknown model");
            }
            return;
        }

        info!(models = ?reset, "Reset model status");
        for name in reset {
            self.events.emit(DispatchEvent::ModelReset { model: name });
        }
    }

    fn with_status<R>(&self, model: &str, f: impl FnOnce(&mut ModelStatus) -> R) -> Result<R> {
        let mut models = self.lock();
        let (_, status) = models
            .iter_mut()
            .find(|(name, _)| name == model)
            .ok_or_else(|| DispatchError::UnknownModel(model.to_string()))?;
        Ok(f(status))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, ModelStatus)>> {
        self.models.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
