//! Request metrics for the dispatcher.
//!
//! [`MetricsRecorder`] only accumulates raw counters. Rates and advice are
//! derived on demand by [`MetricsReport`], which holds no state of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::events::{DispatchEvent, EventBus};

/// Raw counters for completed requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    /// Requests that ran to completion, answered or not.
    pub total_requests: u64,
    /// Requests answered by a model.
    pub successful_requests: u64,
    /// Requests that exhausted every attempt.
    pub failed_requests: u64,
    /// Requests whose final attempt went to the fallback model.
    pub fallback_usage: u64,
    /// Failed requests whose last error was a quota error.
    pub quota_errors: u64,
    /// Running mean over successful requests, in milliseconds.
    pub average_response_time_ms: f64,
    /// When the counters were last started from zero.
    pub last_optimization_run: DateTime<Utc>,
}

impl OptimizationMetrics {
    fn empty() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            fallback_usage: 0,
            quota_errors: 0,
            average_response_time_ms: 0.0,
            last_optimization_run: Utc::now(),
        }
    }
}

/// Process-wide request counters.
#[derive(Debug)]
pub struct MetricsRecorder {
    metrics: Mutex<OptimizationMetrics>,
    events: EventBus,
}

impl MetricsRecorder {
    /// Creates a recorder with zeroed counters.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self { metrics: Mutex::new(OptimizationMetrics::empty()), events }
    }

    /// Records one finished request.
    ///
    /// The average only moves on success, using the incremental mean
    /// `(avg * (n - 1) + t) / n` where `n` counts successes.
    pub fn track_request(
        &self,
        success: bool,
        response_time: Duration,
        used_fallback: bool,
        was_quota_error: bool,
    ) {
        let snapshot = {
            let mut metrics = self.lock();
            metrics.total_requests += 1;

            if success {
                metrics.successful_requests += 1;
                let n = metrics.successful_requests as f64;
                let elapsed_ms = response_time.as_secs_f64() * 1000.0;
                metrics.average_response_time_ms =
                    metrics.average_response_time_ms.mul_add(n - 1.0, elapsed_ms) / n;
            } else {
                metrics.failed_requests += 1;
            }

            if used_fallback {
                metrics.fallback_usage += 1;
            }
            if was_quota_error {
                metrics.quota_errors += 1;
            }

            metrics.clone()
        };

        debug!(
            success,
            used_fallback,
            was_quota_error,
            response_time_ms = response_time.as_millis() as u64,
            total_requests = snapshot.total_requests,
            "Tracked request"
        );
        self.events.emit(DispatchEvent::MetricsUpdated { metrics: snapshot });
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> OptimizationMetrics {
        self.lock().clone()
    }

    /// Zeroes every counter and restarts the observation window.
    pub fn reset(&self) {
        *self.lock() = OptimizationMetrics::empty();
        debug!("Reset dispatch metrics");
        self.events.emit(DispatchEvent::MetricsReset);
    }

    fn lock(&self) -> MutexGuard<'_, OptimizationMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Derived view over [`OptimizationMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// The counters the report was computed from.
    pub metrics: OptimizationMetrics,
    /// Successful share of all requests (0.0-1.0).
    pub success_rate: f64,
    /// Share of requests that finished on the fallback model (0.0-1.0).
    pub fallback_rate: f64,
    /// Share of requests that ended in a quota error (0.0-1.0).
    pub quota_error_rate: f64,
    /// Operator-facing advice.
    pub recommendations: Vec<String>,
}

impl MetricsReport {
    /// Success rate below which the upstream is considered unhealthy.
    const MIN_SUCCESS_RATE: f64 = 0.9;
    /// Fallback share above which the primary is considered overloaded.
    const MAX_FALLBACK_RATE: f64 = 0.2;
    /// Quota error share that suggests the plan is too small.
    const MAX_QUOTA_ERROR_RATE: f64 = 0.1;
    /// Average latency considered slow for a chat UI.
    const SLOW_RESPONSE_MS: f64 = 5000.0;

    /// Computes rates and recommendations from a counter snapshot.
    #[must_use]
    pub fn from_metrics(metrics: &OptimizationMetrics) -> Self {
        let total = metrics.total_requests as f64;
        let rate = |count: u64| if metrics.total_requests == 0 { 0.0 } else { count as f64 / total };

        let success_rate = rate(metrics.successful_requests);
        let fallback_rate = rate(metrics.fallback_usage);
        let quota_error_rate = rate(metrics.quota_errors);

        let mut recommendations = Vec::new();
        if metrics.total_requests > 0 {
            if success_rate < Self::MIN_SUCCESS_RATE {
                recommendations.push(format!(
                    "Success rate is {:.0}%; check the upstream API key and model availability",
                    success_rate * 100.0
                ));
            }
            if fallback_rate > Self::MAX_FALLBACK_RATE {
                recommendations.push(format!(
                    "Fallback model served {:.0}% of requests; the primary model is frequently unavailable",
                    fallback_rate * 100.0
                ));
            }
            if quota_error_rate > Self::MAX_QUOTA_ERROR_RATE {
                recommendations.push(
                    "Quota errors are frequent; raise the API quota or increase the request delay"
                        .to_string(),
                );
            }
            if metrics.average_response_time_ms > Self::SLOW_RESPONSE_MS {
                recommendations.push(format!(
                    "Average response time is {:.0} ms; consider a faster primary model",
                    metrics.average_response_time_ms
                ));
            }
        }
        if recommendations.is_empty() {
            recommendations.push("Operating normally".to_string());
        }

        Self { metrics: metrics.clone(), success_rate, fallback_rate, quota_error_rate, recommendations }
    }
}
