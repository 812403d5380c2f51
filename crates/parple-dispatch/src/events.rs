//! Status events for monitoring clients.
//!
//! The tracker, queue and metrics recorder publish here whenever their state
//! changes, so a dashboard can follow along without re-reading snapshots on a
//! timer.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::metrics::OptimizationMetrics;

/// Capacity of the broadcast buffer; slow subscribers lag and skip.
const EVENT_BUFFER: usize = 100;

/// A change in dispatcher state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// A model answered successfully.
    ModelSucceeded {
        model: String,
    },

    /// A model failure was recorded against its error count.
    ModelFailed {
        model: String,
        error_count: u32,
        message: String,
    },

    /// A model hit its failure threshold and left rotation.
    CooldownStarted {
        model: String,
        cooldown_ms: u64,
    },

    /// An operator cleared a model's state.
    ModelReset {
        model: String,
    },

    /// The number of waiting requests changed.
    QueueDepthChanged {
        depth: usize,
        processing: bool,
    },

    /// Counters changed after a request finished.
    MetricsUpdated {
        metrics: OptimizationMetrics,
    },

    /// Counters were cleared.
    MetricsReset,
}

/// Fan-out channel for [`DispatchEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Subscribes to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn emit(&self, event: DispatchEvent) {
        trace!(event = ?event, "Dispatch event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
