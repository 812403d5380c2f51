//! Live event printing for `--events`.

use colored::Colorize;
use parple_dispatch::{DispatchEvent, DispatchService};
use tokio::sync::broadcast::error::RecvError;

/// Spawns a task that prints every dispatcher event to stderr.
pub fn spawn_printer(service: &DispatchService) {
    let mut events = service.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => eprintln!("{} {}", "event".dimmed(), describe(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("{} skipped {} events", "event".dimmed(), skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn describe(event: &DispatchEvent) -> String {
    match event {
        DispatchEvent::ModelSucceeded { model } => format!("{} answered", model),
        DispatchEvent::ModelFailed { model, error_count, message } => {
            format!("{} failed ({} errors): {}", model, error_count, message).red().to_string()
        }
        DispatchEvent::CooldownStarted { model, cooldown_ms } => {
            format!("{} cooling down for {} s", model, cooldown_ms / 1000).yellow().to_string()
        }
        DispatchEvent::ModelReset { model } => format!("{} reset", model),
        DispatchEvent::QueueDepthChanged { depth, processing } => {
            format!("queue depth {} (processing: {})", depth, processing)
        }
        DispatchEvent::MetricsUpdated { metrics } => format!(
            "metrics {} total, {} ok, {} failed",
            metrics.total_requests, metrics.successful_requests, metrics.failed_requests
        ),
        DispatchEvent::MetricsReset => "metrics reset".to_string(),
    }
}
