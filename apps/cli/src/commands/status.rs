//! Status command implementation.

use colored::Colorize;
use parple_dispatch::{DispatchService, MetricsReport, ServiceStatus};
use serde_json::json;

/// Execute the status command.
///
/// Shows per-model cooldown state, queue state and the active limits.
pub fn execute(service: &DispatchService, json_output: bool) -> anyhow::Result<()> {
    let status = service.get_model_status();
    if json_output {
        let output = json!({
            "status": status,
            "current_model": service.get_current_model(),
            "metrics": service.get_metrics_report(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_status(&status, &service.get_current_model());
        println!();
        print_metrics(&service.get_metrics_report());
    }
    Ok(())
}

/// Prints the model and queue section.
pub fn print_status(status: &ServiceStatus, current_model: &str) {
    println!("{}", "Parple Dispatch Status".bold().cyan());
    println!();

    println!("{}", "Models:".bold());
    for model in &status.models {
        let state = if model.in_cooldown {
            format!("cooling down ({}s left)", model.cooldown_remaining_ms.div_ceil(1000)).yellow()
        } else {
            "available".green()
        };
        let marker = if model.model == current_model { "*" } else { " " };
        println!("  {} {} - {}", marker, model.model.bold(), state);
        println!("      Errors: {}", model.error_count);
        if let Some(last_used) = model.last_used {
            println!("      Last used: {}", last_used.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        if let Some(error) = &model.last_error {
            println!("      Last error: {}", error.dimmed());
        }
    }
    println!();

    println!("{}", "Queue:".bold());
    println!("  Waiting: {}", status.queue_length);
    println!("  Processing: {}", if status.is_processing { "yes".green() } else { "no".dimmed() });
    println!();

    let config = &status.config;
    println!("{}", "Limits:".bold());
    println!("  Max attempts: {}", config.max_retries);
    println!("  Request delay: {} ms", config.rate_limit_delay_ms);
    println!("  Cooldown: {} after {} failures", format_ms(config.cooldown_ms), config.error_threshold);
}

/// Prints request counters and recommendations.
pub fn print_metrics(report: &MetricsReport) {
    let metrics = &report.metrics;
    println!("{}", "Requests:".bold());
    println!(
        "  Total: {} ({} ok, {} failed)",
        metrics.total_requests, metrics.successful_requests, metrics.failed_requests
    );
    println!("  Success rate: {:.1}%", report.success_rate * 100.0);
    println!("  Fallback used: {} ({:.1}%)", metrics.fallback_usage, report.fallback_rate * 100.0);
    println!("  Quota errors: {}", metrics.quota_errors);
    println!("  Avg response: {:.0} ms", metrics.average_response_time_ms);
    for recommendation in &report.recommendations {
        println!("  {} {}", "→".cyan(), recommendation);
    }
}

fn format_ms(ms: u64) -> String {
    if ms % 60_000 == 0 {
        format!("{} min", ms / 60_000)
    } else if ms % 1000 == 0 {
        format!("{} s", ms / 1000)
    } else {
        format!("{} ms", ms)
    }
}
