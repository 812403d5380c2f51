//! Ask command implementation.

use colored::Colorize;
use parple_dispatch::{DispatchOutcome, DispatchService};

/// Execute the ask command.
///
/// Sends one question to the study assistant and prints the answer. A
/// degraded answer is still printed; the reason goes to stderr.
pub async fn execute(
    service: &DispatchService,
    message: &str,
    json_output: bool,
    show_status: bool,
) -> anyhow::Result<()> {
    let outcome = service.generate_response_outcome(message).await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.text());
        if let DispatchOutcome::Degraded { reason, .. } = &outcome {
            eprintln!("{} {}", "fallback response:".yellow(), reason.message().dimmed());
        }
    }

    if show_status {
        println!();
        super::status::execute(service, json_output)?;
    }

    Ok(())
}
