//! Companion chat command implementation.

use colored::Colorize;
use parple_abstraction::ChatMessage;
use parple_dispatch::{DispatchService, Persona, build_companion_prompt};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Execute the companion command.
///
/// Runs a line-based chat loop over stdin until EOF or `/quit`.
pub async fn execute(service: &DispatchService, persona: &str) -> anyhow::Result<()> {
    let persona: Persona = persona.parse()?;
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", format!("Chatting with {}. Type /quit to leave.", persona).bold().cyan());

    loop {
        print!("{} ", "you>".bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(service, command) {
                break;
            }
            continue;
        }

        let prompt = build_companion_prompt(persona, &history, line);
        let outcome = service.generate_companion_response_outcome(&prompt).await;

        println!("{} {}", format!("{}:", persona).magenta().bold(), outcome.text());
        if outcome.is_degraded() {
            // Degraded replies are kept out of the history.
            continue;
        }

        history.push(ChatMessage::user(line));
        history.push(ChatMessage::assistant(outcome.into_text()));
    }

    Ok(())
}

/// Handles a slash command. Returns `false` when the loop should stop.
fn handle_command(service: &DispatchService, command: &str) -> bool {
    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("quit" | "exit") => return false,
        Some("status") => super::status::print_status(&service.get_model_status(), &service.get_current_model()),
        Some("metrics") => super::status::print_metrics(&service.get_metrics_report()),
        Some("reset") => {
            let model = parts.next();
            service.reset_model_status(model);
            println!("{}", format!("Reset {}", model.unwrap_or("all models")).green());
        }
        _ => println!("{}", "Commands: /status, /metrics, /reset [model], /quit".dimmed()),
    }
    true
}
