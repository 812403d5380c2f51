//! Parple CLI - talk to the Parple Notes study assistant from a terminal
//!
//! This CLI provides a `parple` command that sends questions through the
//! same rate-limited dispatch layer the app uses, so quota behaviour and
//! fallback can be observed directly.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parple_dispatch::{DispatchConfig, DispatchService};
use parple_models::ModelType;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parple CLI - study assistant and companion chat
#[derive(Parser, Debug)]
#[command(
    name = "parple",
    author,
    version,
    about = "Parple Notes - AI study assistant",
    long_about = "Ask the Parple study assistant questions or chat with a companion persona.\nRequests are queued, rate limited and retried with model fallback."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Dispatch configuration file (defaults to ./.parple.toml, then ~/.parple/dispatch.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use deterministic offline models instead of Gemini
    #[arg(long, global = true)]
    offline: bool,

    /// Print dispatcher events to stderr as they happen
    #[arg(long, global = true)]
    events: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the study assistant a question
    Ask {
        /// The question
        #[arg(required = true)]
        message: Vec<String>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,

        /// Print dispatcher status after answering
        #[arg(long)]
        show_status: bool,
    },

    /// Chat with a companion persona
    ///
    /// Reads messages from stdin. Type /status, /metrics, /reset [model]
    /// or /quit.
    Companion {
        /// Persona to talk to (bella, luna, aria)
        #[arg(short, long, default_value = "bella")]
        persona: String,
    },

    /// Show model status, queue state and configuration
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => DispatchConfig::load(path)?,
        None => DispatchConfig::discover_and_load()?,
    };

    let model_type = if args.offline { ModelType::Scripted } else { ModelType::Gemini };
    let service = DispatchService::from_factory(config, model_type)
        .context("Failed to set up models (set GEMINI_API_KEY or pass --offline)")?;

    if args.events {
        commands::events::spawn_printer(&service);
    }

    match args.command {
        Command::Ask { message, json, show_status } => {
            commands::ask::execute(&service, &message.join(" "), json, show_status).await
        }
        Command::Companion { persona } => commands::companion::execute(&service, &persona).await,
        Command::Status { json } => commands::status::execute(&service, json),
    }
}
