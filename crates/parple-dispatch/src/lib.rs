//! AI request dispatch for Parple.
//!
//! Every generation request from the study assistant or a companion persona
//! flows through a [`DispatchService`]:
//!
//! 1. the prompt is queued on a single FIFO [`RequestQueue`] that pauses
//!    between entries to stay under the upstream rate limit;
//! 2. the [`Orchestrator`] makes up to `max_retries` attempts, re-selecting
//!    the model before each one and backing off linearly in between;
//! 3. the [`ModelTracker`] puts a model into cooldown after repeated quota
//!    errors, and the [`ModelSelector`] skips it until the cooldown ends;
//! 4. the [`MetricsRecorder`] counts the result.
//!
//! Callers always get text back. A request that fails every attempt yields a
//! [`DispatchOutcome::Degraded`] holding a canned apology and the reason.
//!
//! # Example
//!
//! ```no_run
//! use parple_dispatch::{DispatchConfig, DispatchService};
//! use parple_models::ModelType;
//!
//! # async fn run() -> parple_dispatch::Result<()> {
//! let service = DispatchService::from_factory(DispatchConfig::default(), ModelType::Gemini)?;
//! let answer = service.generate_response("Explain Thevenin's theorem").await;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod prompt;
pub mod queue;
pub mod selector;
pub mod service;
pub mod tracker;

pub use config::{ConfigError, DispatchConfig};
pub use error::{DispatchError, Result};
pub use events::{DispatchEvent, EventBus};
pub use metrics::{MetricsRecorder, MetricsReport, OptimizationMetrics};
pub use orchestrator::{DegradeReason, DispatchOutcome, Orchestrator, QUOTA_KEYWORDS, is_quota_error};
pub use prompt::{
    Assistant, COMPANION_HISTORY_LIMIT, Persona, UnknownPersona, build_companion_prompt, build_study_prompt,
};
pub use queue::{QueueTicket, RequestQueue};
pub use selector::{ModelSelector, Selection, SelectionRole};
pub use service::{DispatchService, ServiceStatus};
pub use tracker::{ModelStatus, ModelStatusSnapshot, ModelTracker};
