// Error types for request dispatch

use thiserror::Error;

use crate::config::ConfigError;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Dispatch errors
///
/// These stay inside the crate's plumbing; the public `generate_*` calls turn
/// every one of them into a degraded textual answer.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Upstream model error
    #[error("Model error: {0}")]
    Model(#[from] parple_abstraction::ModelError),

    /// A model name the dispatcher was not configured with
    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    /// The queue dropped the entry before it produced a result
    #[error("Request queue closed before the request completed")]
    QueueClosed,

    /// Queued work panicked while running
    #[error("Queued request panicked: {0}")]
    WorkPanicked(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
