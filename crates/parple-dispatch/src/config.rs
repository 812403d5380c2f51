//! Dispatch configuration.
//!
//! The defaults are the production constants. A TOML file can override any
//! of them; nothing is read from the environment.
//!
//! ```toml
//! primary_model = "gemini-1.5-flash"
//! fallback_model = "gemini-1.5-flash-8b"
//! max_retries = 2
//! rate_limit_delay_ms = 1000
//! cooldown_ms = 300000
//! error_threshold = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Settings for the request queue, retry loop and cooldown tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Preferred upstream model.
    pub primary_model: String,
    /// Model used while the primary is cooling down.
    pub fallback_model: String,
    /// Attempts per request, including the first one.
    pub max_retries: u32,
    /// Pause between two queued requests.
    pub rate_limit_delay_ms: u64,
    /// How long a model stays out of rotation once its threshold is hit.
    pub cooldown_ms: u64,
    /// Failures needed to put a model into cooldown.
    pub error_threshold: u32,
    /// Backoff unit; attempt `n` waits `backoff_base_ms * (n + 1)`.
    pub backoff_base_ms: u64,
    /// Count non-quota failures toward the cooldown threshold as well.
    pub count_transient_failures: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            primary_model: "gemini-1.5-flash".to_string(),
            fallback_model: "gemini-1.5-flash-8b".to_string(),
            max_retries: 2,
            rate_limit_delay_ms: 1000,
            cooldown_ms: 5 * 60 * 1000,
            error_threshold: 3,
            backoff_base_ms: 2000,
            count_transient_failures: false,
        }
    }
}

impl DispatchConfig {
    /// Loads and validates a configuration file.
    ///
    /// Keys missing from the file keep their default values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded dispatch configuration");
        Ok(config)
    }

    /// Global configuration path (`~/.parple/dispatch.toml`).
    pub fn default_global_path() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".parple").join("dispatch.toml")
    }

    /// Local configuration path (`./.parple.toml`).
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".parple.toml")
    }

    /// Loads the local file if present, else the global one, else defaults.
    ///
    /// Missing files are skipped; a file that exists but is invalid is an error.
    pub fn discover_and_load() -> Result<Self, ConfigError> {
        for path in [Self::default_local_path(), Self::default_global_path()] {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Checks the invariants the dispatcher relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_model.trim().is_empty() || self.fallback_model.trim().is_empty() {
            return Err(ConfigError::Validation("model names must not be empty".to_string()));
        }
        if self.primary_model == self.fallback_model {
            return Err(ConfigError::Validation(format!(
                "primary and fallback model must differ (both are '{}')",
                self.primary_model
            )));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Validation("max_retries must be at least 1".to_string()));
        }
        if self.error_threshold == 0 {
            return Err(ConfigError::Validation("error_threshold must be at least 1".to_string()));
        }
        if self.cooldown_ms == 0 {
            return Err(ConfigError::Validation("cooldown_ms must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Inter-request delay of the sequencer.
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    /// Cooldown window applied by the tracker.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Wait after the failed attempt with zero-based index `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(u64::from(attempt) + 1))
    }
}
