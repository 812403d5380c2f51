//! Model factory for creating model instances from configuration.

use crate::{GeminiModel, ScriptedModel};
use parple_abstraction::{Model, ModelError};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Model type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Google Gemini over REST.
    Gemini,
    /// Offline scripted model that echoes prompts.
    Scripted,
}

impl FromStr for ModelType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "scripted" | "mock" | "offline" => Ok(Self::Scripted),
            other => Err(ModelError::UnsupportedModelProvider(other.to_string())),
        }
    }
}

/// Model configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// The type of model to create.
    pub model_type: ModelType,
    /// The model ID (e.g., "gemini-1.5-flash").
    pub model_id: String,
    /// Optional API key (if not provided, will be loaded from environment).
    pub api_key: Option<String>,
    /// Optional API root override.
    pub base_url: Option<String>,
}

impl ModelConfig {
    /// Creates a new `ModelConfig` with the given type and model ID.
    #[must_use]
    pub fn new(model_type: ModelType, model_id: impl Into<String>) -> Self {
        Self { model_type, model_id: model_id.into(), api_key: None, base_url: None }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sets the API root for this configuration.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

/// Factory for creating model instances.
pub struct ModelFactory;

impl ModelFactory {
    /// Creates a model instance from the given configuration.
    ///
    /// # Errors
    /// Returns a `ModelError` if model creation fails (e.g., missing API key).
    pub fn create(config: ModelConfig) -> Result<Arc<dyn Model>, ModelError> {
        debug!(
            model_type = ?config.model_type,
            model_id = %config.model_id,
            "Creating model instance"
        );

        match config.model_type {
            ModelType::Scripted => Ok(Arc::new(ScriptedModel::new(config.model_id))),
            ModelType::Gemini => {
                let mut model = if let Some(api_key) = config.api_key {
                    GeminiModel::with_api_key(config.model_id, api_key)
                } else {
                    GeminiModel::new(config.model_id)?
                };
                if let Some(base_url) = config.base_url {
                    model = model.with_base_url(base_url);
                }
                Ok(Arc::new(model))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_type_from_str() {
        assert_eq!("gemini".parse::<ModelType>().unwrap(), ModelType::Gemini);
        assert_eq!("Mock".parse::<ModelType>().unwrap(), ModelType::Scripted);
        assert_eq!("offline".parse::<ModelType>().unwrap(), ModelType::Scripted);
        assert!("claude".parse::<ModelType>().is_err());
    }

    #[test]
    fn test_create_scripted_model() {
        let model = ModelFactory::create(ModelConfig::new(ModelType::Scripted, "offline-primary")).unwrap();
        assert_eq!(model.model_id(), "offline-primary");
    }

    #[test]
    fn test_create_gemini_model_with_key() {
        let config = ModelConfig::new(ModelType::Gemini, "gemini-1.5-flash")
            .with_api_key("test-key".to_string())
            .with_base_url("http://127.0.0.1:9".to_string());
        let model = ModelFactory::create(config).unwrap();
        assert_eq!(model.model_id(), "gemini-1.5-flash");
    }
}
