//! Model implementations for Parple.
//!
//! This crate provides concrete implementations of the `Model` trait.
//!
//! # Supported Providers
//!
//! - **Gemini**: Google's Gemini models (API key required)
//! - **Scripted**: deterministic offline model for tests and demos

pub mod factory;
pub mod gemini;
pub mod scripted;

pub use factory::{ModelConfig, ModelFactory, ModelType};
pub use gemini::GeminiModel;
pub use scripted::{DefaultBehavior, ScriptedModel};
