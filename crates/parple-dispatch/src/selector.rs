//! Two-tier model selection.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::tracker::ModelTracker;

/// Why a model was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRole {
    /// The primary model is out of cooldown.
    Primary,
    /// The primary is cooling down and the fallback is not.
    Fallback,
    /// Both models are cooling down; the primary is tried anyway.
    LastResort,
}

/// A model picked for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub model: String,
    pub role: SelectionRole,
}

impl Selection {
    /// True when the attempt goes to the fallback model.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.role == SelectionRole::Fallback
    }
}

/// Picks between exactly one primary and one fallback model.
///
/// Selection is re-evaluated on every call and never refuses: with both
/// models cooling down it returns the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelector {
    primary: String,
    fallback: String,
}

impl ModelSelector {
    /// Creates a selector over a primary and a fallback model name.
    #[must_use]
    pub fn new(primary: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self { primary: primary.into(), fallback: fallback.into() }
    }

    /// Primary model name.
    #[must_use]
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Fallback model name.
    #[must_use]
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Chooses the model for the next attempt from the tracker's current state.
    pub fn select(&self, tracker: &ModelTracker) -> Selection {
        if tracker.is_eligible(&self.primary) {
            return Selection { model: self.primary.clone(), role: SelectionRole::Primary };
        }

        if tracker.is_eligible(&self.fallback) {
            debug!(primary = %self.primary, fallback = %self.fallback, "Primary cooling down, selecting fallback");
            return Selection { model: self.fallback.clone(), role: SelectionRole::Fallback };
        }

        warn!(
            primary = %self.primary,
            fallback = %self.fallback,
            "All models are cooling down, using primary as last resort"
        );
        Selection { model: self.primary.clone(), role: SelectionRole::LastResort }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use std::time::Duration;

    fn setup() -> (ModelSelector, ModelTracker) {
        let selector = ModelSelector::new("primary", "fallback");
        let tracker = ModelTracker::new(["primary", "fallback"], 3, Duration::from_secs(300), EventBus::new());
        (selector, tracker)
    }

    fn cool_down(tracker: &ModelTracker, model: &str) {
        for _ in 0..3 {
            tracker.mark_failed(model, "429 rate limit").unwrap();
        }
    }

    #[test]
    fn test_prefers_primary() {
        let (selector, tracker) = setup();
        let selection = selector.select(&tracker);
        assert_eq!(selection.model, "primary");
        assert_eq!(selection.role, SelectionRole::Primary);
        assert!(!selection.is_fallback());
    }

    #[test]
    fn test_fallback_when_primary_cooling_down() {
        let (selector, tracker) = setup();
        cool_down(&tracker, "primary");

        let selection = selector.select(&tracker);
        assert_eq!(selection.model, "fallback");
        assert!(selection.is_fallback());
    }

    #[test]
    fn test_last_resort_when_both_cooling_down() {
        let (selector, tracker) = setup();
        cool_down(&tracker, "primary");
        cool_down(&tracker, "fallback");

        let selection = selector.select(&tracker);
        assert_eq!(selection.model, "primary");
        assert_eq!(selection.role, SelectionRole::LastResort);
        assert!(!selection.is_fallback());
    }

    #[test]
    fn test_fallback_cooldown_alone_keeps_primary() {
        let (selector, tracker) = setup();
        cool_down(&tracker, "fallback");
        assert_eq!(selector.select(&tracker).role, SelectionRole::Primary);
    }
}
