//! Prompt assembly for the two assistants.
//!
//! Pure string construction. The study assistant answers course questions;
//! the companion speaks as one of the Parple personas.

use parple_abstraction::ChatMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Conversation turns carried into a companion prompt.
pub const COMPANION_HISTORY_LIMIT: usize = 10;

const STUDY_PRIMING: &str = "You are Parple AI, a study assistant for engineering students using \
Parple Notes. Explain concepts step by step, show the relevant formulas, and keep answers \
focused on the student's question. If the question is outside engineering coursework, answer \
briefly and steer back to studying.";

const COMPANION_PRIMING: &str = "You are a study companion inside the Parple Notes app. Stay in \
character, keep replies short enough to be spoken aloud, and be encouraging.";

const STUDY_FALLBACK: &str = "I'm having trouble reaching my knowledge source right now. Please try \
again in a moment. In the meantime, your uploaded notes and past papers are a great place to start.";

const COMPANION_FALLBACK: &str = "Sorry, I drifted off for a second there! Give me a moment and ask me \
again?";

/// The caller on whose behalf a request is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assistant {
    /// Course-question answering.
    Study,
    /// Persona chat.
    Companion,
}

impl Assistant {
    /// Prefixes `prompt` with this assistant's system priming.
    #[must_use]
    pub fn wrap(self, prompt: &str) -> String {
        match self {
            Self::Study => build_study_prompt(prompt),
            Self::Companion => format!("{COMPANION_PRIMING}\n\n{prompt}"),
        }
    }

    /// Apology shown when no model produced an answer.
    #[must_use]
    pub const fn fallback_text(self) -> &'static str {
        match self {
            Self::Study => STUDY_FALLBACK,
            Self::Companion => COMPANION_FALLBACK,
        }
    }
}

impl fmt::Display for Assistant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Study => write!(f, "study"),
            Self::Companion => write!(f, "companion"),
        }
    }
}

/// A persona name that did not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown persona '{0}' (expected bella, luna or aria)")]
pub struct UnknownPersona(pub String);

/// Companion personas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Bella,
    Luna,
    Aria,
}

impl Persona {
    /// Every persona, in display order.
    pub const ALL: [Self; 3] = [Self::Bella, Self::Luna, Self::Aria];

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bella => "Bella",
            Self::Luna => "Luna",
            Self::Aria => "Aria",
        }
    }

    /// Character description used in the prompt.
    #[must_use]
    pub const fn personality(self) -> &'static str {
        match self {
            Self::Bella => {
                "cheerful and energetic, celebrates every small win and uses playful encouragement"
            }
            Self::Luna => "calm and thoughtful, speaks gently and helps the student slow down when stressed",
            Self::Aria => "sharp and witty, loves puzzles and nudges the student to reason things out",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Persona {
    type Err = UnknownPersona;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bella" => Ok(Self::Bella),
            "luna" => Ok(Self::Luna),
            "aria" => Ok(Self::Aria),
            _ => Err(UnknownPersona(s.to_string())),
        }
    }
}

/// Builds the study assistant prompt for a student's question.
#[must_use]
pub fn build_study_prompt(user_message: &str) -> String {
    format!("{STUDY_PRIMING}\n\nStudent question: {}", user_message.trim())
}

/// Builds a persona prompt from recent history and the new message.
///
/// Only the last [`COMPANION_HISTORY_LIMIT`] turns are included. System
/// messages in the history are skipped.
#[must_use]
pub fn build_companion_prompt(persona: Persona, history: &[ChatMessage], user_message: &str) -> String {
    let mut prompt = format!(
        "You are {}, a study companion who is {}.\n",
        persona.name(),
        persona.personality()
    );

    let start = history.len().saturating_sub(COMPANION_HISTORY_LIMIT);
    let turns: Vec<String> = history[start..]
        .iter()
        .filter_map(|message| match message.role.as_str() {
            "user" => Some(format!("Student: {}", message.content)),
            "assistant" => Some(format!("{}: {}", persona.name(), message.content)),
            _ => None,
        })
        .collect();

    if !turns.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        prompt.push_str(&turns.join("\n"));
        prompt.push('\n');
    }

    prompt.push_str(&format!("\nStudent: {}\n{}:", user_message.trim(), persona.name()));
    prompt
}
