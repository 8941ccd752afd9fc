//! Structured prompts
//!
//! A [`Prompt`] is rendered into a single user message; its `history` turns
//! are replayed before it and a non-empty `preamble` becomes a trailing
//! assistant turn that the model continues from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The requesting side
    User,
    /// The model
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker
    pub role: Role,
    /// Text of the turn
    pub content: String,
}

impl Message {
    /// User turn
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant turn
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters forwarded to the backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Sampling temperature in [0, 1]
    pub temperature: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self { temperature: 0.2 }
    }
}

impl ModelParams {
    /// Parameters with the given temperature, clamped to [0, 1]
    #[must_use]
    pub fn with_temperature(temperature: f64) -> Self {
        Self {
            temperature: temperature.clamp(0.0, 1.0),
        }
    }
}

/// Structured prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Background material (source code, previous answers)
    pub context: String,
    /// What the model should do
    pub instruction: String,
    /// Numbered constraints
    pub constraints: Vec<String>,
    /// Trailing material (examples, explanations)
    pub extra_information: String,
    /// Earlier conversation turns
    pub history: Vec<Message>,
    /// Fixed start of the response
    pub preamble: String,
}

impl Prompt {
    /// Prompt with context and instruction only
    #[must_use]
    pub fn new(context: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            instruction: instruction.into(),
            ..Self::default()
        }
    }

    /// Replace the constraint list
    #[must_use]
    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }

    /// Set the extra information block
    #[must_use]
    pub fn with_extra_information(mut self, extra: impl Into<String>) -> Self {
        self.extra_information = extra.into();
        self
    }

    /// Set the conversation history
    #[must_use]
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Set the response preamble
    #[must_use]
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    /// Message sequence sent to a chat-style backend
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = self.history.clone();
        messages.push(Message::user(self.to_string()));
        if !self.preamble.is_empty() {
            messages.push(Message::assistant(self.preamble.trim_end()));
        }
        messages
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let constraints: String = self
            .constraints
            .iter()
            .enumerate()
            .map(|(idx, c)| format!("\n\t{}. {c}", idx + 1))
            .collect();
        write!(
            f,
            "{}\n\n{}\n\nHere are some constraints contained in <list> tags that you should respect:\n{}\n\n{}\n",
            self.context,
            self.instruction,
            tag(&constraints, "list"),
            self.extra_information
        )
    }
}

/// Wrap `content` in `<name>` tags; empty content stays empty
#[must_use]
pub fn tag(content: &str, name: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    format!("\n<{name}>\n{content}\n</{name}>\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_empty() {
        assert_eq!(tag("", "code"), "");
        assert_eq!(tag("x", "code"), "\n<code>\nx\n</code>\n");
    }

    #[test]
    fn test_prompt_display_numbers_constraints() {
        let prompt = Prompt::new("int f();", "Translate.")
            .with_constraints(vec!["be safe".into(), "be fast".into()])
            .with_extra_information("extra");
        let text = prompt.to_string();
        assert!(text.starts_with("int f();\n\nTranslate."));
        assert!(text.contains("<list>\n\n\t1. be safe\n\t2. be fast\n</list>"));
        assert!(text.trim_end().ends_with("extra"));
    }

    #[test]
    fn test_messages_with_history_and_preamble() {
        let prompt = Prompt::new("ctx", "do it")
            .with_history(vec![Message::user("first"), Message::assistant("answer")])
            .with_preamble("fn main() {}\n\n");
        let messages = prompt.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "answer");
        assert!(messages[2].content.contains("do it"));
        assert_eq!(messages[3], Message::assistant("fn main() {}"));
    }

    #[test]
    fn test_model_params_clamped() {
        assert!((ModelParams::with_temperature(1.7).temperature - 1.0).abs() < f64::EPSILON);
        assert!(ModelParams::with_temperature(-0.3).temperature.abs() < f64::EPSILON);
        assert!((ModelParams::default().temperature - 0.2).abs() < f64::EPSILON);
    }
}
