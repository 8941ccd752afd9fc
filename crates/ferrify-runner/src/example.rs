//! Input/output examples exchanged with the differential harness
//!
//! The harness prints examples as JSON. Counterexamples carry both the
//! reference (`expected`) and candidate (`actual`) results; agreeing examples
//! may omit `expected`, which then equals `actual`.

use crate::error::Result;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arrays longer than this are elided when shown to the model
pub const MAX_ARRAY_LENGTH: usize = 5;

/// Outcome of running one side on one input
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// Returned normally; the payload is the JSON-encoded result
    ExecutionSuccess(String),
    /// Panicked or crashed
    ExecutionFailure,
}

impl ExecutionResult {
    /// Whether execution returned normally
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::ExecutionSuccess(_))
    }

    /// Decoded result value, None for failures
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        match self {
            Self::ExecutionSuccess(json) => {
                Some(serde_json::from_str(json).unwrap_or_else(|_| Value::String(json.clone())))
            }
            Self::ExecutionFailure => None,
        }
    }

    /// Structural comparison of decoded values
    #[must_use]
    pub fn agrees_with(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ExecutionFailure, Self::ExecutionFailure) => true,
            (Self::ExecutionSuccess(_), Self::ExecutionSuccess(_)) => self.value() == other.value(),
            _ => false,
        }
    }
}

#[derive(Deserialize)]
struct RawExample {
    args: Vec<String>,
    expected: Option<ExecutionResult>,
    actual: ExecutionResult,
}

impl From<RawExample> for IoExample {
    fn from(raw: RawExample) -> Self {
        Self {
            expected: raw.expected.unwrap_or_else(|| raw.actual.clone()),
            args: raw.args,
            actual: raw.actual,
        }
    }
}

/// One input with both sides' results
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawExample")]
pub struct IoExample {
    /// JSON-encoded arguments
    pub args: Vec<String>,
    /// Reference result
    pub expected: ExecutionResult,
    /// Candidate result
    pub actual: ExecutionResult,
}

impl IoExample {
    /// Example where both sides returned `output`
    #[must_use]
    pub fn agreeing(args: Vec<String>, output: ExecutionResult) -> Self {
        Self {
            args,
            expected: output.clone(),
            actual: output,
        }
    }

    /// Example where the sides differ
    #[must_use]
    pub fn disagreeing(args: Vec<String>, expected: ExecutionResult, actual: ExecutionResult) -> Self {
        Self {
            args,
            expected,
            actual,
        }
    }

    /// Whether candidate and reference agree
    #[must_use]
    pub fn is_agreement(&self) -> bool {
        self.expected.agrees_with(&self.actual)
    }

    fn arguments_text(&self, indent: &str) -> String {
        let mut text = format!("{indent}Arguments:\n");
        for (idx, arg) in self.args.iter().enumerate() {
            let value = serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone()));
            text.push_str(&format!("  Argument {idx}: {}\n", simplify(&value)));
        }
        text
    }

    /// Input plus expected output, as used in hints
    #[must_use]
    pub fn render_expected(&self) -> String {
        format!(
            "{} Expected Output: {}\n",
            self.arguments_text(" "),
            describe(&self.expected, "Input is invalid, crash gracefully")
        )
    }

    /// Input, expected and actual output, as used in repair prompts
    #[must_use]
    pub fn render_mismatch(&self, idx: usize) -> String {
        format!(
            "\n Example {idx} \n {} Expected Output: {} \n Actual Output: {}\n",
            self.arguments_text(""),
            describe(&self.expected, "Input is invalid, crash gracefully"),
            describe(&self.actual, "Runtime crash")
        )
    }
}

fn describe(result: &ExecutionResult, failure: &str) -> String {
    result
        .value()
        .map_or_else(|| failure.to_string(), |v| simplify(&v).to_string())
}

/// Elide long arrays, recursively
#[must_use]
pub fn simplify(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.len() > MAX_ARRAY_LENGTH => {
            let mut kept: Vec<Value> = items[..MAX_ARRAY_LENGTH].iter().map(simplify).collect();
            kept.push(Value::String(format!(
                "... and {} other elements",
                items.len() - MAX_ARRAY_LENGTH
            )));
            Value::Array(kept)
        }
        Value::Array(items) => Value::Array(items.iter().map(simplify).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), simplify(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Counterexamples rendered for a repair prompt
#[must_use]
pub fn list_examples(examples: &[IoExample]) -> String {
    examples
        .iter()
        .enumerate()
        .map(|(idx, ex)| ex.render_mismatch(idx))
        .collect()
}

/// Parse a JSON example array
///
/// # Errors
///
/// Returns an error if the text is not a valid example array.
pub fn parse_examples(json: &str) -> Result<Vec<IoExample>> {
    Ok(serde_json::from_str(json)?)
}

/// Serialize an example array
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn examples_to_json(examples: &[IoExample]) -> Result<String> {
    Ok(serde_json::to_string(examples)?)
}

/// Agreeing and disagreeing examples from one verification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleSet {
    /// Inputs where candidate and reference agree
    pub positive: Vec<IoExample>,
    /// Counterexamples
    pub negative: Vec<IoExample>,
}

impl ExampleSet {
    /// Number of examples
    #[must_use]
    pub fn len(&self) -> usize {
        self.positive.len() + self.negative.len()
    }

    /// No examples at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Both lists in one array, positives first
    #[must_use]
    pub fn combined(&self) -> Vec<IoExample> {
        self.positive.iter().chain(&self.negative).cloned().collect()
    }

    /// Up to `n / 2` positives and the rest negatives, rendered as a hint
    pub fn hint<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> String {
        let n_positive = n / 2;
        let n_negative = n - n_positive;
        tracing::info!(n_positive, n_negative, "hinting with examples");
        let mut chosen: Vec<&IoExample> = self
            .positive
            .choose_multiple(rng, n_positive)
            .collect();
        chosen.extend(self.negative.choose_multiple(rng, n_negative));
        let body: Vec<String> = chosen
            .iter()
            .enumerate()
            .map(|(idx, ex)| format!("Example {idx}:\n{}", ex.render_expected()))
            .collect();
        format!(
            "Take the following input/output examples contained in <testcases> tag into consideration:\n{}",
            ferrify_gen::tag(&body.join("\n"), "testcases")
        )
    }
}
