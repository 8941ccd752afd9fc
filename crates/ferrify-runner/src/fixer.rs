//! Compile-error repair
//!
//! The fixer picks one unresolved error at a time, asks the generator to fix
//! only that error, rebuilds, and keeps the edit only if [`compare`] judges
//! it real progress. Edits that introduce new errors are retried against the
//! newly introduced error a few times before the snapshot is restored.

use crate::compile::CompilationService;
use crate::diagnostics::{CompilationOutcome, ErrorRecord};
use crate::error::Result;
use ferrify_gen::{ModelParams, Prompt, QueryEngine, tag};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Generator calls one fixer run may spend
pub const MAX_FIX_CALLS: usize = 10;

const FIX_CONSTRAINTS: [&str; 7] = [
    "Use only safe Rust.",
    "Don't use raw pointers.",
    "Use box pointer whenever possible. Box pointers are preferable to other alternatives.",
    "Try not to use Traits if possible. I would not like to have Traits in resulting Rust code.",
    "Try not to use Generics if possible.",
    "Do not put any explanation or example comments.",
    "Do not add a main function",
];

/// Compile-error repair mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileFix {
    /// Keep the translation as generated
    No,
    /// Repair one error at a time
    #[default]
    Base,
}

/// Verdict of [`compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixStep {
    /// New errors are a strict subset of the old ones
    Subset,
    /// Compilation got strictly further through its passes
    Deeper,
    /// Same depth (or diverged early) with fewer errors
    Fewer,
    /// No progress
    Rejected,
}

impl FixStep {
    /// Numeric code used in reports: 1, 2, 3 or -1
    #[must_use]
    pub fn code(self) -> i8 {
        match self {
            Self::Subset => 1,
            Self::Deeper => 2,
            Self::Fewer => 3,
            Self::Rejected => -1,
        }
    }

    /// Anything but [`FixStep::Rejected`]
    #[must_use]
    pub fn is_progress(self) -> bool {
        self != Self::Rejected
    }
}

/// Distance from the end of each trace to their last common pass
fn last_match(cur: &[String], prev: &[String]) -> (usize, usize) {
    for (d_cur, step_cur) in cur.iter().rev().enumerate() {
        for (d_prev, step_prev) in prev.iter().rev().enumerate() {
            if step_cur == step_prev {
                return (d_cur, d_prev);
            }
        }
    }
    (cur.len(), prev.len())
}

/// Whether `cur` is real progress over `prev` for an edit aimed at `code`
///
/// Checked in order:
/// 1. the current errors are a subset of the previous ones and fewer;
/// 2. the current build passed the previous build's last pass and went
///    further;
/// 3. both builds end on the same pass, or both diverge before their ends,
///    and the error count or the count for `code` dropped.
#[must_use]
pub fn compare(cur: &CompilationOutcome, prev: &CompilationOutcome, code: &str) -> FixStep {
    let prev_set = prev.error_set();
    let subset = cur.errors.iter().all(|e| prev_set.contains(e));
    if subset && cur.total != prev.total {
        return FixStep::Subset;
    }

    let (d_cur, d_prev) = last_match(&cur.steps, &prev.steps);
    if d_cur > 0 && d_prev == 0 {
        return FixStep::Deeper;
    }

    let aligned = (d_cur == 0 && d_prev == 0) || (d_cur > 0 && d_prev > 0);
    let fewer = cur.total < prev.total || cur.count_for_code(code) < prev.count_for_code(code);
    if aligned && fewer {
        return FixStep::Fewer;
    }
    FixStep::Rejected
}

/// Result of a fixer run
#[derive(Debug, Clone)]
pub struct FixOutcome {
    /// Best code found
    pub code: String,
    /// Errors left in it
    pub remaining_errors: usize,
    /// Generator calls spent
    pub llm_calls: usize,
    /// Verdict of every attempted edit
    pub path: Vec<FixStep>,
}

/// Error-by-error compile repair
#[derive(Debug, Clone)]
pub struct Fixer {
    attempts_per_error: usize,
    params: ModelParams,
    explain_errors: bool,
}

impl Fixer {
    /// A fixer trying each error up to `attempts_per_error` times
    #[must_use]
    pub fn new(attempts_per_error: usize, params: ModelParams) -> Self {
        Self {
            attempts_per_error: attempts_per_error.max(1),
            params,
            explain_errors: false,
        }
    }

    /// Append `rustc --explain` text to the error message of each request
    #[must_use]
    pub fn with_explanations(mut self, explain_errors: bool) -> Self {
        self.explain_errors = explain_errors;
        self
    }

    /// Prompt asking to fix `error` in `code`, with an optional explanation
    /// of its error code
    #[must_use]
    pub fn prompt(code: &str, error: &ErrorRecord, explanation: Option<&str>) -> Prompt {
        let message = match explanation {
            Some(text) => format!("{}\n{}", error.body.trim_end(), text.trim_end()),
            None => error.body.clone(),
        };
        Prompt::new(
            format!(
                "You are given a Rust code contained in <code> tags.\n{}\nThis code does not compile. Here are some error messages contained in <error-message> tags\n{}\n",
                tag(code, "code"),
                tag(&message, "error-message")
            ),
            "Fix the above compilation errors.",
        )
        .with_constraints(FIX_CONSTRAINTS.iter().map(ToString::to_string).collect())
    }

    /// Repair `code`, whose build produced `outcome`
    ///
    /// # Errors
    ///
    /// Returns generation failures and compilation-service errors.
    pub fn fix<R: Rng + ?Sized>(
        &self,
        code: &str,
        outcome: CompilationOutcome,
        compiler: &mut CompilationService,
        engine: &QueryEngine,
        rng: &mut R,
    ) -> Result<FixOutcome> {
        let mut accepted_code = code.to_string();
        let mut accepted = outcome;
        let mut llm_calls = 0;
        let mut path = Vec::new();

        while llm_calls < MAX_FIX_CALLS {
            let Some(mut target) = accepted.errors.choose(rng).cloned() else {
                break;
            };
            let mut working = accepted_code.clone();
            for _ in 0..self.attempts_per_error {
                if llm_calls >= MAX_FIX_CALLS {
                    break;
                }
                let explanation = if self.explain_errors {
                    compiler.explain_code(&target.code)
                } else {
                    None
                };
                let prompt = Self::prompt(&working, &target, explanation.as_deref());
                working = engine.generate_code(&prompt, &self.params)?;
                llm_calls += 1;
                let rebuilt = compiler.compile_phased(
                    &working,
                    &engine.stringify_prompt(&prompt),
                    &format!("fix_{llm_calls}"),
                )?;
                let step = compare(&rebuilt, &accepted, &target.code);
                path.push(step);
                tracing::debug!(error = %target.code, verdict = step.code(), "fix attempt");
                if step.is_progress() {
                    accepted_code = working.clone();
                    accepted = rebuilt;
                    break;
                }
                if let Some(introduced) = rebuilt.errors.iter().find(|e| !accepted.errors.contains(e)) {
                    target = introduced.clone();
                }
            }
        }

        tracing::info!(
            remaining = accepted.total,
            llm_calls,
            "compile fixing finished"
        );
        Ok(FixOutcome {
            code: accepted_code,
            remaining_errors: accepted.total,
            llm_calls,
            path,
        })
    }
}
