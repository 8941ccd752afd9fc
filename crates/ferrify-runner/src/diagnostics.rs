//! Compiler diagnostic parsing
//!
//! Build logs are produced with `-Z track-diagnostics -Z time-passes`, so
//! besides the usual rustc error blocks they carry the compiler pass that
//! emitted each error and a `time:` line per finished pass. Two parsers turn
//! them into [`CompilationOutcome`]s:
//!
//! - [`parse_phased`] follows the pass timeline and records how deep
//!   compilation progressed; the compile fixer compares those timelines.
//! - [`parse_coarse`] splits the log on blank lines and is cheap enough for
//!   the inner repair loop.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

/// Code given to errors without an `[Exxxx]` tag
pub const NO_CODE: &str = "no-code";

/// Phase given to coarse-parsed errors without a tracking note
pub const UNKNOWN_PHASE: &str = "NotFound";

/// Passes present in every build, ignored in the timeline
const BOOKKEEPING_PASSES: [&str; 2] = ["free_global_ctxt", "total"];

static ERROR_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^error(?:\[(E\d{4})\])?:").unwrap()
});

static ERROR_CODE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"error\[(E\d+)\]").unwrap()
});

static GUTTER: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^\s*\d*\s+\|").unwrap()
});

static CARGO_PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\s*(Compiling|Updating).*\n").unwrap()
});

/// One compiler error
///
/// Equality and hashing use `(code, context, message)` only, so the same
/// error reported with different surrounding noise deduplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// `E0308`-style code or [`NO_CODE`]
    pub code: String,
    /// Compiler crate that emitted the error (from `-Ztrack-diagnostics`)
    pub diagnostic: String,
    /// Header text after `error[..]:`
    pub message: String,
    /// `file:line:col` from the `-->` line
    pub location: Option<String>,
    /// Gutter lines showing the offending source
    pub context: String,
    /// Remaining lines (notes, help)
    pub residual: String,
    /// Raw block
    pub body: String,
}

impl ErrorRecord {
    /// Parse one error block
    #[must_use]
    pub fn parse(body: &str) -> Self {
        let mut record = Self {
            code: NO_CODE.to_string(),
            diagnostic: String::new(),
            message: String::new(),
            location: None,
            context: String::new(),
            residual: String::new(),
            body: body.to_string(),
        };
        for line in body.lines() {
            if let Some(caps) = ERROR_HEADER.captures(line) {
                record.message = line[caps[0].len()..].trim().to_string();
                record.code = caps
                    .get(1)
                    .map_or_else(|| NO_CODE.to_string(), |c| c.as_str().to_string());
            } else if line.trim_start().starts_with("-->") {
                record.location = line.split_whitespace().last().map(ToString::to_string);
            } else if let Some(phase) = tracked_phase(line) {
                record.diagnostic = phase;
            } else if GUTTER.is_match(line) {
                record.context.push_str(line);
                record.context.push('\n');
            } else {
                record.residual.push_str(line);
                record.residual.push('\n');
            }
        }
        record
    }

    /// Prompt-ready rendering
    #[must_use]
    pub fn render(&self) -> String {
        let code = if self.code == NO_CODE {
            String::new()
        } else {
            format!("[{}]", self.code)
        };
        let mut text = format!("error{code}: {}\n", self.message);
        if let Some(location) = &self.location {
            text.push_str(&format!(" --> {location}\n"));
        }
        text.push_str(&self.context);
        text
    }
}

impl PartialEq for ErrorRecord {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.context == other.context && self.message == other.message
    }
}

impl Eq for ErrorRecord {}

impl Hash for ErrorRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
        self.context.hash(state);
        self.message.hash(state);
    }
}

/// `-Ztrack-diagnostics: created at compiler/rustc_x/src/..` -> `rustc_x`
fn tracked_phase(line: &str) -> Option<String> {
    let idx = line.find("-Ztrack-diagnostics")?;
    line[idx..].split('/').nth(1).map(ToString::to_string)
}

/// Structured result of one build
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationOutcome {
    /// Errors in the order reported
    pub errors: Vec<ErrorRecord>,
    /// Error count per code
    pub by_code: BTreeMap<String, usize>,
    /// Error count per emitting compiler phase
    pub by_phase: BTreeMap<String, usize>,
    /// Completed compiler passes, in order
    pub steps: Vec<String>,
    /// Number of errors
    pub total: usize,
}

impl CompilationOutcome {
    fn from_errors(errors: Vec<ErrorRecord>, steps: Vec<String>, phases: Vec<String>) -> Self {
        let mut by_code = BTreeMap::new();
        let mut by_phase = BTreeMap::new();
        for (err, phase) in errors.iter().zip(phases) {
            *by_code.entry(err.code.clone()).or_insert(0) += 1;
            *by_phase.entry(phase).or_insert(0) += 1;
        }
        Self {
            total: errors.len(),
            errors,
            by_code,
            by_phase,
            steps,
        }
    }

    /// No errors
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.total == 0
    }

    /// Distinct errors
    #[must_use]
    pub fn error_set(&self) -> HashSet<&ErrorRecord> {
        self.errors.iter().collect()
    }

    /// Errors carrying `code`
    #[must_use]
    pub fn count_for_code(&self, code: &str) -> usize {
        self.by_code.get(code).copied().unwrap_or(0)
    }
}

/// Phase-aware parse of a `-Z time-passes` build log
///
/// Scanning starts after `Compiling <crate_name>` (or at the top if the
/// marker is absent) and stops at cargo's `could not compile` summary.
#[must_use]
pub fn parse_phased(stderr: &str, crate_name: &str) -> CompilationOutcome {
    let marker = format!("Compiling {crate_name}");
    let summary = format!("error: could not compile `{crate_name}`");
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines
        .iter()
        .position(|line| line.contains(&marker))
        .map_or(0, |idx| idx + 1);

    let mut errors = Vec::new();
    let mut steps = Vec::new();
    let mut block: Option<String> = None;
    for line in &lines[start..] {
        if line.starts_with(&summary) {
            break;
        }
        if let Some(pass) = line.strip_prefix("time:") {
            if let Some(body) = block.take() {
                errors.push(ErrorRecord::parse(&body));
            }
            if let Some(step) = pass.split_whitespace().last() {
                if !BOOKKEEPING_PASSES.contains(&step) {
                    steps.push(step.to_string());
                }
            }
        } else if line.starts_with("error: aborting due to") {
            if let Some(body) = block.take() {
                errors.push(ErrorRecord::parse(&body));
            }
        } else if ERROR_HEADER.is_match(line) {
            if let Some(body) = block.take() {
                errors.push(ErrorRecord::parse(&body));
            }
            block = Some(format!("{line}\n"));
        } else if let Some(body) = block.as_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    if let Some(body) = block.take() {
        errors.push(ErrorRecord::parse(&body));
    }

    let phases = errors.iter().map(|e| e.diagnostic.clone()).collect();
    CompilationOutcome::from_errors(errors, steps, phases)
}

/// Coarse parse: blank-line separated blocks that look like errors
#[must_use]
pub fn parse_coarse(stderr: &str) -> CompilationOutcome {
    let blocks: Vec<&str> = stderr.split("\n\n").collect();
    let mut errors = Vec::new();
    let mut phases = Vec::new();
    // The final block is cargo's summary.
    for block in &blocks[..blocks.len().saturating_sub(1)] {
        if block.contains("Finished") || block.contains("warning:") || block.lines().count() <= 3 {
            continue;
        }
        let phase = block
            .lines()
            .find_map(tracked_phase)
            .unwrap_or_else(|| UNKNOWN_PHASE.to_string());
        let cleaned = CARGO_PROGRESS.replace_all(block, "");
        let mut record = ErrorRecord::parse(&cleaned);
        if record.code == NO_CODE {
            if let Some(caps) = ERROR_CODE.captures(block) {
                record.code = caps[1].to_string();
            }
        }
        errors.push(record);
        phases.push(phase);
    }
    CompilationOutcome::from_errors(errors, Vec::new(), phases)
}
