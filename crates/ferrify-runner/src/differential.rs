//! Differential verification
//!
//! Runs an instrumented harness and collects the examples on which the
//! candidate and the reference agree or disagree.
//!
//! - [`DifferentialVerifier::verify`] fuzzes for fresh inputs, retrying on
//!   timeout with a larger input bound and a longer deadline.
//! - [`DifferentialVerifier::soft_verify`] replays a fixed example set
//!   against a rebuilt harness without generating new inputs.

use crate::command::CommandRunner;
use crate::error::{Error, Result};
use crate::example::{ExampleSet, IoExample, examples_to_json, parse_examples};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const POSITIVE_PREFIX: &str = "positive examples: ";
const NEGATIVE_PREFIX: &str = "counter examples: ";

/// Fuzzing limits and their growth on timeout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// `-max_len` of the first fuzz run
    pub initial_max_len: u64,
    /// Deadline of the first fuzz run
    pub initial_timeout_secs: u64,
    /// Extra fuzz runs after a timeout
    pub retry_limit: u32,
    /// Deadline of a replay
    pub soft_timeout_secs: u64,
    /// Fuzzer memory limit
    pub rss_limit_mb: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_max_len: 32_768,
            initial_timeout_secs: 420,
            retry_limit: 0,
            soft_timeout_secs: 300,
            rss_limit_mb: crate::command::DEFAULT_RSS_LIMIT_MB,
        }
    }
}

impl BackoffConfig {
    /// `(max_len, timeout)` for every fuzz run the ladder allows
    #[must_use]
    pub fn ladder(&self) -> Vec<(u64, Duration)> {
        let mut max_len = self.initial_max_len;
        let mut timeout = Duration::from_secs(self.initial_timeout_secs);
        let mut steps = Vec::with_capacity(self.retry_limit as usize + 1);
        for _ in 0..=self.retry_limit {
            steps.push((max_len, timeout));
            max_len = max_len.saturating_mul(4);
            timeout = timeout.saturating_mul(2);
        }
        steps
    }
}

/// The two report lines a harness prints when it finishes
#[must_use]
pub fn harness_report(positive: &str, negative: &str) -> String {
    format!("{POSITIVE_PREFIX}{positive}\n{NEGATIVE_PREFIX}{negative}")
}

/// Raw JSON of the positive and counterexample lines
///
/// Both lines must be present and non-empty; the last occurrence wins.
#[must_use]
pub fn parse_report(report: &str) -> Option<(String, String)> {
    let mut positive = None;
    let mut negative = None;
    for line in report.lines() {
        if let Some(rest) = line.strip_prefix(POSITIVE_PREFIX) {
            positive = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(NEGATIVE_PREFIX) {
            negative = Some(rest.trim().to_string());
        }
    }
    match (positive, negative) {
        (Some(p), Some(n)) if !p.is_empty() && !n.is_empty() => Some((p, n)),
        _ => None,
    }
}

/// Fuzz entry points from `cargo bolero list` JSON lines
#[must_use]
pub fn parse_fuzz_targets(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .filter_map(|v| v.get("test").and_then(|t| t.as_str()).map(ToString::to_string))
        .collect()
}

/// Runs harnesses and classifies their examples
#[derive(Clone)]
pub struct DifferentialVerifier {
    runner: Arc<dyn CommandRunner>,
    config: BackoffConfig,
}

impl std::fmt::Debug for DifferentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DifferentialVerifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DifferentialVerifier {
    /// Create a verifier
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, config: BackoffConfig) -> Self {
        Self { runner, config }
    }

    /// Limits in use
    #[must_use]
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Fuzz the harness for fresh examples
    ///
    /// Returns `Ok(None)` ("no evidence") when the harness has no entry
    /// point, every run on the ladder times out, or the report is
    /// incomplete. When `result_dir` is given the raw report and both
    /// example arrays are written there.
    ///
    /// # Errors
    ///
    /// Returns an error if the harness directory is missing, cargo cannot
    /// be launched, or the result files cannot be written.
    pub fn verify(
        &self,
        harness: &Path,
        name: &str,
        result_dir: Option<&Path>,
    ) -> Result<Option<ExampleSet>> {
        let harness = absolute_harness(harness)?;
        tracing::info!(unit = name, "verifying");

        let listing = self
            .runner
            .fuzz_list(&harness)
            .into_launched("cargo bolero list")?;
        let Some(entry) = parse_fuzz_targets(&listing.stdout).into_iter().next() else {
            tracing::warn!(unit = name, "harness exposes no fuzz entry");
            return Ok(None);
        };

        let mut report = None;
        for (max_len, timeout) in self.config.ladder() {
            let run = self
                .runner
                .fuzz_run(&harness, &entry, max_len, timeout)
                .into_launched("cargo bolero test")?;
            if run.timed_out {
                tracing::info!(max_len, timeout_secs = timeout.as_secs(), "verification timed out");
                continue;
            }
            report = Some(run.stderr.trim().to_string());
            break;
        }
        let Some(report) = report else {
            tracing::warn!(unit = name, "verification retries exhausted");
            return Ok(None);
        };

        let Some((positive, negative)) = parse_report(&report) else {
            tracing::warn!(unit = name, "harness report lacks example sections");
            return Ok(None);
        };

        if let Some(dir) = result_dir {
            std::fs::create_dir_all(dir)?;
            std::fs::write(dir.join("verify.log"), &report)?;
            std::fs::write(dir.join("counter_examples.json"), &negative)?;
            std::fs::write(dir.join("positive_examples.json"), &positive)?;
        }

        Ok(decode(&positive, &negative))
    }

    /// Replay a fixed example set against a rebuilt harness
    ///
    /// Returns `Ok(None)` when the replay times out or its report is
    /// incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the harness reports a
    /// different number of examples than it was given.
    pub fn soft_verify(
        &self,
        harness: &Path,
        name: &str,
        examples: &ExampleSet,
    ) -> Result<Option<ExampleSet>> {
        let harness = absolute_harness(harness)?;
        tracing::info!(unit = name, examples = examples.len(), "soft-verifying");

        let input = examples_to_json(&examples.combined())?;
        let run = self
            .runner
            .replay(
                &harness,
                &input,
                Duration::from_secs(self.config.soft_timeout_secs),
            )
            .into_launched("cargo test --features replay")?;
        if run.timed_out {
            tracing::warn!(unit = name, "replay timed out");
            return Ok(None);
        }
        let Some((positive, negative)) = parse_report(run.stderr.trim()) else {
            return Ok(None);
        };
        let Some(replayed) = decode(&positive, &negative) else {
            return Ok(None);
        };
        if replayed.len() != examples.len() {
            return Err(Error::ProtocolViolation {
                expected: examples.len(),
                actual: replayed.len(),
            });
        }
        Ok(Some(replayed))
    }
}

fn absolute_harness(harness: &Path) -> Result<std::path::PathBuf> {
    if !harness.exists() {
        return Err(Error::MissingInput(harness.to_path_buf()));
    }
    Ok(std::path::absolute(harness)?)
}

fn decode(positive: &str, negative: &str) -> Option<ExampleSet> {
    let parsed: Result<(Vec<IoExample>, Vec<IoExample>)> =
        parse_examples(positive).and_then(|p| Ok((p, parse_examples(negative)?)));
    match parsed {
        Ok((positive, negative)) => Some(ExampleSet { positive, negative }),
        Err(e) => {
            tracing::warn!(error = %e, "malformed harness examples");
            None
        }
    }
}
