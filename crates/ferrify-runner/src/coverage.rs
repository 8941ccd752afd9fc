//! Coverage and fault localization
//!
//! Line coverage is measured by rebuilding the harness with source-based
//! coverage and replaying examples through it. Only the lines between the
//! harness's `extern "C" {` block and its `mod communication {` block are
//! candidate code; everything else is instrumentation.
//!
//! Counterexamples with identical 0/1 coverage signatures exercise the same
//! paths, so [`CoverageEngine::group_examples_by_coverage`] buckets them and
//! repair prompts sample from one bucket.

use crate::command::CommandRunner;
use crate::error::{Error, Result};
use crate::example::{ExampleSet, IoExample, examples_to_json};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

const REGION_START: &str = "extern \"C\" {";
const REGION_END: &str = "mod communication {";

/// One candidate line with its execution count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageLine {
    /// Times the line executed
    pub count: u64,
    /// Source text of the line
    pub text: String,
}

/// Output of one coverage measurement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// `llvm-cov report` summary
    pub report: String,
    /// Raw `llvm-cov show` text
    pub show: String,
    /// Candidate lines in source order
    pub lines: Vec<CoverageLine>,
}

impl CoverageReport {
    /// Per-line execution counts
    #[must_use]
    pub fn counts(&self) -> Vec<u64> {
        self.lines.iter().map(|l| l.count).collect()
    }

    /// Which lines executed at least once
    #[must_use]
    pub fn signature(&self) -> Vec<bool> {
        self.lines.iter().map(|l| l.count > 0).collect()
    }
}

/// Decode an llvm-cov count column (`12`, `1.2k`, `3M`, blank)
#[must_use]
pub fn parse_count(column: &str) -> u64 {
    let column = column.trim();
    let (digits, scale) = match column.chars().last() {
        Some('k') => (&column[..column.len() - 1], 1e3),
        Some('M') => (&column[..column.len() - 1], 1e6),
        Some('G') => (&column[..column.len() - 1], 1e9),
        _ => (column, 1.0),
    };
    if scale == 1.0 {
        return digits.parse().unwrap_or(0);
    }
    digits
        .parse::<f64>()
        .map(|v| (v * scale).round() as u64)
        .unwrap_or(0)
}

/// Candidate lines from `llvm-cov show` output of the harness at `harness`
#[must_use]
pub fn parse_cov_show(harness: &Path, show: &str) -> Vec<CoverageLine> {
    let marker = format!("{}/src/lib.rs:\n", harness.display());
    let Some((_, body)) = show.split_once(&marker) else {
        return Vec::new();
    };
    let mut lines = Vec::new();
    let mut started = false;
    for line in body.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        if line.contains(REGION_END) {
            break;
        }
        if line.contains(REGION_START) {
            started = true;
        }
        if !started {
            continue;
        }
        let mut columns = line.splitn(3, '|');
        let (Some(_), Some(count), Some(text)) = (columns.next(), columns.next(), columns.next())
        else {
            continue;
        };
        lines.push(CoverageLine {
            count: parse_count(count),
            text: text.to_string(),
        });
    }
    lines
}

/// First test binary in `cargo test --no-run --message-format=json` output
#[must_use]
pub fn parse_test_binary(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .filter(|msg| msg.pointer("/profile/test").and_then(serde_json::Value::as_bool) == Some(true))
        .filter_map(|msg| msg.get("filenames").and_then(|f| f.as_array()).cloned())
        .flatten()
        .filter_map(|f| f.as_str().map(ToString::to_string))
        .find(|f| !f.contains("dSYM"))
}

/// Counterexamples sharing a coverage signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageBucket {
    /// Lines executed by every member
    pub signature: Vec<bool>,
    /// Members in input order
    pub examples: Vec<IoExample>,
}

/// Bucket examples by `signature`, in order of first appearance
///
/// With `early_stop`, returns only the first bucket to reach `target`
/// members as soon as it does.
///
/// # Errors
///
/// Propagates the first error from `signature`.
pub fn bucket_by_signature<F>(
    examples: &[IoExample],
    target: usize,
    early_stop: bool,
    mut signature: F,
) -> Result<Vec<CoverageBucket>>
where
    F: FnMut(&IoExample) -> Result<Vec<bool>>,
{
    let mut buckets: Vec<CoverageBucket> = Vec::new();
    for example in examples {
        let key = signature(example)?;
        let idx = match buckets.iter().position(|b| b.signature == key) {
            Some(idx) => idx,
            None => {
                buckets.push(CoverageBucket {
                    signature: key,
                    examples: Vec::new(),
                });
                buckets.len() - 1
            }
        };
        buckets[idx].examples.push(example.clone());
        if early_stop && buckets[idx].examples.len() == target {
            return Ok(vec![buckets.swap_remove(idx)]);
        }
    }
    Ok(buckets)
}

/// Suspiciousness formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SbflTechnique {
    /// `ef² / ((totalp + totalf) * (ef + ep))`
    #[default]
    Ochiai,
    /// `(ef/totalf) / (ef/totalf + ep/totalp)`
    Tarantula,
}

impl SbflTechnique {
    /// Score one line
    #[must_use]
    pub fn score(self, totalp: usize, totalf: usize, ep: usize, ef: usize) -> f64 {
        match self {
            Self::Ochiai => ochiai(totalp, totalf, ep, ef),
            Self::Tarantula => tarantula(totalp, totalf, ep, ef),
        }
    }
}

/// Ochiai suspiciousness; 0 when undefined
#[must_use]
pub fn ochiai(totalp: usize, totalf: usize, ep: usize, ef: usize) -> f64 {
    let denominator = (totalp as f64 + totalf as f64) * (ef as f64 + ep as f64);
    if denominator == 0.0 {
        return 0.0;
    }
    (ef as f64 * ef as f64) / denominator
}

/// Tarantula suspiciousness; 0 when undefined
#[must_use]
pub fn tarantula(totalp: usize, totalf: usize, ep: usize, ef: usize) -> f64 {
    let ratio = |hit: usize, total: usize| {
        if total == 0 {
            0.0
        } else {
            hit as f64 / total as f64
        }
    };
    let failed = ratio(ef, totalf);
    let passed = ratio(ep, totalp);
    if failed + passed == 0.0 {
        return 0.0;
    }
    failed / (failed + passed)
}

/// A candidate line ranked by fault likelihood
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineScore {
    /// Source text
    pub text: String,
    /// Suspiciousness in [0, 1]
    pub score: f64,
}

/// Measures coverage through a [`CommandRunner`]
#[derive(Clone)]
pub struct CoverageEngine {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for CoverageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageEngine").finish_non_exhaustive()
    }
}

impl CoverageEngine {
    /// Create an engine
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Coverage of `examples` replayed through the harness, or of the
    /// fuzzing corpus when `examples` is None
    ///
    /// # Errors
    ///
    /// Returns an error if the coverage build fails, no test binary is
    /// produced, or the llvm tools cannot be launched.
    pub fn compute_coverage(
        &self,
        harness: &Path,
        examples: Option<&[IoExample]>,
    ) -> Result<CoverageReport> {
        clear_profiles(harness)?;
        let input = examples.map(examples_to_json).transpose()?;

        let build = self
            .runner
            .coverage_build(harness, input.is_some())
            .into_success("cargo test --no-run")?;
        let binary = parse_test_binary(&build.stdout)
            .ok_or_else(|| Error::InvalidState("coverage build produced no test binary".into()))?;

        // replay exits non-zero whenever a counterexample is found
        self.runner
            .coverage_run(harness, input.as_deref())
            .into_launched("cargo test")?;
        self.runner
            .profdata_merge(harness)
            .into_launched("llvm-profdata merge")?;
        let report = self
            .runner
            .coverage_report(harness, &binary)
            .into_launched("llvm-cov report")?;
        let show = self
            .runner
            .coverage_show(harness, &binary)
            .into_launched("llvm-cov show")?;

        let lines = parse_cov_show(harness, &show.stdout);
        tracing::debug!(lines = lines.len(), "coverage measured");
        Ok(CoverageReport {
            report: report.stdout.trim().to_string(),
            show: show.stdout.trim().to_string(),
            lines,
        })
    }

    /// Coverage of the fuzzing corpus
    ///
    /// # Errors
    ///
    /// See [`CoverageEngine::compute_coverage`].
    pub fn corpus_coverage(&self, harness: &Path) -> Result<CoverageReport> {
        self.compute_coverage(harness, None)
    }

    /// Coverage of a single example
    ///
    /// # Errors
    ///
    /// See [`CoverageEngine::compute_coverage`].
    pub fn example_coverage(&self, harness: &Path, example: &IoExample) -> Result<CoverageReport> {
        self.compute_coverage(harness, Some(std::slice::from_ref(example)))
    }

    /// Bucket counterexamples by the lines they execute
    ///
    /// # Errors
    ///
    /// See [`CoverageEngine::compute_coverage`].
    pub fn group_examples_by_coverage(
        &self,
        harness: &Path,
        negatives: &[IoExample],
        target: usize,
        early_stop: bool,
    ) -> Result<Vec<CoverageBucket>> {
        let buckets = bucket_by_signature(negatives, target, early_stop, |example| {
            Ok(self.example_coverage(harness, example)?.signature())
        })?;
        tracing::info!(
            buckets = buckets.len(),
            counterexamples = negatives.len(),
            "grouped counterexamples by coverage"
        );
        Ok(buckets)
    }

    /// For each candidate line, how many of `examples` execute it
    ///
    /// # Errors
    ///
    /// See [`CoverageEngine::compute_coverage`].
    pub fn line_hits(&self, harness: &Path, examples: &[IoExample]) -> Result<Vec<(usize, String)>> {
        let mut hits: Vec<(usize, String)> = Vec::new();
        for example in examples {
            let coverage = self.example_coverage(harness, example)?;
            if hits.is_empty() {
                hits = coverage.lines.iter().map(|l| (0, l.text.clone())).collect();
            }
            for (slot, line) in hits.iter_mut().zip(&coverage.lines) {
                if line.count > 0 {
                    slot.0 += 1;
                }
            }
        }
        Ok(hits)
    }

    /// Rank candidate lines by fault likelihood
    ///
    /// # Errors
    ///
    /// See [`CoverageEngine::compute_coverage`].
    pub fn suspiciousness(
        &self,
        harness: &Path,
        examples: &ExampleSet,
        technique: SbflTechnique,
    ) -> Result<Vec<LineScore>> {
        let totalp = examples.positive.len();
        let totalf = examples.negative.len();
        let passed = self.line_hits(harness, &examples.positive)?;
        let failed = self.line_hits(harness, &examples.negative)?;
        let lines = if failed.is_empty() { &passed } else { &failed };
        Ok(lines
            .iter()
            .enumerate()
            .map(|(idx, (_, text))| {
                let ep = passed.get(idx).map_or(0, |h| h.0);
                let ef = failed.get(idx).map_or(0, |h| h.0);
                LineScore {
                    text: text.clone(),
                    score: technique.score(totalp, totalf, ep, ef),
                }
            })
            .collect())
    }
}

fn clear_profiles(harness: &Path) -> Result<()> {
    let Ok(entries) = std::fs::read_dir(harness) else {
        return Ok(());
    };
    for entry in entries.filter_map(std::result::Result::ok) {
        let path = entry.path();
        let stale = path.extension().is_some_and(|e| e == "profraw")
            || path.file_name().is_some_and(|n| n == "cov.profdata");
        if stale {
            std::fs::remove_file(path)?;
        }
    }
    Ok(())
}
