//! Run report
//!
//! One JSON document per run, written beside the settings in the work
//! directory.

use crate::config::Options;
use crate::error::Result;
use crate::executor::ReturnCode;
use crate::fixer::FixStep;
use crate::lints::LintSummary;
use crate::search::Fallback;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the report inside the work directory
pub const REPORT_FILE: &str = "report.json";

/// Summary of one transpilation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run finished
    pub timestamp: DateTime<Utc>,
    /// Benchmark name
    pub benchmark: String,
    /// Submodule name
    pub submodule: String,
    /// Fallback strategy in use
    pub fallback: Fallback,
    /// Terminal state
    pub outcome: ReturnCode,
    /// Numeric terminal code
    pub return_code: u8,
    /// Score of the last candidate, if one was ever verified
    pub best_score: Option<f64>,
    /// Fallback rounds run
    pub restarts: usize,
    /// Semantic repair rounds run
    pub fix_rounds: usize,
    /// Generator calls across the run
    pub llm_calls: usize,
    /// Rounds that produced no evidence
    pub oracle_failures: usize,
    /// Fixer verdict codes, in order
    pub fix_path: Vec<i8>,
    /// Clippy summary of the final translation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<LintSummary>,
}

impl RunReport {
    /// Empty report for a run of `options` ending in `outcome`
    #[must_use]
    pub fn new(options: &Options, outcome: ReturnCode) -> Self {
        Self {
            timestamp: Utc::now(),
            benchmark: options.benchmark_name.clone(),
            submodule: options.submodule_name.clone(),
            fallback: options.fallback,
            outcome,
            return_code: outcome.code(),
            best_score: None,
            restarts: 0,
            fix_rounds: 0,
            llm_calls: 0,
            oracle_failures: 0,
            fix_path: Vec::new(),
            lint: None,
        }
    }

    /// Record the fixer's verdicts
    #[must_use]
    pub fn with_fix_path(mut self, path: &[FixStep]) -> Self {
        self.fix_path = path.iter().map(|step| step.code()).collect();
        self
    }

    /// Whether the run ended with a perfect translation
    #[must_use]
    pub fn is_solved(&self) -> bool {
        self.outcome.is_solved()
    }

    /// One-line human summary
    #[must_use]
    pub fn summary(&self) -> String {
        let score = self
            .best_score
            .map_or_else(|| "-".to_string(), |s| format!("{s:.3}"));
        format!(
            "{}/{}: {} (code {}), score {score}, {} restarts, {} fix rounds, {} llm calls",
            self.benchmark,
            self.submodule,
            self.outcome,
            self.return_code,
            self.restarts,
            self.fix_rounds,
            self.llm_calls
        )
    }

    /// Write the report as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Read a saved report
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or not a report.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Options {
        Options {
            benchmark_name: "libopenaptx".to_string(),
            submodule_name: "aptx_encode".to_string(),
            ..Options::default()
        }
    }

    #[test]
    fn test_new_report_copies_names_and_code() {
        let report = RunReport::new(&options(), ReturnCode::SolvedByFallback);
        assert_eq!(report.benchmark, "libopenaptx");
        assert_eq!(report.return_code, 2);
        assert_eq!(report.fallback, Fallback::Fix);
        assert!(report.is_solved());
    }

    #[test]
    fn test_fix_path_codes() {
        let report = RunReport::new(&options(), ReturnCode::FixedOnce).with_fix_path(&[
            FixStep::Subset,
            FixStep::Rejected,
            FixStep::Fewer,
        ]);
        assert_eq!(report.fix_path, vec![1, -1, 3]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REPORT_FILE);
        let mut report = RunReport::new(&options(), ReturnCode::Unsolved);
        report.best_score = Some(0.75);
        report.restarts = 3;
        report.save(&path).unwrap();

        let loaded = RunReport::load(&path).unwrap();
        assert_eq!(loaded, report);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"outcome\": \"unsolved\""));
        assert!(!raw.contains("\"lint\""));
    }

    #[test]
    fn test_summary_line() {
        let mut report = RunReport::new(&options(), ReturnCode::SolvedInitially);
        report.best_score = Some(1.0);
        let line = report.summary();
        assert!(line.starts_with("libopenaptx/aptx_encode: solved initially (code 1)"));
        assert!(line.contains("score 1.000"));

        let empty = RunReport::new(&options(), ReturnCode::NoCompilingCandidate).summary();
        assert!(empty.contains("score -"));
    }
}
