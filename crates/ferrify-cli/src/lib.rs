//! Ferrify CLI Library
//!
//! Library functions behind the `ferrify` binary.

#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
// Allow common patterns in test code
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

use ferrify_gen::{CodeGenerator, CommandGenerator};
use ferrify_runner::{
    BackoffConfig, CommandRunner, DifferentialVerifier, ExampleSet, Executor, Fallback, Options,
    RealCommandRunner, ReturnCode, parse_coarse, parse_examples, parse_phased,
};
use std::path::Path;
use std::sync::Arc;

/// Environment variable naming the generator command when `--generator` is
/// not given
pub const GENERATOR_ENV: &str = "FERRIFY_GENERATOR";

/// Result of a CLI operation
#[derive(Debug)]
pub enum CliResult {
    /// Operation succeeded
    Success(String),
    /// Operation failed with error
    Error(String),
}

impl CliResult {
    /// Returns true if the result is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the message
    pub fn message(&self) -> &str {
        match self {
            Self::Success(msg) | Self::Error(msg) => msg,
        }
    }
}

/// Command-line overrides applied on top of a config file
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    /// Fallback strategy
    pub fallback: Option<Fallback>,
    /// Fallback rounds
    pub restart_budget: Option<usize>,
    /// Semantic repair rounds per fallback round
    pub fix_budget: Option<usize>,
    /// Random seed
    pub seed: Option<u64>,
    /// Run tag
    pub tag: Option<String>,
    /// Summarize clippy lints of a solved translation
    pub lint_report: bool,
}

impl RunOverrides {
    /// Apply the overrides that were given
    pub fn apply(&self, options: &mut Options) {
        if let Some(fallback) = self.fallback {
            options.fallback = fallback;
        }
        if let Some(budget) = self.restart_budget {
            options.restart_budget = budget;
        }
        if let Some(budget) = self.fix_budget {
            options.fix_budget = budget;
        }
        if let Some(seed) = self.seed {
            options.seed = seed;
        }
        if let Some(tag) = &self.tag {
            options.tag.clone_from(tag);
        }
        options.lint_report |= self.lint_report;
    }
}

/// Parse a fallback name as accepted in config files
pub fn parse_fallback(name: &str) -> Result<Fallback, String> {
    serde_yaml::from_str(name).map_err(|_| {
        format!("Unknown fallback '{name}': expected restart, param-search, prompt-search, simplify or fix")
    })
}

/// Load options from `config` and apply `overrides`
pub fn load_options(config: &Path, overrides: &RunOverrides) -> Result<Options, String> {
    let mut options = Options::from_file(config)
        .map_err(|e| format!("Failed to load {}: {e}", config.display()))?;
    overrides.apply(&mut options);
    options.validate().map_err(|e| e.to_string())?;
    tracing::debug!(
        config = %config.display(),
        benchmark = %options.benchmark_name,
        fallback = %options.fallback,
        "options loaded"
    );
    Ok(options)
}

/// Generator command from the flag, else from [`GENERATOR_ENV`]
pub fn resolve_generator(flag: Option<&str>) -> Result<CommandGenerator, String> {
    let line = match flag {
        Some(line) => line.to_string(),
        None => std::env::var(GENERATOR_ENV)
            .map_err(|_| format!("No generator given: pass --generator or set {GENERATOR_ENV}"))?,
    };
    CommandGenerator::from_command_line(&line).map_err(|e| e.to_string())
}

/// Runner over the real toolchain with the configured tool paths
pub fn real_runner(options: &Options) -> Arc<dyn CommandRunner> {
    Arc::new(
        RealCommandRunner::with_tools(options.tools.clone())
            .with_rss_limit(options.verifier.rss_limit_mb),
    )
}

/// Run one transpilation, returning the terminal code alongside the result
pub fn run_transpilation(
    options: Options,
    runner: Arc<dyn CommandRunner>,
    generator: Box<dyn CodeGenerator>,
) -> (CliResult, Option<ReturnCode>) {
    match Executor::new(options, runner, generator).run() {
        Ok(outcome) => (
            CliResult::Success(outcome.report.summary()),
            Some(outcome.code),
        ),
        Err(e) => (CliResult::Error(format!("Transpilation failed: {e}")), None),
    }
}

/// Parse a saved cargo stderr log and render the outcome as JSON
pub fn diagnose_file(path: &Path, coarse: bool, crate_name: &str) -> CliResult {
    let stderr = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => return CliResult::Error(format!("Failed to read {}: {e}", path.display())),
    };
    let outcome = if coarse {
        parse_coarse(&stderr)
    } else {
        parse_phased(&stderr, crate_name)
    };
    match serde_json::to_string_pretty(&outcome) {
        Ok(json) => CliResult::Success(json),
        Err(e) => CliResult::Error(format!("Failed to serialize outcome: {e}")),
    }
}

/// Verify an instrumented harness, soft-verifying when `examples` is given
pub fn verify_harness(
    harness: &Path,
    name: &str,
    examples: Option<&Path>,
    runner: Arc<dyn CommandRunner>,
    backoff: BackoffConfig,
) -> CliResult {
    let verifier = DifferentialVerifier::new(runner, backoff);
    let result = match examples {
        None => verifier.verify(harness, name, None),
        Some(path) => match load_example_set(path) {
            Ok(set) => verifier.soft_verify(harness, name, &set),
            Err(e) => return CliResult::Error(e),
        },
    };
    match result {
        Ok(Some(set)) => match serde_json::to_string_pretty(&set) {
            Ok(json) => CliResult::Success(json),
            Err(e) => CliResult::Error(format!("Failed to serialize examples: {e}")),
        },
        Ok(None) => CliResult::Error("Verification produced no evidence".to_string()),
        Err(e) => CliResult::Error(format!("Verification failed: {e}")),
    }
}

/// Examples to replay: an `ExampleSet` object or a bare example array
fn load_example_set(path: &Path) -> Result<ExampleSet, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    if let Ok(set) = serde_json::from_str::<ExampleSet>(&json) {
        return Ok(set);
    }
    let examples = parse_examples(&json).map_err(|e| format!("Invalid examples: {e}"))?;
    let (positive, negative) = examples.into_iter().partition(|e| e.is_agreement());
    Ok(ExampleSet { positive, negative })
}

/// Default options as YAML
pub fn default_config_yaml() -> CliResult {
    match Options::default().to_yaml() {
        Ok(yaml) => CliResult::Success(yaml),
        Err(e) => CliResult::Error(format!("Failed to render defaults: {e}")),
    }
}
