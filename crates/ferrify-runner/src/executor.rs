//! Transpilation driver
//!
//! Runs one unit through the whole pipeline: an initial phase that looks for
//! a compiling translation with evidence, then up to `restart_budget`
//! fallback rounds of the configured strategy. Every run ends in one of the
//! [`ReturnCode`] terminal states and leaves a [`RunReport`] in the work
//! directory.

use crate::candidate::{Candidate, CandidateExtra, CandidateFactory, SourceUnit};
use crate::command::CommandRunner;
use crate::compile::CompilationService;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::fixer::{CompileFix, Fixer};
use crate::lints::LintSummary;
use crate::report::{REPORT_FILE, RunReport};
use crate::search::{Proposal, RepairSettings, SearchStats};
use crate::transpiler::Transpiler;
use crate::workspace::Workspace;
use ferrify_gen::{CodeGenerator, ModelParams, QueryEngine, RetryPolicy};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Effective options saved in the work directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Oracle failures above which the oracle counts as mostly unavailable
pub const ORACLE_FAILURE_LIMIT: usize = 5;

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnCode {
    /// No translation both compiled and produced evidence
    NoCompilingCandidate,
    /// The first verified candidate was already equivalent
    SolvedInitially,
    /// A fallback round produced an equivalent candidate
    SolvedByFallback,
    /// Repair cleared the known counterexamples at least once, but fresh
    /// fuzzing kept finding new ones
    FixedOnce,
    /// More than [`ORACLE_FAILURE_LIMIT`] rounds produced no evidence
    OracleMostlyUnavailable,
    /// Some rounds produced no evidence
    OracleSometimesUnavailable,
    /// Budget exhausted
    Unsolved,
}

impl ReturnCode {
    /// Numeric code written to the log and used as the exit status
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::NoCompilingCandidate => 0,
            Self::SolvedInitially => 1,
            Self::SolvedByFallback => 2,
            Self::FixedOnce => 3,
            Self::OracleMostlyUnavailable => 4,
            Self::OracleSometimesUnavailable => 5,
            Self::Unsolved => 6,
        }
    }

    /// Whether the run ended with an equivalent translation
    #[must_use]
    pub const fn is_solved(self) -> bool {
        matches!(self, Self::SolvedInitially | Self::SolvedByFallback)
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoCompilingCandidate => "no compiling candidate",
            Self::SolvedInitially => "solved initially",
            Self::SolvedByFallback => "solved by fallback",
            Self::FixedOnce => "fixed once",
            Self::OracleMostlyUnavailable => "oracle mostly unavailable",
            Self::OracleSometimesUnavailable => "oracle sometimes unavailable",
            Self::Unsolved => "unsolved",
        };
        write!(f, "{text}")
    }
}

/// Terminal state of a fallback loop that never produced an equivalent
/// candidate
#[must_use]
pub fn classify_failure(fixed_once: bool, oracle_failures: usize) -> ReturnCode {
    if fixed_once {
        ReturnCode::FixedOnce
    } else if oracle_failures > ORACLE_FAILURE_LIMIT {
        ReturnCode::OracleMostlyUnavailable
    } else if oracle_failures > 0 {
        ReturnCode::OracleSometimesUnavailable
    } else {
        ReturnCode::Unsolved
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Terminal state
    pub code: ReturnCode,
    /// Last verified candidate
    pub candidate: Option<Candidate>,
    /// Report as written to the work directory
    pub report: RunReport,
}

/// Drives one unit through translation, verification and repair
pub struct Executor {
    options: Options,
    runner: Arc<dyn CommandRunner>,
    generator: Box<dyn CodeGenerator>,
    retry: RetryPolicy,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("options", &self.options)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Create an executor; generator calls use the network retry policy
    #[must_use]
    pub fn new(
        options: Options,
        runner: Arc<dyn CommandRunner>,
        generator: Box<dyn CodeGenerator>,
    ) -> Self {
        Self {
            options,
            runner,
            generator,
            retry: RetryPolicy::network(),
        }
    }

    /// Replace the generator retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Options of this run
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Run the pipeline to a terminal state
    ///
    /// The work directory is wiped first. Unsolved runs are not errors:
    /// they end in a failing [`ReturnCode`].
    ///
    /// # Errors
    ///
    /// Returns configuration errors, a missing source, generation failures
    /// after retries, launch failures and soft-verify protocol violations.
    pub fn run(self) -> Result<RunOutcome> {
        let Self {
            options,
            runner,
            generator,
            retry,
        } = self;
        options.validate()?;

        let work_dir = options.work_dir();
        if work_dir.exists() {
            std::fs::remove_dir_all(&work_dir)?;
        }
        std::fs::create_dir_all(&work_dir)?;
        options.save_json(work_dir.join(SETTINGS_FILE))?;
        tracing::info!(
            benchmark = %options.benchmark_name,
            submodule = %options.submodule_name,
            fallback = %options.fallback,
            "transpilation started"
        );

        let source_path = options.source_path();
        if !source_path.exists() {
            return Err(Error::MissingInput(source_path));
        }
        let source = SourceUnit::load(
            options.language,
            &options.submodule_name,
            &source_path,
            &options.source_json_path(),
        )?;

        let params = ModelParams::with_temperature(options.initial_temperature);
        let engine = QueryEngine::new(generator, options.global_constraints()).with_retry(retry);
        let compiler = CompilationService::new(
            Arc::clone(&runner),
            Workspace::open(options.workspace_dir())?,
        );
        let fixer = match options.comp_fix {
            CompileFix::No => None,
            CompileFix::Base => Some(
                Fixer::new(options.comp_fix_attempt_budget, params)
                    .with_explanations(options.explain_errors),
            ),
        };
        let transpiler = Transpiler::new(
            source.clone(),
            compiler,
            engine,
            options.results_dir(),
            StdRng::seed_from_u64(options.seed.wrapping_add(1)),
        )
        .with_fixer(fixer)
        .with_attempt_budget(options.transpl_attempt_budget)
        .with_cargo_fix(options.cargo_fix)
        .with_params(params);
        let factory = CandidateFactory::new(
            source,
            runner,
            options.verifier.clone(),
            options.sem_fix,
            StdRng::seed_from_u64(options.seed.wrapping_add(2)),
        );

        let mut session = Session {
            options: &options,
            work_dir: &work_dir,
            transpiler,
            factory,
            rng: StdRng::seed_from_u64(options.seed),
            search: SearchStats::default(),
            restarts: 0,
            oracle_failures: 0,
            fixed_once: false,
        };
        let (code, candidate) = session.drive()?;
        let report = session.report(code, candidate.as_ref())?;
        report.save(work_dir.join(REPORT_FILE))?;
        tracing::info!(return_code = code.code(), outcome = %code, "transpilation finished");
        Ok(RunOutcome {
            code,
            candidate,
            report,
        })
    }
}

/// Mutable state of one run
struct Session<'a> {
    options: &'a Options,
    work_dir: &'a Path,
    transpiler: Transpiler,
    factory: CandidateFactory<StdRng>,
    rng: StdRng,
    search: SearchStats,
    restarts: usize,
    oracle_failures: usize,
    fixed_once: bool,
}

impl Session<'_> {
    fn drive(&mut self) -> Result<(ReturnCode, Option<Candidate>)> {
        let Some(mut candidate) = self.initial()? else {
            tracing::info!("no compiling translation with evidence");
            return Ok((ReturnCode::NoCompilingCandidate, None));
        };
        if candidate.is_ok() {
            self.record_coverage(&candidate)?;
            return Ok((ReturnCode::SolvedInitially, Some(candidate)));
        }
        tracing::info!(score = candidate.score(), "translation not equivalent, falling back");

        let settings = RepairSettings {
            budget: self.options.fix_budget,
            n_examples: self.options.n_prompt_examples,
            conversation: self.options.conversation,
            window: self.options.conversation_window_size,
            pruning: self.options.pruning,
        };
        for round in 0..self.options.restart_budget {
            self.restarts += 1;
            if self.options.hinted {
                self.transpiler.hint = candidate.hint(self.options.n_prompt_examples, &mut self.rng);
            }
            let proposal = self.options.fallback.propose_next(
                round,
                &candidate,
                &mut self.transpiler,
                &mut self.factory,
                &settings,
                &mut self.search,
                &mut self.rng,
            )?;
            let next = match proposal {
                Proposal::Verified(next) => next,
                Proposal::Repaired(next) => {
                    self.fixed_once = true;
                    let Some(next) = next else {
                        tracing::warn!(round, "repaired translation produced no evidence");
                        self.oracle_failures += 1;
                        continue;
                    };
                    next
                }
                Proposal::NotCompiling => {
                    tracing::info!(round, "no compiling translation this round");
                    continue;
                }
                Proposal::NoEvidence => {
                    tracing::warn!(round, "oracle unavailable");
                    self.oracle_failures += 1;
                    continue;
                }
            };
            if next.is_ok() {
                tracing::info!(round, strategy = %self.options.fallback, "equivalent translation found");
                self.record_coverage(&next)?;
                return Ok((ReturnCode::SolvedByFallback, Some(next)));
            }
            tracing::info!(round, score = next.score(), "still not equivalent");
            candidate = next;
        }
        Ok((
            classify_failure(self.fixed_once, self.oracle_failures),
            Some(candidate),
        ))
    }

    fn initial(&mut self) -> Result<Option<Candidate>> {
        for attempt in 0..self.options.init_attempt_budget {
            let Some(code) = self.transpiler.transpile()? else {
                tracing::info!(attempt, "translation does not compile, retrying");
                continue;
            };
            tracing::info!(attempt, "found a compiling translation, checking equivalence");
            if let Some(candidate) = self.factory.construct_candidate(&code, None)? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// `cov_report.txt` and `cov_show.txt` of a freshly verified candidate
    fn record_coverage(&self, candidate: &Candidate) -> Result<()> {
        let CandidateExtra::Coverage(coverage) = &candidate.extra else {
            tracing::warn!("no corpus coverage to record");
            return Ok(());
        };
        std::fs::write(self.work_dir.join("cov_report.txt"), &coverage.report)?;
        let show: String = coverage
            .lines
            .iter()
            .map(|line| format!("{}|{}\n", line.count, line.text))
            .collect();
        std::fs::write(self.work_dir.join("cov_show.txt"), show)?;
        Ok(())
    }

    fn lint(&mut self, code: &str) -> Result<LintSummary> {
        let (compiler, _) = self.transpiler.parts_mut();
        compiler.workspace().write_source(code)?;
        let output = compiler
            .runner()
            .cargo_clippy(compiler.workspace().root())
            .into_launched("cargo clippy")?;
        let summary = LintSummary::from_clippy_output(&output.stdout, code);
        tracing::info!(lints = summary.total(), unsafe_code = summary.uses_unsafe, "lint summary");
        Ok(summary)
    }

    fn report(&mut self, code: ReturnCode, candidate: Option<&Candidate>) -> Result<RunReport> {
        let mut report = RunReport::new(self.options, code)
            .with_fix_path(&self.transpiler.stats().fix_path);
        report.best_score = candidate.map(Candidate::score);
        report.restarts = self.restarts;
        report.fix_rounds = self.search.fix_rounds;
        report.llm_calls = self.transpiler.stats().llm_calls + self.search.llm_calls;
        report.oracle_failures = self.oracle_failures;
        if self.options.lint_report && code.is_solved() {
            if let Some(candidate) = candidate {
                report.lint = Some(self.lint(&candidate.code)?);
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, MockCommandRunner};
    use crate::differential::harness_report;
    use crate::oracle::Language;
    use crate::search::Fallback;
    use ferrify_gen::ScriptedGenerator;

    const ADD_C: &str = "int add(int a, int b) { return a + b; }";
    const ADD_RS: &str = "<code>pub fn add(a: i32, b: i32) -> i32 { a + b }</code>";
    const BROKEN: &str = "   Compiling wspace v0.1.0\nerror[E0308]: mismatched types\n --> src/lib.rs:1:1\n\nerror: could not compile `wspace`\n";

    fn positive_only() -> String {
        harness_report(r#"[{"args":["1","2"],"actual":{"ExecutionSuccess":"3"}}]"#, "[]")
    }

    fn mixed() -> String {
        harness_report(
            r#"[{"args":["1","2"],"actual":{"ExecutionSuccess":"3"}}]"#,
            r#"[{"args":["2147483647","1"],"expected":{"ExecutionSuccess":"-2147483648"},"actual":"ExecutionFailure"}]"#,
        )
    }

    fn setup() -> (tempfile::TempDir, Options) {
        let tmp = tempfile::tempdir().unwrap();
        let bench = tmp.path().join("bms").join("c").join("add");
        std::fs::create_dir_all(&bench).unwrap();
        std::fs::write(bench.join("add.c"), ADD_C).unwrap();
        std::fs::write(bench.join("add.json"), "{}").unwrap();
        let options = Options {
            benchmark_name: "add".to_string(),
            submodule_name: "add".to_string(),
            language: Language::C,
            bench_root: tmp.path().join("bms"),
            work_root: tmp.path().join("transpilations"),
            cargo_fix: false,
            ..Options::default()
        };
        (tmp, options)
    }

    fn executor(options: Options, runner: MockCommandRunner, responses: Vec<&str>) -> Executor {
        let generator = ScriptedGenerator::new(responses.into_iter().map(String::from).collect());
        Executor::new(options, Arc::new(runner), Box::new(generator)).with_retry(RetryPolicy::none())
    }

    #[test]
    fn test_return_codes() {
        assert_eq!(ReturnCode::NoCompilingCandidate.code(), 0);
        assert_eq!(ReturnCode::Unsolved.code(), 6);
        assert_eq!(ReturnCode::OracleSometimesUnavailable.to_string(), "oracle sometimes unavailable");
        assert!(ReturnCode::SolvedByFallback.is_solved());
        assert!(!ReturnCode::FixedOnce.is_solved());
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(classify_failure(true, 9), ReturnCode::FixedOnce);
        assert_eq!(classify_failure(false, 6), ReturnCode::OracleMostlyUnavailable);
        assert_eq!(classify_failure(false, 5), ReturnCode::OracleSometimesUnavailable);
        assert_eq!(classify_failure(false, 1), ReturnCode::OracleSometimesUnavailable);
        assert_eq!(classify_failure(false, 0), ReturnCode::Unsolved);
    }

    #[test]
    fn test_solved_initially_writes_artifacts() {
        let (_tmp, options) = setup();
        let work_dir = options.work_dir();
        let outcome = executor(options, MockCommandRunner::new(), vec![ADD_RS])
            .run()
            .unwrap();

        assert_eq!(outcome.code, ReturnCode::SolvedInitially);
        assert_eq!(outcome.report.best_score, Some(1.0));
        assert!(work_dir.join(SETTINGS_FILE).exists());
        assert!(work_dir.join("results").join("add.rs").exists());
        assert!(work_dir.join("cov_report.txt").exists());
        let show = std::fs::read_to_string(work_dir.join("cov_show.txt")).unwrap();
        assert!(show.lines().all(|l| l.contains('|')));

        let saved = RunReport::load(work_dir.join(REPORT_FILE)).unwrap();
        assert_eq!(saved.return_code, 1);
        assert_eq!(saved.llm_calls, 1);
    }

    #[test]
    fn test_work_dir_is_reset() {
        let (_tmp, options) = setup();
        let stale = options.work_dir().join("stale.txt");
        std::fs::create_dir_all(options.work_dir()).unwrap();
        std::fs::write(&stale, "old").unwrap();
        executor(options, MockCommandRunner::new(), vec![ADD_RS])
            .run()
            .unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_no_compiling_candidate() {
        let (_tmp, mut options) = setup();
        options.comp_fix = CompileFix::No;
        options.transpl_attempt_budget = 1;
        options.init_attempt_budget = 2;
        // best-of build plus the rebuild of the best, per attempt
        let runner = MockCommandRunner::new()
            .with_builds((0..4).map(|_| CommandOutput::failure(101, BROKEN)).collect());
        let outcome = executor(options, runner, vec!["<code>x</code>", "<code>y</code>"])
            .run()
            .unwrap();
        assert_eq!(outcome.code, ReturnCode::NoCompilingCandidate);
        assert!(outcome.candidate.is_none());
        assert_eq!(outcome.report.best_score, None);
    }

    #[test]
    fn test_restart_solves_by_fallback() {
        let (_tmp, mut options) = setup();
        options.fallback = Fallback::Restart;
        let runner = MockCommandRunner::new().with_fuzz_reports(vec![mixed(), positive_only()]);
        let outcome = executor(options, runner, vec![ADD_RS, ADD_RS])
            .run()
            .unwrap();
        assert_eq!(outcome.code, ReturnCode::SolvedByFallback);
        assert_eq!(outcome.report.restarts, 1);
        assert_eq!(outcome.report.llm_calls, 2);
    }

    #[test]
    fn test_oracle_sometimes_unavailable() {
        let (_tmp, mut options) = setup();
        options.fallback = Fallback::Restart;
        options.restart_budget = 2;
        let runner = MockCommandRunner::new().with_fuzz_reports(vec![
            mixed(),
            "no report".to_string(),
            "no report".to_string(),
        ]);
        let outcome = executor(options, runner, vec![ADD_RS; 3]).run().unwrap();
        assert_eq!(outcome.code, ReturnCode::OracleSometimesUnavailable);
        assert_eq!(outcome.report.oracle_failures, 2);
        assert_eq!(outcome.report.best_score, Some(0.5));
    }

    #[test]
    fn test_restart_without_progress_is_unsolved() {
        let (_tmp, mut options) = setup();
        options.fallback = Fallback::Restart;
        options.restart_budget = 2;
        let runner = MockCommandRunner::new().with_fuzz_report(mixed());
        let outcome = executor(options, runner, vec![ADD_RS; 3]).run().unwrap();
        assert_eq!(outcome.code, ReturnCode::Unsolved);
        assert_eq!(outcome.report.restarts, 2);
    }

    #[test]
    fn test_fix_clears_counterexamples_but_fresh_fuzzing_finds_more() {
        let (_tmp, mut options) = setup();
        options.restart_budget = 1;
        options.fix_budget = 1;
        let runner = MockCommandRunner::new().with_fuzz_report(mixed());
        let repaired = "<code>pub fn add(a: i32, b: i32) -> i32 { a.wrapping_add(b) }</code>";
        let outcome = executor(options, runner, vec![ADD_RS, repaired]).run().unwrap();
        assert_eq!(outcome.code, ReturnCode::FixedOnce);
        assert_eq!(outcome.report.fix_rounds, 1);
    }

    #[test]
    fn test_fix_solves_by_fallback() {
        let (_tmp, mut options) = setup();
        options.restart_budget = 1;
        let runner = MockCommandRunner::new().with_fuzz_reports(vec![mixed(), positive_only()]);
        let repaired = "<code>pub fn add(a: i32, b: i32) -> i32 { a.wrapping_add(b) }</code>";
        let outcome = executor(options, runner, vec![ADD_RS, repaired]).run().unwrap();
        assert_eq!(outcome.code, ReturnCode::SolvedByFallback);
        assert!(outcome.candidate.unwrap().code.contains("wrapping_add"));
    }

    #[test]
    fn test_lint_report_on_success() {
        let (_tmp, mut options) = setup();
        options.lint_report = true;
        let runner = MockCommandRunner::new().with_clippy_output(
            r#"{"reason":"compiler-message","message":{"code":{"code":"clippy::needless_return","explanation":null},"level":"warning"}}"#,
        );
        let outcome = executor(options, runner.clone(), vec![ADD_RS]).run().unwrap();
        let lint = outcome.report.lint.unwrap();
        assert_eq!(lint.lints.get("needless_return"), Some(&1));
        assert_eq!(runner.count("cargo_clippy"), 1);
    }

    #[test]
    fn test_invalid_options_rejected_before_work() {
        let (_tmp, mut options) = setup();
        options.conversation = true;
        options.n_prompt_examples = 0;
        let work_dir = options.work_dir();
        let err = executor(options, MockCommandRunner::new(), vec![]).run().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!work_dir.exists());
    }

    #[test]
    fn test_missing_source() {
        let (_tmp, mut options) = setup();
        options.submodule_name = "absent".to_string();
        let err = executor(options, MockCommandRunner::new(), vec![]).run().unwrap_err();
        assert!(matches!(err, Error::MissingInput(_)));
    }
}
