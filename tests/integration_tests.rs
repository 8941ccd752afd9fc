//! Integration tests for ferrify
//!
//! Drive the pipeline across both crates with scripted generators and a
//! mocked toolchain.

use ferrify::generator::{RetryPolicy, ScriptedGenerator};
use ferrify::runner::{
    BackoffConfig, CandidateFactory, CommandOutput, DifferentialVerifier, ExecutionResult,
    Executor, Fallback, Language, MockCommandRunner, Options, ReturnCode, RunReport,
    SemanticFix, SourceUnit, harness_report,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const ADD_C: &str = "int add(int a, int b) { return a + b; }";
const ADD_RS: &str = "pub fn add(a: i32, b: i32) -> i32 { a + b }";

fn add_unit() -> SourceUnit {
    SourceUnit {
        language: Language::C,
        name: "add".to_string(),
        code: ADD_C.to_string(),
        json: "{}".to_string(),
    }
}

fn positive_report() -> String {
    harness_report(
        r#"[{"args":["1","2"],"actual":{"ExecutionSuccess":"3"}},{"args":["-5","5"],"actual":{"ExecutionSuccess":"0"}}]"#,
        "[]",
    )
}

fn overflow_report() -> String {
    harness_report(
        r#"[{"args":["1","2"],"actual":{"ExecutionSuccess":"3"}}]"#,
        r#"[{"args":["2147483647","1"],"expected":{"ExecutionSuccess":"-2147483648"},"actual":"ExecutionFailure"}]"#,
    )
}

fn factory(runner: MockCommandRunner) -> CandidateFactory<StdRng> {
    CandidateFactory::new(
        add_unit(),
        Arc::new(runner),
        BackoffConfig::default(),
        SemanticFix::Base,
        StdRng::seed_from_u64(123),
    )
}

fn bench(root: &Path) -> Options {
    let dir = root.join("bms").join("c").join("add");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("add.c"), ADD_C).unwrap();
    std::fs::write(dir.join("add.json"), "{}").unwrap();
    Options {
        benchmark_name: "add".to_string(),
        submodule_name: "add".to_string(),
        language: Language::C,
        bench_root: root.join("bms"),
        work_root: root.join("transpilations"),
        cargo_fix: false,
        ..Options::default()
    }
}

fn run(options: Options, runner: MockCommandRunner, responses: usize) -> ferrify::runner::RunOutcome {
    let generator = ScriptedGenerator::new(vec![format!("<code>{ADD_RS}</code>"); responses]);
    Executor::new(options, Arc::new(runner), Box::new(generator))
        .with_retry(RetryPolicy::none())
        .run()
        .unwrap()
}

/// A correct translation of `add` scores 1.0
#[test]
fn test_add_translation_is_equivalent() {
    let runner = MockCommandRunner::new().with_fuzz_report(positive_report());
    let candidate = factory(runner.clone())
        .construct_candidate(ADD_RS, None)
        .unwrap()
        .unwrap();

    assert!((candidate.score() - 1.0).abs() < f64::EPSILON);
    assert!(candidate.is_ok());
    assert!(candidate.examples.negative.is_empty());
    assert_eq!(candidate.examples.positive.len(), 2);
    assert_eq!(runner.count("instrument_c"), 1);
    assert_eq!(runner.count("fuzz_run"), 1);
}

/// End to end: generation, compile, instrument, verify ends in the OK state
#[test]
fn test_add_pipeline_solved_initially() {
    let tmp = tempfile::tempdir().unwrap();
    let options = bench(tmp.path());
    let work_dir = options.work_dir();
    let outcome = run(options, MockCommandRunner::new().with_fuzz_report(positive_report()), 1);

    assert_eq!(outcome.code, ReturnCode::SolvedInitially);
    assert_eq!(outcome.code.code(), 1);
    let saved = RunReport::load(work_dir.join("report.json")).unwrap();
    assert_eq!(saved.best_score, Some(1.0));
    assert_eq!(
        std::fs::read_to_string(work_dir.join("results").join("add.rs")).unwrap(),
        ADD_RS
    );
}

/// Unchecked `a + b` panics where the C reference wraps around
#[test]
fn test_overflow_counterexample() {
    let runner = MockCommandRunner::new().with_fuzz_report(overflow_report());
    let candidate = factory(runner)
        .construct_candidate(ADD_RS, None)
        .unwrap()
        .unwrap();

    assert!(!candidate.is_ok());
    assert!((candidate.score() - 0.5).abs() < f64::EPSILON);
    let counterexample = &candidate.examples.negative[0];
    assert_eq!(counterexample.args, vec!["2147483647", "1"]);
    assert_eq!(
        counterexample.expected,
        ExecutionResult::ExecutionSuccess("-2147483648".to_string())
    );
    assert_eq!(counterexample.actual, ExecutionResult::ExecutionFailure);
    assert!(!counterexample.is_agreement());
}

/// A harness that always times out walks the whole ladder, then gives up
#[test]
fn test_backoff_ladder_then_no_evidence() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockCommandRunner::new().with_fuzz_timeout();
    let config = BackoffConfig {
        retry_limit: 2,
        ..BackoffConfig::default()
    };
    let verifier = DifferentialVerifier::new(Arc::new(runner.clone()), config);

    let evidence = verifier.verify(dir.path(), "add", None).unwrap();

    assert!(evidence.is_none());
    assert_eq!(
        runner.fuzz_calls(),
        vec![
            (32_768, Duration::from_secs(420)),
            (131_072, Duration::from_secs(840)),
            (524_288, Duration::from_secs(1680)),
        ]
    );
}

/// Every non-fix strategy solves once fresh fuzzing comes back clean
#[test]
fn test_fallback_strategies_solve_by_fallback() {
    for fallback in [
        Fallback::Restart,
        Fallback::ParamSearch,
        Fallback::PromptSearch,
    ] {
        let tmp = tempfile::tempdir().unwrap();
        let mut options = bench(tmp.path());
        options.fallback = fallback;
        let runner = MockCommandRunner::new()
            .with_fuzz_reports(vec![overflow_report(), positive_report()]);
        let outcome = run(options, runner, 2);
        assert_eq!(outcome.code, ReturnCode::SolvedByFallback, "{fallback}");
        assert_eq!(outcome.report.restarts, 1);
    }
}

/// Simplify translates the sidecar's header, then one function at a time
#[test]
fn test_simplify_translates_piecewise() {
    let tmp = tempfile::tempdir().unwrap();
    let mut options = bench(tmp.path());
    options.fallback = Fallback::Simplify;
    let sidecar = r##"{"Includes":["#include <stdint.h>"],"Function Declarations":["int add(int a, int b);"],"Function Implementations":["int add(int a, int b) { return a + b; }"]}"##;
    std::fs::write(options.source_json_path(), sidecar).unwrap();
    let runner =
        MockCommandRunner::new().with_fuzz_reports(vec![overflow_report(), positive_report()]);
    let generator = ScriptedGenerator::new(vec![
        format!("<code>{ADD_RS}</code>"),
        "<code></code>".to_string(),
        format!("<code>{ADD_RS}</code>"),
    ]);
    let prompts = generator.received();
    let outcome = Executor::new(options, Arc::new(runner), Box::new(generator))
        .with_retry(RetryPolicy::none())
        .run()
        .unwrap();

    assert_eq!(outcome.code, ReturnCode::SolvedByFallback);
    assert_eq!(outcome.candidate.unwrap().code.trim(), ADD_RS);
    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].context.contains("#include <stdint.h>"));
    assert!(prompts[2].context.contains("return a + b;"));
}

/// Fix clears the counterexamples; fresh fuzzing keeps finding new ones
#[test]
fn test_fix_fallback_reports_fixed_once() {
    let tmp = tempfile::tempdir().unwrap();
    let mut options = bench(tmp.path());
    options.restart_budget = 2;
    options.fix_budget = 1;
    let runner = MockCommandRunner::new().with_fuzz_report(overflow_report());
    let outcome = run(options, runner, 3);
    assert_eq!(outcome.code, ReturnCode::FixedOnce);
    assert_eq!(outcome.report.fix_rounds, 2);
}

/// More than five rounds without evidence means the oracle is mostly down
#[test]
fn test_oracle_mostly_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let mut options = bench(tmp.path());
    options.fallback = Fallback::Restart;
    options.restart_budget = 6;
    let mut reports = vec![overflow_report()];
    reports.extend(std::iter::repeat_n("no sections".to_string(), 6));
    let runner = MockCommandRunner::new().with_fuzz_reports(reports);
    let outcome = run(options, runner, 7);
    assert_eq!(outcome.code, ReturnCode::OracleMostlyUnavailable);
    assert_eq!(outcome.report.oracle_failures, 6);
}

/// A translation that never compiles and has no fixer never reaches
/// verification
#[test]
fn test_never_compiling() {
    let tmp = tempfile::tempdir().unwrap();
    let mut options = bench(tmp.path());
    options.comp_fix = ferrify::runner::CompileFix::No;
    options.transpl_attempt_budget = 1;
    options.init_attempt_budget = 1;
    let broken = "   Compiling wspace v0.1.0\nerror[E0425]: cannot find value `c` in this scope\n --> src/lib.rs:1:40\n\nerror: could not compile `wspace`\n";
    let runner = MockCommandRunner::new().with_builds(vec![
        CommandOutput::failure(101, broken),
        CommandOutput::failure(101, broken),
    ]);
    let outcome = run(options, runner.clone(), 1);
    assert_eq!(outcome.code, ReturnCode::NoCompilingCandidate);
    assert_eq!(runner.count("fuzz_run"), 0);
}
