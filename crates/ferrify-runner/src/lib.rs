//! Ferrify Runner
//!
//! Candidate evaluation and repair loop for LLM-produced Rust translations
//! of C and Go units. A translation is compiled in a reused workspace,
//! instrumented against the original as an oracle, differentially fuzzed,
//! scored, and repaired with compiler diagnostics or counterexamples until
//! it is equivalent or the budgets run out.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
// Allow common patterns
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
// Allow common patterns in test code
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::redundant_clone))]
#![cfg_attr(test, allow(clippy::float_cmp))]

pub mod candidate;
pub mod command;
pub mod compile;
pub mod config;
pub mod coverage;
pub mod diagnostics;
pub mod differential;
pub mod error;
pub mod example;
pub mod executor;
pub mod fixer;
pub mod lints;
pub mod oracle;
pub mod process;
pub mod report;
pub mod search;
pub mod transpiler;
pub mod workspace;

pub use candidate::{
    Candidate, CandidateExtra, CandidateFactory, Enhancement, REPAIR_GROUP_SIZE, SemanticFix,
    SourceUnit,
};
pub use command::{CommandOutput, CommandRunner, MockCommandRunner, RealCommandRunner};
pub use compile::{CargoFixReport, CompilationService, CompileAttempt};
pub use config::{Options, ToolPaths};
pub use coverage::{
    CoverageBucket, CoverageEngine, CoverageLine, CoverageReport, LineScore, SbflTechnique,
    bucket_by_signature, ochiai, tarantula,
};
pub use diagnostics::{CompilationOutcome, ErrorRecord, parse_coarse, parse_phased};
pub use differential::{BackoffConfig, DifferentialVerifier, harness_report, parse_report};
pub use error::{Error, Result};
pub use example::{ExampleSet, ExecutionResult, IoExample, parse_examples};
pub use executor::{Executor, ReturnCode, RunOutcome, classify_failure};
pub use fixer::{CompileFix, FixOutcome, FixStep, Fixer, compare};
pub use lints::{LintCategory, LintSummary, category_of};
pub use oracle::{Language, OracleBuilder};
pub use process::{ProcessGuard, run_with_timeout};
pub use report::RunReport;
pub use search::{Fallback, Proposal, RepairSettings, SearchStats, SemanticRepair, mutate_temperature};
pub use transpiler::{DecomposedSource, PromptMode, TranspileStats, Transpiler};
pub use workspace::{Workspace, WorkspaceLease};
