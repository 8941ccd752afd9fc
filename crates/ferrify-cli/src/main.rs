//! Ferrify CLI
//!
//! Command-line interface for transpilation runs and their building blocks.

#![allow(clippy::doc_markdown)]

use clap::{Parser, Subcommand};
use ferrify_cli::{
    CliResult, RunOverrides, default_config_yaml, diagnose_file, load_options, parse_fallback,
    real_runner, resolve_generator, run_transpilation, verify_harness,
};
use ferrify_runner::{BackoffConfig, Fallback, Options};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ferrify")]
#[command(about = "LLM-driven C/Go to Rust transpilation with differential verification", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Mirror log output to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transpile one unit
    Run {
        /// Path to the options file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Generator command line; the request is written to its stdin as JSON
        #[arg(long)]
        generator: Option<String>,

        /// Fallback strategy (restart, param-search, prompt-search, simplify, fix)
        #[arg(long, value_parser = parse_fallback)]
        fallback: Option<Fallback>,

        /// Fallback rounds
        #[arg(long)]
        restart_budget: Option<usize>,

        /// Semantic repair rounds per fallback round
        #[arg(long)]
        fix_budget: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Run tag, part of the work directory path
        #[arg(long)]
        tag: Option<String>,

        /// Summarize clippy lints of a solved translation
        #[arg(long)]
        lint_report: bool,
    },

    /// Parse a saved cargo stderr log
    Diagnose {
        /// File holding the build's stderr
        #[arg(value_name = "STDERR")]
        stderr: PathBuf,

        /// Use the coarse parser (no phase tracking)
        #[arg(long)]
        coarse: bool,

        /// Crate whose Compiling line starts the log
        #[arg(long, default_value = "wspace")]
        crate_name: String,
    },

    /// Verify an instrumented harness
    Verify {
        /// Harness directory
        #[arg(value_name = "HARNESS")]
        harness: PathBuf,

        /// Unit name, for logging
        #[arg(long, default_value = "unit")]
        name: String,

        /// Examples to replay instead of fuzzing
        #[arg(long)]
        examples: Option<PathBuf>,

        /// Options file supplying tool paths and verifier limits
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default options as YAML
    Config,
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<(), String> {
    let filter = if verbose { "debug" } else { "info" };
    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .map_err(|e| format!("Failed to create {}: {e}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn report(result: &CliResult) -> ExitCode {
    match result {
        CliResult::Success(msg) => {
            println!("{msg}");
            ExitCode::SUCCESS
        }
        CliResult::Error(msg) => {
            eprintln!("Error: {msg}");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Commands::Run {
            config,
            generator,
            fallback,
            restart_budget,
            fix_budget,
            seed,
            tag,
            lint_report,
        } => {
            let overrides = RunOverrides {
                fallback,
                restart_budget,
                fix_budget,
                seed,
                tag,
                lint_report,
            };
            let options = match load_options(&config, &overrides) {
                Ok(options) => options,
                Err(e) => return report(&CliResult::Error(e)),
            };
            let generator = match resolve_generator(generator.as_deref()) {
                Ok(generator) => generator,
                Err(e) => return report(&CliResult::Error(e)),
            };
            let runner = real_runner(&options);
            let (result, code) = run_transpilation(options, runner, Box::new(generator));
            let exit = report(&result);
            match code {
                Some(code) if !code.is_solved() => ExitCode::from(2),
                _ => exit,
            }
        }
        Commands::Diagnose {
            stderr,
            coarse,
            crate_name,
        } => report(&diagnose_file(&stderr, coarse, &crate_name)),
        Commands::Verify {
            harness,
            name,
            examples,
            config,
        } => {
            let options = match config {
                Some(path) => match Options::from_file(&path) {
                    Ok(options) => options,
                    Err(e) => {
                        return report(&CliResult::Error(format!(
                            "Failed to load {}: {e}",
                            path.display()
                        )));
                    }
                },
                None => Options::default(),
            };
            let backoff: BackoffConfig = options.verifier.clone();
            let runner = real_runner(&options);
            report(&verify_harness(
                &harness,
                &name,
                examples.as_deref(),
                runner,
                backoff,
            ))
        }
        Commands::Config => report(&default_config_yaml()),
    }
}
