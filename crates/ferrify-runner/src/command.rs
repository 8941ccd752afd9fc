//! Command execution abstraction for testability
//!
//! Every external tool the pipeline drives (cargo, the instrumentors, cmake,
//! go, the fuzz runner, llvm coverage tools) is reached through the
//! [`CommandRunner`] trait, so the evaluation loop can be tested against
//! [`MockCommandRunner`].

use crate::config::ToolPaths;
use crate::error::{Error, Result};
use crate::process::run_with_timeout;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// Flags that make rustc report which compiler pass emitted each diagnostic
pub const DIAGNOSTIC_RUSTFLAGS: &str = "-Z track-diagnostics -Z time-passes";

/// Flags for source-based coverage builds
pub const COVERAGE_RUSTFLAGS: &str =
    "-Zunstable-options -C instrument-coverage=except-unused-functions";

/// Default libFuzzer memory ceiling
pub const DEFAULT_RSS_LIMIT_MB: u64 = 8096;

/// Result of executing a command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code (negative for signals, kills and launch failures)
    pub exit_code: i32,
    /// Whether the command succeeded
    pub success: bool,
    /// Whether the command was killed on timeout
    pub timed_out: bool,
    /// Whether the process could be started at all
    pub launched: bool,
}

impl CommandOutput {
    /// Create a successful command output
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self::with_output(stdout, "", 0)
    }

    /// Create a failed command output
    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::with_output("", stderr, exit_code)
    }

    /// Create output with both stdout and stderr
    #[must_use]
    pub fn with_output(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            success: exit_code == 0,
            timed_out: false,
            launched: true,
        }
    }

    /// Output of a process killed on its deadline
    #[must_use]
    pub fn timeout(stderr: impl Into<String>) -> Self {
        Self {
            timed_out: true,
            ..Self::failure(-1, stderr)
        }
    }

    /// Output of a process that never started
    #[must_use]
    pub fn launch_failure(reason: impl Into<String>) -> Self {
        Self {
            launched: false,
            ..Self::failure(-1, reason)
        }
    }

    /// Keep the output if the process started
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] if it never started.
    pub fn into_launched(self, command: &str) -> Result<Self> {
        if self.launched {
            Ok(self)
        } else {
            Err(Error::Launch {
                command: command.to_string(),
                reason: self.stderr,
            })
        }
    }

    /// Keep the output if the process started and exited zero
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] or [`Error::CommandFailed`].
    pub fn into_success(self, command: &str) -> Result<Self> {
        let output = self.into_launched(command)?;
        if output.success {
            return Ok(output);
        }
        tracing::debug!(command, stderr = %output.stderr, "tool failed");
        Err(Error::CommandFailed {
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        })
    }
}

/// Trait for executing the pipeline's external tools
///
/// Implementations never fail: every outcome, including launch failure and
/// timeout, is described by the returned [`CommandOutput`].
pub trait CommandRunner: Send + Sync {
    /// `cargo init --lib` in `dir`
    fn cargo_init(&self, dir: &Path) -> CommandOutput;

    /// `cargo clean` for the project in `dir`
    fn cargo_clean(&self, dir: &Path) -> CommandOutput;

    /// `cargo build` with diagnostic tracking and pass timing enabled
    fn cargo_build(&self, dir: &Path) -> CommandOutput;

    /// `cargo fix --allow-no-vcs`
    fn cargo_fix(&self, dir: &Path) -> CommandOutput;

    /// `cargo clippy` with JSON diagnostics
    fn cargo_clippy(&self, dir: &Path) -> CommandOutput;

    /// `rustc --explain <code>`
    fn rustc_explain(&self, code: &str) -> CommandOutput;

    /// Go instrumentor, rewriting `source` in place
    fn instrument_go(&self, source: &Path) -> CommandOutput;

    /// `go fmt <source>`
    fn go_fmt(&self, source: &Path) -> CommandOutput;

    /// `go build -buildmode c-shared -o <library> <source>`
    fn go_build_shared(&self, source: &Path, library: &Path) -> CommandOutput;

    /// C instrumentor: `-f <unit> -o <output>`
    fn instrument_c(&self, unit: &Path, output: &Path) -> CommandOutput;

    /// `cmake -S <source_dir> -B <build_dir>`
    fn cmake_configure(&self, source_dir: &Path, build_dir: &Path) -> CommandOutput;

    /// `cmake --build <build_dir>`
    fn cmake_build(&self, build_dir: &Path) -> CommandOutput;

    /// Rust instrumentor: emits a differential harness for `rust_file` into
    /// `output`, linked against `ground_truth`
    fn instrument_rust(
        &self,
        rust_file: &Path,
        output: &Path,
        ground_truth: &Path,
        examples: usize,
    ) -> CommandOutput;

    /// `cargo bolero list` for the harness
    fn fuzz_list(&self, harness: &Path) -> CommandOutput;

    /// `cargo bolero test <entry>` with the given input length, under a timeout
    fn fuzz_run(
        &self,
        harness: &Path,
        entry: &str,
        max_len: u64,
        timeout: Duration,
    ) -> CommandOutput;

    /// Replay a JSON example array through the harness (`--features replay`)
    fn replay(&self, harness: &Path, examples: &str, timeout: Duration) -> CommandOutput;

    /// Build the coverage-instrumented test binary without running it
    fn coverage_build(&self, harness: &Path, replay: bool) -> CommandOutput;

    /// Run the coverage-instrumented tests, replaying `examples` when given,
    /// else the fuzz corpus
    fn coverage_run(&self, harness: &Path, examples: Option<&str>) -> CommandOutput;

    /// `llvm-profdata merge` of every `*.profraw` in the harness
    fn profdata_merge(&self, harness: &Path) -> CommandOutput;

    /// `llvm-cov report` for `binary`
    fn coverage_report(&self, harness: &Path, binary: &str) -> CommandOutput;

    /// `llvm-cov show` for `binary`, with per-line counts
    fn coverage_show(&self, harness: &Path, binary: &str) -> CommandOutput;
}

/// Real command runner that executes actual subprocess commands
#[derive(Debug, Clone)]
pub struct RealCommandRunner {
    /// Tool locations
    pub tools: ToolPaths,
    /// libFuzzer `-rss_limit_mb`
    pub rss_limit_mb: u64,
    llvm_cov: OnceLock<Option<PathBuf>>,
    llvm_profdata: OnceLock<Option<PathBuf>>,
}

impl Default for RealCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl RealCommandRunner {
    /// Runner using tools found on `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self::with_tools(ToolPaths::default())
    }

    /// Runner with explicit tool locations
    #[must_use]
    pub fn with_tools(tools: ToolPaths) -> Self {
        Self {
            tools,
            rss_limit_mb: DEFAULT_RSS_LIMIT_MB,
            llvm_cov: OnceLock::new(),
            llvm_profdata: OnceLock::new(),
        }
    }

    /// Set the fuzzer memory ceiling
    #[must_use]
    pub fn with_rss_limit(mut self, rss_limit_mb: u64) -> Self {
        self.rss_limit_mb = rss_limit_mb;
        self
    }

    fn execute(
        &self,
        command: &mut Command,
        stdin: Option<&str>,
        timeout: Option<Duration>,
    ) -> CommandOutput {
        let program = command.get_program().to_string_lossy().into_owned();
        match run_with_timeout(command, stdin, timeout) {
            Ok(out) if out.timed_out => CommandOutput::timeout(out.stderr),
            Ok(out) => CommandOutput {
                exit_code: out.exit_code(),
                success: out.success(),
                stdout: out.stdout,
                stderr: out.stderr,
                timed_out: false,
                launched: true,
            },
            Err(e) => CommandOutput::launch_failure(format!("Failed to execute {program}: {e}")),
        }
    }

    fn cargo(&self, subcommand: &str, dir: &Path) -> Command {
        let mut command = Command::new(&self.tools.cargo);
        command
            .arg(subcommand)
            .arg("--manifest-path")
            .arg(dir.join("Cargo.toml"));
        command
    }

    fn harness_cargo(&self, subcommand: &str, harness: &Path) -> Command {
        let mut command = self.cargo(subcommand, harness);
        command
            .env("LD_LIBRARY_PATH", harness)
            .env("RUSTFLAGS", format!("-L {}", harness.display()));
        command
    }

    fn coverage_cargo(&self, harness: &Path, replay: bool) -> Command {
        let mut command = self.cargo("test", harness);
        if replay {
            command.args(["--features", "replay"]);
        }
        command
            .env("LD_LIBRARY_PATH", harness)
            .env(
                "RUSTFLAGS",
                format!("{COVERAGE_RUSTFLAGS} -L {}", harness.display()),
            )
            .env("LLVM_PROFILE_FILE", harness.join("cov-%p-%m.profraw"));
        command
    }

    fn llvm_tool(&self, name: &str) -> Option<PathBuf> {
        let cell = if name == "llvm-cov" {
            &self.llvm_cov
        } else {
            &self.llvm_profdata
        };
        cell.get_or_init(|| {
            if let Some(dir) = &self.tools.llvm_bin_dir {
                return Some(dir.join(name));
            }
            let sysroot = self.execute(Command::new("rustc").args(["--print", "sysroot"]), None, None);
            if !sysroot.success {
                return None;
            }
            walkdir::WalkDir::new(sysroot.stdout.trim())
                .into_iter()
                .filter_map(std::result::Result::ok)
                .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
                .map(walkdir::DirEntry::into_path)
        })
        .clone()
    }

    fn missing_tool(name: &str) -> CommandOutput {
        CommandOutput::launch_failure(format!("{name} not found in the rust sysroot"))
    }
}

impl CommandRunner for RealCommandRunner {
    fn cargo_init(&self, dir: &Path) -> CommandOutput {
        self.execute(
            Command::new(&self.tools.cargo).args(["init", "--lib"]).arg(dir),
            None,
            None,
        )
    }

    fn cargo_clean(&self, dir: &Path) -> CommandOutput {
        self.execute(&mut self.cargo("clean", dir), None, None)
    }

    fn cargo_build(&self, dir: &Path) -> CommandOutput {
        let mut command = self.cargo("build", dir);
        command.env("RUSTFLAGS", DIAGNOSTIC_RUSTFLAGS);
        self.execute(&mut command, None, None)
    }

    fn cargo_fix(&self, dir: &Path) -> CommandOutput {
        let mut command = self.cargo("fix", dir);
        command.arg("--allow-no-vcs");
        self.execute(&mut command, None, None)
    }

    fn cargo_clippy(&self, dir: &Path) -> CommandOutput {
        let mut command = self.cargo("clippy", dir);
        command.arg("--message-format=json");
        self.execute(&mut command, None, None)
    }

    fn rustc_explain(&self, code: &str) -> CommandOutput {
        self.execute(Command::new("rustc").args(["--explain", code]), None, None)
    }

    fn instrument_go(&self, source: &Path) -> CommandOutput {
        self.execute(Command::new(&self.tools.instrument_go).arg(source), None, None)
    }

    fn go_fmt(&self, source: &Path) -> CommandOutput {
        self.execute(Command::new(&self.tools.go).arg("fmt").arg(source), None, None)
    }

    fn go_build_shared(&self, source: &Path, library: &Path) -> CommandOutput {
        self.execute(
            Command::new(&self.tools.go)
                .args(["build", "-buildmode", "c-shared", "-o"])
                .arg(library)
                .arg(source),
            None,
            None,
        )
    }

    fn instrument_c(&self, unit: &Path, output: &Path) -> CommandOutput {
        self.execute(
            Command::new(&self.tools.instrument_c)
                .arg("-f")
                .arg(unit)
                .arg("-o")
                .arg(output),
            None,
            None,
        )
    }

    fn cmake_configure(&self, source_dir: &Path, build_dir: &Path) -> CommandOutput {
        let mut command = Command::new(&self.tools.cmake);
        if let Some(cxx) = &self.tools.cxx_compiler {
            command.arg(format!("-DCMAKE_CXX_COMPILER={cxx}"));
        }
        command.arg("-S").arg(source_dir).arg("-B").arg(build_dir);
        self.execute(&mut command, None, None)
    }

    fn cmake_build(&self, build_dir: &Path) -> CommandOutput {
        self.execute(
            Command::new(&self.tools.cmake).arg("--build").arg(build_dir),
            None,
            None,
        )
    }

    fn instrument_rust(
        &self,
        rust_file: &Path,
        output: &Path,
        ground_truth: &Path,
        examples: usize,
    ) -> CommandOutput {
        self.execute(
            Command::new(&self.tools.instrument_rust)
                .arg("-f")
                .arg(rust_file)
                .arg("-o")
                .arg(output)
                .args([
                    "--capture-stdout",
                    "--wrapper-structs",
                    "--arbitrary-precision",
                    "--ground-truth",
                ])
                .arg(ground_truth)
                .arg("--multi-examples")
                .arg(examples.to_string()),
            None,
            None,
        )
    }

    fn fuzz_list(&self, harness: &Path) -> CommandOutput {
        let mut command = Command::new(&self.tools.cargo);
        command
            .args(["bolero", "list", "--manifest-path"])
            .arg(harness.join("Cargo.toml"))
            .env("LD_LIBRARY_PATH", harness)
            .env("RUSTFLAGS", format!("-L {}", harness.display()));
        self.execute(&mut command, None, None)
    }

    fn fuzz_run(
        &self,
        harness: &Path,
        entry: &str,
        max_len: u64,
        timeout: Duration,
    ) -> CommandOutput {
        let mut command = Command::new(&self.tools.cargo);
        command
            .args(["bolero", "test", "--manifest-path"])
            .arg(harness.join("Cargo.toml"))
            .args(["--features", "fuzzing", entry, "--target-dir"])
            .arg(harness.join("target").join("__fuzz__"))
            .args(["--sanitizer", "NONE"])
            .arg(format!(
                "--engine-args=-rss_limit_mb={} -max_len={max_len}",
                self.rss_limit_mb
            ))
            .env("LD_LIBRARY_PATH", harness)
            .env("RUSTFLAGS", format!("-L {}", harness.display()));
        self.execute(&mut command, None, Some(timeout))
    }

    fn replay(&self, harness: &Path, examples: &str, timeout: Duration) -> CommandOutput {
        let mut command = self.harness_cargo("test", harness);
        command.args(["--features", "replay", "--", "--nocapture"]);
        self.execute(&mut command, Some(examples), Some(timeout))
    }

    fn coverage_build(&self, harness: &Path, replay: bool) -> CommandOutput {
        let mut command = self.coverage_cargo(harness, replay);
        command.args(["--tests", "--no-run", "--message-format=json"]);
        self.execute(&mut command, None, None)
    }

    fn coverage_run(&self, harness: &Path, examples: Option<&str>) -> CommandOutput {
        let mut command = self.coverage_cargo(harness, examples.is_some());
        self.execute(&mut command, examples, None)
    }

    fn profdata_merge(&self, harness: &Path) -> CommandOutput {
        let Some(profdata) = self.llvm_tool("llvm-profdata") else {
            return Self::missing_tool("llvm-profdata");
        };
        let raw: Vec<PathBuf> = std::fs::read_dir(harness)
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "profraw"))
                    .collect()
            })
            .unwrap_or_default();
        self.execute(
            Command::new(profdata)
                .args(["merge", "-sparse"])
                .args(&raw)
                .arg("-o")
                .arg(harness.join("cov.profdata")),
            None,
            None,
        )
    }

    fn coverage_report(&self, harness: &Path, binary: &str) -> CommandOutput {
        let Some(cov) = self.llvm_tool("llvm-cov") else {
            return Self::missing_tool("llvm-cov");
        };
        self.execute(
            Command::new(cov)
                .arg("report")
                .arg(format!("-instr-profile={}", harness.join("cov.profdata").display()))
                .arg(binary),
            None,
            None,
        )
    }

    fn coverage_show(&self, harness: &Path, binary: &str) -> CommandOutput {
        let Some(cov) = self.llvm_tool("llvm-cov") else {
            return Self::missing_tool("llvm-cov");
        };
        self.execute(
            Command::new(cov)
                .arg("show")
                .arg(format!("-instr-profile={}", harness.join("cov.profdata").display()))
                .arg(binary)
                .args(["--show-instantiations", "--show-line-counts-or-regions"]),
            None,
            None,
        )
    }
}

/// Replay behaviour: JSON example array in, harness output out
pub type ReplayFn = Arc<dyn Fn(&str) -> CommandOutput + Send + Sync>;

/// Coverage behaviour: replayed examples (None for the corpus) in, `llvm-cov
/// show` text out
pub type CoverageFn = Arc<dyn Fn(Option<&str>) -> String + Send + Sync>;

/// Mock command runner for testing
///
/// Tools that produce files in real life (cargo init, the instrumentors, the
/// shared-library builds) create minimal stand-ins so path checks succeed.
#[derive(Clone)]
pub struct MockCommandRunner {
    /// Build outputs returned in order; once drained, builds succeed
    pub build_outputs: Arc<Mutex<VecDeque<CommandOutput>>>,
    /// Whether the instrumentors succeed
    pub instrument_success: bool,
    /// Entry reported by `fuzz_list` (None = no entry point)
    pub fuzz_entry: Option<String>,
    /// Report printed by fuzz runs once the queue is drained
    pub fuzz_report: String,
    /// Reports printed by the next fuzz runs, in order
    pub fuzz_queue: Arc<Mutex<VecDeque<String>>>,
    /// Whether fuzz runs always hit their deadline
    pub fuzz_timeout: bool,
    /// Replay behaviour (default: every example agrees)
    pub replay: Option<ReplayFn>,
    /// Coverage behaviour (default: every line hit once)
    pub coverage: Option<CoverageFn>,
    /// Output of clippy
    pub clippy_output: String,
    calls: Arc<Mutex<Vec<String>>>,
    fuzz_calls: Arc<Mutex<Vec<(u64, Duration)>>>,
    coverage_input: Arc<Mutex<Option<String>>>,
}

impl fmt::Debug for MockCommandRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCommandRunner")
            .field("instrument_success", &self.instrument_success)
            .field("fuzz_entry", &self.fuzz_entry)
            .field("fuzz_timeout", &self.fuzz_timeout)
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl Default for MockCommandRunner {
    fn default() -> Self {
        Self {
            build_outputs: Arc::new(Mutex::new(VecDeque::new())),
            instrument_success: true,
            fuzz_entry: Some("fuzz_target".to_string()),
            fuzz_report: crate::differential::harness_report(
                r#"[{"args":["1","2"],"actual":{"ExecutionSuccess":"3"}}]"#,
                "[]",
            ),
            fuzz_queue: Arc::new(Mutex::new(VecDeque::new())),
            fuzz_timeout: false,
            replay: None,
            coverage: None,
            clippy_output: String::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fuzz_calls: Arc::new(Mutex::new(Vec::new())),
            coverage_input: Arc::new(Mutex::new(None)),
        }
    }
}

impl MockCommandRunner {
    /// Create a new mock runner with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue build outputs (stderr text, success flag)
    #[must_use]
    pub fn with_builds(self, builds: Vec<CommandOutput>) -> Self {
        if let Ok(mut queue) = self.build_outputs.lock() {
            queue.extend(builds);
        }
        self
    }

    /// Make every instrumentor fail
    #[must_use]
    pub fn with_instrument_failure(mut self) -> Self {
        self.instrument_success = false;
        self
    }

    /// Report no fuzz entry point
    #[must_use]
    pub fn without_fuzz_entry(mut self) -> Self {
        self.fuzz_entry = None;
        self
    }

    /// Set the fuzz report
    #[must_use]
    pub fn with_fuzz_report(mut self, report: impl Into<String>) -> Self {
        self.fuzz_report = report.into();
        self
    }

    /// Queue reports for the next fuzz runs
    #[must_use]
    pub fn with_fuzz_reports(self, reports: Vec<String>) -> Self {
        if let Ok(mut queue) = self.fuzz_queue.lock() {
            queue.extend(reports);
        }
        self
    }

    /// Make every fuzz run time out
    #[must_use]
    pub fn with_fuzz_timeout(mut self) -> Self {
        self.fuzz_timeout = true;
        self
    }

    /// Set the replay behaviour
    #[must_use]
    pub fn with_replay(
        mut self,
        replay: impl Fn(&str) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        self.replay = Some(Arc::new(replay));
        self
    }

    /// Set the coverage behaviour
    #[must_use]
    pub fn with_coverage(
        mut self,
        coverage: impl Fn(Option<&str>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.coverage = Some(Arc::new(coverage));
        self
    }

    /// Set the clippy output
    #[must_use]
    pub fn with_clippy_output(mut self, output: impl Into<String>) -> Self {
        self.clippy_output = output.into();
        self
    }

    /// Names of the tools invoked so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of times `name` was invoked
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }

    /// `(max_len, timeout)` of every fuzz run so far
    #[must_use]
    pub fn fuzz_calls(&self) -> Vec<(u64, Duration)> {
        self.fuzz_calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, name: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(name.to_string());
        }
    }

    fn instrumentor(&self, name: &str, output: Option<&Path>) -> CommandOutput {
        self.record(name);
        if !self.instrument_success {
            return CommandOutput::failure(1, format!("{name}: unsupported construct"));
        }
        if let Some(output) = output {
            if std::fs::create_dir_all(output).is_err() {
                return CommandOutput::failure(1, "cannot create output");
            }
        }
        CommandOutput::success("")
    }

    fn touch(path: &Path) -> CommandOutput {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::write(path, b"") {
            Ok(()) => CommandOutput::success(""),
            Err(e) => CommandOutput::failure(1, e.to_string()),
        }
    }
}

impl CommandRunner for MockCommandRunner {
    fn cargo_init(&self, dir: &Path) -> CommandOutput {
        self.record("cargo_init");
        let name = dir
            .file_name()
            .map_or_else(|| "wspace".to_string(), |n| n.to_string_lossy().into_owned());
        let manifest = format!(
            "[package]\nname = \"{name}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[dependencies]\n"
        );
        let created = std::fs::create_dir_all(dir.join("src"))
            .and_then(|()| std::fs::write(dir.join("Cargo.toml"), manifest))
            .and_then(|()| std::fs::write(dir.join("src").join("lib.rs"), ""));
        match created {
            Ok(()) => CommandOutput::success(""),
            Err(e) => CommandOutput::failure(101, e.to_string()),
        }
    }

    fn cargo_clean(&self, _dir: &Path) -> CommandOutput {
        self.record("cargo_clean");
        CommandOutput::success("")
    }

    fn cargo_build(&self, _dir: &Path) -> CommandOutput {
        self.record("cargo_build");
        self.build_outputs
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| CommandOutput::with_output("", "    Finished `dev` profile", 0))
    }

    fn cargo_fix(&self, _dir: &Path) -> CommandOutput {
        self.record("cargo_fix");
        CommandOutput::success("")
    }

    fn cargo_clippy(&self, _dir: &Path) -> CommandOutput {
        self.record("cargo_clippy");
        CommandOutput::success(self.clippy_output.clone())
    }

    fn rustc_explain(&self, code: &str) -> CommandOutput {
        self.record("rustc_explain");
        CommandOutput::success(format!("Explanation for {code}."))
    }

    fn instrument_go(&self, _source: &Path) -> CommandOutput {
        self.instrumentor("instrument_go", None)
    }

    fn go_fmt(&self, _source: &Path) -> CommandOutput {
        self.record("go_fmt");
        CommandOutput::success("")
    }

    fn go_build_shared(&self, _source: &Path, library: &Path) -> CommandOutput {
        self.record("go_build_shared");
        Self::touch(library)
    }

    fn instrument_c(&self, _unit: &Path, output: &Path) -> CommandOutput {
        self.instrumentor("instrument_c", Some(output))
    }

    fn cmake_configure(&self, _source_dir: &Path, build_dir: &Path) -> CommandOutput {
        self.record("cmake_configure");
        match std::fs::create_dir_all(build_dir) {
            Ok(()) => CommandOutput::success(""),
            Err(e) => CommandOutput::failure(1, e.to_string()),
        }
    }

    fn cmake_build(&self, build_dir: &Path) -> CommandOutput {
        self.record("cmake_build");
        Self::touch(&build_dir.join(crate::oracle::GROUND_TRUTH_LIBRARY))
    }

    fn instrument_rust(
        &self,
        _rust_file: &Path,
        output: &Path,
        _ground_truth: &Path,
        _examples: usize,
    ) -> CommandOutput {
        let out = self.instrumentor("instrument_rust", Some(output));
        if out.success {
            let _ = std::fs::write(output.join("Cargo.toml"), "[package]\nname = \"replay\"\n");
        }
        out
    }

    fn fuzz_list(&self, _harness: &Path) -> CommandOutput {
        self.record("fuzz_list");
        match &self.fuzz_entry {
            Some(entry) => CommandOutput::success(format!(
                "{{\"package\":\"replay\",\"test\":\"{entry}\"}}\n"
            )),
            None => CommandOutput::success(""),
        }
    }

    fn fuzz_run(
        &self,
        _harness: &Path,
        _entry: &str,
        max_len: u64,
        timeout: Duration,
    ) -> CommandOutput {
        self.record("fuzz_run");
        if let Ok(mut calls) = self.fuzz_calls.lock() {
            calls.push((max_len, timeout));
        }
        if self.fuzz_timeout {
            return CommandOutput::timeout("");
        }
        let report = self
            .fuzz_queue
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| self.fuzz_report.clone());
        CommandOutput::with_output("", report, 1)
    }

    fn replay(&self, _harness: &Path, examples: &str, _timeout: Duration) -> CommandOutput {
        self.record("replay");
        match &self.replay {
            Some(replay) => replay(examples),
            None => CommandOutput::with_output(
                "",
                crate::differential::harness_report(examples, "[]"),
                101,
            ),
        }
    }

    fn coverage_build(&self, harness: &Path, _replay: bool) -> CommandOutput {
        self.record("coverage_build");
        let binary = harness.join("target/debug/deps/replay-0123456789abcdef");
        CommandOutput::success(format!(
            "{{\"reason\":\"compiler-artifact\",\"profile\":{{\"test\":false}},\"filenames\":[\"{0}/target/debug/libreplay.rlib\"]}}\n\
             {{\"reason\":\"compiler-artifact\",\"profile\":{{\"test\":true}},\"filenames\":[\"{1}\"]}}\n\
             {{\"reason\":\"build-finished\",\"success\":true}}\n",
            harness.display(),
            binary.display()
        ))
    }

    fn coverage_run(&self, _harness: &Path, examples: Option<&str>) -> CommandOutput {
        self.record("coverage_run");
        if let Ok(mut input) = self.coverage_input.lock() {
            *input = examples.map(ToString::to_string);
        }
        CommandOutput::success("")
    }

    fn profdata_merge(&self, _harness: &Path) -> CommandOutput {
        self.record("profdata_merge");
        CommandOutput::success("")
    }

    fn coverage_report(&self, _harness: &Path, _binary: &str) -> CommandOutput {
        self.record("coverage_report");
        CommandOutput::success("TOTAL  10  0  100.00%")
    }

    fn coverage_show(&self, harness: &Path, _binary: &str) -> CommandOutput {
        self.record("coverage_show");
        let input = self.coverage_input.lock().ok().and_then(|i| i.clone());
        let body = match &self.coverage {
            Some(coverage) => coverage(input.as_deref()),
            None => "    1|      1|extern \"C\" {\n    2|      1|    fn f();\n    3|      1|}\n".to_string(),
        };
        CommandOutput::success(format!("{}/src/lib.rs:\n{body}", harness.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_constructors() {
        let ok = CommandOutput::success("out");
        assert!(ok.success && ok.launched && !ok.timed_out);
        assert_eq!(ok.stdout, "out");

        let failed = CommandOutput::failure(2, "err");
        assert!(!failed.success);
        assert_eq!(failed.exit_code, 2);

        let timed_out = CommandOutput::timeout("partial");
        assert!(timed_out.timed_out && !timed_out.success);

        let not_started = CommandOutput::launch_failure("no such file");
        assert!(!not_started.launched);
    }

    #[test]
    fn test_with_output_success_flag() {
        assert!(CommandOutput::with_output("a", "b", 0).success);
        assert!(!CommandOutput::with_output("a", "b", 101).success);
    }

    #[test]
    fn test_mock_build_queue_then_default() {
        let runner = MockCommandRunner::new()
            .with_builds(vec![CommandOutput::failure(101, "error[E0308]: mismatched types")]);
        let dir = Path::new("/unused");
        assert!(!runner.cargo_build(dir).success);
        assert!(runner.cargo_build(dir).success);
        assert_eq!(runner.count("cargo_build"), 2);
    }

    #[test]
    fn test_mock_cargo_init_creates_project() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("wspace");
        let runner = MockCommandRunner::new();
        assert!(runner.cargo_init(&dir).success);
        let manifest = std::fs::read_to_string(dir.join("Cargo.toml")).unwrap();
        assert!(manifest.contains("name = \"wspace\""));
        assert!(dir.join("src/lib.rs").exists());
    }

    #[test]
    fn test_mock_fuzz_records_ladder() {
        let runner = MockCommandRunner::new().with_fuzz_timeout();
        let out = runner.fuzz_run(Path::new("/h"), "t", 64, Duration::from_secs(1));
        assert!(out.timed_out);
        assert_eq!(runner.fuzz_calls(), vec![(64, Duration::from_secs(1))]);
    }

    #[test]
    fn test_mock_instrument_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = MockCommandRunner::new().with_instrument_failure();
        let out = runner.instrument_rust(
            Path::new("a.rs"),
            &tmp.path().join("out"),
            Path::new("lib.so"),
            10,
        );
        assert!(!out.success);
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn test_mock_coverage_sees_replayed_examples() {
        let runner = MockCommandRunner::new().with_coverage(|input| {
            format!("    1|      {}|extern \"C\" {{\n", input.map_or(0, str::len))
        });
        let harness = Path::new("/h");
        let _ = runner.coverage_run(harness, Some("[1]"));
        let show = runner.coverage_show(harness, "bin");
        assert!(show.stdout.starts_with("/h/src/lib.rs:\n"));
        assert!(show.stdout.contains("|      3|"));
    }

    #[test]
    fn test_mock_debug() {
        let runner = MockCommandRunner::new();
        let debug_str = format!("{runner:?}");
        assert!(debug_str.contains("MockCommandRunner"));
    }

    #[cfg(unix)]
    #[test]
    fn test_real_runner_launch_failure() {
        let tools = ToolPaths {
            cargo: "/nonexistent/cargo".to_string(),
            ..ToolPaths::default()
        };
        let runner = RealCommandRunner::with_tools(tools);
        let out = runner.cargo_clean(Path::new("/tmp"));
        assert!(!out.launched);
        assert!(out.stderr.contains("/nonexistent/cargo"));
    }

    #[cfg(unix)]
    #[test]
    fn test_real_runner_explicit_llvm_dir() {
        let tools = ToolPaths {
            llvm_bin_dir: Some(PathBuf::from("/opt/llvm/bin")),
            ..ToolPaths::default()
        };
        let runner = RealCommandRunner::with_tools(tools);
        assert_eq!(
            runner.llvm_tool("llvm-cov"),
            Some(PathBuf::from("/opt/llvm/bin/llvm-cov"))
        );
    }
}
