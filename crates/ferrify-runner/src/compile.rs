//! Compilation service
//!
//! Builds candidate translations in the reused [`Workspace`]. A failing
//! build is an ordinary outcome; only a cargo that cannot be launched is an
//! error.

use crate::command::{CommandOutput, CommandRunner};
use crate::diagnostics::{CompilationOutcome, parse_coarse, parse_phased};
use crate::error::Result;
use crate::workspace::Workspace;
use std::sync::Arc;

/// One recorded build
#[derive(Debug, Clone)]
pub struct CompileAttempt {
    /// Log identifier of the attempt
    pub log_id: String,
    /// Raw cargo output
    pub output: CommandOutput,
}

impl CompileAttempt {
    /// Whether cargo reported success
    #[must_use]
    pub fn success(&self) -> bool {
        self.output.success
    }
}

/// Builds code in an owned workspace and keeps an audit trail
pub struct CompilationService {
    runner: Arc<dyn CommandRunner>,
    workspace: Workspace,
}

impl std::fmt::Debug for CompilationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationService")
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl CompilationService {
    /// Take ownership of a workspace
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, workspace: Workspace) -> Self {
        Self { runner, workspace }
    }

    /// The workspace being built in
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Runner shared with the rest of the pipeline
    #[must_use]
    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Create the project skeleton if needed, else `cargo clean` it
    ///
    /// # Errors
    ///
    /// Returns an error if cargo cannot be launched or the manifest cannot
    /// be extended.
    pub fn prepare(&self) -> Result<()> {
        if self.workspace.has_manifest() {
            tracing::debug!("workspace exists, cleaning");
            self.runner.cargo_clean(self.workspace.root()).into_launched("cargo clean")?;
        } else {
            tracing::debug!(root = %self.workspace.root().display(), "initializing workspace");
            self.runner.cargo_init(self.workspace.root()).into_launched("cargo init")?;
            self.workspace.add_default_dependencies()?;
        }
        Ok(())
    }

    /// Build `code`, recording `logs/prog_<log_id>.{ans,rs,err}`
    ///
    /// `prompt` is the rendered request that produced the code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] if cargo cannot be started, or an I/O error
    /// if the sources or logs cannot be written.
    pub fn compile(&mut self, code: &str, prompt: &str, log_id: &str) -> Result<CompileAttempt> {
        self.prepare()?;
        let lease = self.workspace.lease();
        std::fs::write(
            lease.log_path(log_id, "ans"),
            format!("{prompt}\n\n==========\n\n{code}"),
        )?;
        std::fs::write(lease.log_path(log_id, "rs"), code)?;
        lease.write_source(code)?;

        let output = self.runner.cargo_build(lease.root()).into_launched("cargo build")?;
        std::fs::write(lease.log_path(log_id, "err"), &output.stderr)?;
        tracing::debug!(log_id, success = output.success, "build finished");
        Ok(CompileAttempt {
            log_id: log_id.to_string(),
            output,
        })
    }

    /// Build and parse with the phase-aware parser
    ///
    /// # Errors
    ///
    /// See [`CompilationService::compile`].
    pub fn compile_phased(&mut self, code: &str, prompt: &str, log_id: &str) -> Result<CompilationOutcome> {
        let attempt = self.compile(code, prompt, log_id)?;
        Ok(self.phased(&attempt))
    }

    /// Build and parse with the coarse parser
    ///
    /// # Errors
    ///
    /// See [`CompilationService::compile`].
    pub fn compile_coarse(&mut self, code: &str, prompt: &str, log_id: &str) -> Result<CompilationOutcome> {
        let attempt = self.compile(code, prompt, log_id)?;
        Ok(parse_coarse(&attempt.output.stderr))
    }

    /// Phase-aware parse of an attempt's log
    #[must_use]
    pub fn phased(&self, attempt: &CompileAttempt) -> CompilationOutcome {
        parse_phased(&attempt.output.stderr, self.workspace.crate_name())
    }

    /// Run `cargo fix` over the current source, returning the error counts
    /// before and after
    ///
    /// # Errors
    ///
    /// Returns an error if cargo cannot be launched or the fixed source
    /// cannot be read back.
    pub fn cargo_fix(&mut self) -> Result<CargoFixReport> {
        let root = self.workspace.root().to_path_buf();
        let crate_name = self.workspace.crate_name().to_string();
        let _lease = self.workspace.lease();

        self.runner.cargo_clean(&root).into_launched("cargo clean")?;
        let before = self.runner.cargo_build(&root).into_launched("cargo build")?;
        let errors_before = parse_phased(&before.stderr, &crate_name).total;

        self.runner.cargo_fix(&root).into_launched("cargo fix")?;

        self.runner.cargo_clean(&root).into_launched("cargo clean")?;
        let after = self.runner.cargo_build(&root).into_launched("cargo build")?;
        let outcome = parse_phased(&after.stderr, &crate_name);
        tracing::info!(
            before = errors_before,
            after = outcome.total,
            "cargo fix applied"
        );
        Ok(CargoFixReport {
            errors_before,
            outcome,
            code: _lease.read_source()?,
        })
    }

    /// `rustc --explain <code>`; None for uncoded errors or a failed lookup
    #[must_use]
    pub fn explain_code(&self, code: &str) -> Option<String> {
        if !code.starts_with('E') {
            return None;
        }
        let out = self.runner.rustc_explain(code);
        if !out.success {
            tracing::debug!(code, "no explanation available");
            return None;
        }
        Some(out.stdout)
    }
}

/// Effect of a `cargo fix` pass
#[derive(Debug, Clone)]
pub struct CargoFixReport {
    /// Errors before the pass
    pub errors_before: usize,
    /// Build outcome after the pass
    pub outcome: CompilationOutcome,
    /// Source after the pass
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockCommandRunner;
    use crate::error::Error;

    const E0308: &str = "   Compiling wspace v0.1.0\nerror[E0308]: mismatched types\n --> src/lib.rs:1:1\n\nerror: could not compile `wspace`\n";

    fn service(runner: MockCommandRunner) -> (tempfile::TempDir, CompilationService) {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::open(tmp.path().join("wspace")).unwrap();
        (tmp, CompilationService::new(Arc::new(runner), ws))
    }

    #[test]
    fn test_first_compile_initializes_then_cleans() {
        let runner = MockCommandRunner::new();
        let (_tmp, mut svc) = service(runner.clone());
        svc.compile("pub fn f() {}", "prompt", "0").unwrap();
        svc.compile("pub fn g() {}", "prompt", "1").unwrap();
        assert_eq!(
            runner.calls(),
            vec!["cargo_init", "cargo_build", "cargo_clean", "cargo_build"]
        );
        let manifest = std::fs::read_to_string(svc.workspace().manifest()).unwrap();
        assert!(manifest.contains("libc = \"0.2\""));
        assert_eq!(svc.workspace().read_source().unwrap(), "pub fn g() {}");
    }

    #[test]
    fn test_compile_writes_audit_logs() {
        let runner = MockCommandRunner::new().with_builds(vec![CommandOutput::failure(101, E0308)]);
        let (_tmp, mut svc) = service(runner);
        let attempt = svc.compile("fn f() -> i32 { \"x\" }", "translate", "0_1").unwrap();
        assert!(!attempt.success());
        let ws = svc.workspace();
        let ans = std::fs::read_to_string(ws.log_path("0_1", "ans")).unwrap();
        assert!(ans.starts_with("translate\n\n==========\n\n"));
        assert_eq!(std::fs::read_to_string(ws.log_path("0_1", "err")).unwrap(), E0308);
        assert!(ws.log_path("0_1", "rs").exists());
        assert_eq!(svc.phased(&attempt).count_for_code("E0308"), 1);
    }

    #[test]
    fn test_launch_failure_is_error() {
        let tools = crate::config::ToolPaths {
            cargo: "/nonexistent/cargo".to_string(),
            ..crate::config::ToolPaths::default()
        };
        let runner = crate::command::RealCommandRunner::with_tools(tools);
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::open(tmp.path().join("wspace")).unwrap();
        let mut svc = CompilationService::new(Arc::new(runner), ws);
        let err = svc.compile("fn f() {}", "", "0").unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }

    #[test]
    fn test_cargo_fix_reports_counts() {
        let runner = MockCommandRunner::new().with_builds(vec![
            CommandOutput::failure(101, E0308),
            CommandOutput::failure(101, E0308),
            CommandOutput::with_output("", "    Finished `dev` profile", 0),
        ]);
        let (_tmp, mut svc) = service(runner.clone());
        svc.compile("fn f() {}", "", "0").unwrap();
        let report = svc.cargo_fix().unwrap();
        assert_eq!(report.errors_before, 1);
        assert!(report.outcome.is_clean());
        assert_eq!(report.code, "fn f() {}");
        assert_eq!(runner.count("cargo_fix"), 1);
    }

    #[test]
    fn test_lease_drops_target_after_build() {
        let (_tmp, mut svc) = service(MockCommandRunner::new());
        svc.compile("fn f() {}", "", "0").unwrap();
        std::fs::create_dir_all(svc.workspace().root().join("target")).unwrap();
        svc.compile("fn f() {}", "", "1").unwrap();
        assert!(!svc.workspace().root().join("target").exists());
    }

    #[test]
    fn test_explain_code() {
        let runner = MockCommandRunner::new();
        let (_tmp, svc) = service(runner.clone());
        let text = svc.explain_code("E0308").unwrap();
        assert!(text.contains("Explanation for E0308."));
        assert_eq!(runner.count("rustc_explain"), 1);
    }

    #[test]
    fn test_explain_code_skips_uncoded() {
        let runner = MockCommandRunner::new();
        let (_tmp, svc) = service(runner.clone());
        assert_eq!(svc.explain_code(crate::diagnostics::NO_CODE), None);
        assert_eq!(runner.count("rustc_explain"), 0);
    }
}
