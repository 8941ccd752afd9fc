//! Run configuration
//!
//! Options are loaded from YAML (JSON works too, being a YAML subset); every
//! field has a default so a config file only needs to name the benchmark.

use crate::candidate::SemanticFix;
use crate::differential::BackoffConfig;
use crate::error::{Error, Result};
use crate::fixer::CompileFix;
use crate::oracle::Language;
use crate::search::Fallback;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the reused build directory inside the work directory
pub const WORKSPACE_DIR: &str = "wspace";

/// Locations of external tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// cargo binary
    pub cargo: String,
    /// cmake binary
    pub cmake: String,
    /// C++ compiler handed to cmake (None = cmake's choice)
    pub cxx_compiler: Option<String>,
    /// go binary
    pub go: String,
    /// C instrumentor
    pub instrument_c: String,
    /// Go instrumentor
    pub instrument_go: String,
    /// Rust harness instrumentor
    pub instrument_rust: String,
    /// Directory holding llvm-cov and llvm-profdata (None = search the rust sysroot)
    pub llvm_bin_dir: Option<PathBuf>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            cargo: "cargo".to_string(),
            cmake: "cmake".to_string(),
            cxx_compiler: None,
            go: "go".to_string(),
            instrument_c: "Differential_Tester/.bin/instrument-c/release/instrument".to_string(),
            instrument_go: "Differential_Tester/.bin/instrument-go/instrument".to_string(),
            instrument_rust: "Differential_Tester/.bin/instrument-rust/release/instrument"
                .to_string(),
            llvm_bin_dir: None,
        }
    }
}

/// Options for one transpilation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Benchmark directory name under `<bench_root>/<language>/`
    pub benchmark_name: String,
    /// Unit to translate inside the benchmark
    pub submodule_name: String,
    /// Source language
    pub language: Language,
    /// Model label, used only for the work directory layout
    pub model: String,
    /// Free-form run label
    pub tag: String,
    /// Root of the benchmark sources
    pub bench_root: PathBuf,
    /// Root of all work directories
    pub work_root: PathBuf,
    /// Examples placed in a repair prompt
    pub n_prompt_examples: usize,
    /// Fallback rounds after the initial translation
    pub restart_budget: usize,
    /// Semantic repair rounds per fallback round
    pub fix_budget: usize,
    /// Fallback strategy
    pub fallback: Fallback,
    /// Compile-error repair after translation
    pub comp_fix: CompileFix,
    /// LLM calls the compile fixer may spend per error
    pub comp_fix_attempt_budget: usize,
    /// Counterexample presentation during semantic repair
    pub sem_fix: SemanticFix,
    /// Starting sampling temperature
    pub initial_temperature: f64,
    /// Add examples of the previous candidate to restart prompts
    pub hinted: bool,
    /// Keep repair rounds as conversation history
    pub conversation: bool,
    /// Repair rounds kept in the history
    pub conversation_window_size: usize,
    /// Reject repairs that do not strictly improve the score
    pub pruning: bool,
    /// Generations per translation, keeping the fewest errors
    pub transpl_attempt_budget: usize,
    /// Translate-and-verify attempts before giving up on the first candidate
    pub init_attempt_budget: usize,
    /// Seed for sampling and temperature search
    pub seed: u64,
    /// Run `cargo fix` after translating
    pub cargo_fix: bool,
    /// Add `rustc --explain` text to compile-fix requests
    pub explain_errors: bool,
    /// Summarize clippy lints of the accepted translation
    pub lint_report: bool,
    /// Constraints added to every generation request
    pub extra_constraints: Vec<String>,
    /// Tool locations
    pub tools: ToolPaths,
    /// Fuzzing limits
    pub verifier: BackoffConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            benchmark_name: String::new(),
            submodule_name: String::new(),
            language: Language::C,
            model: "claude3".to_string(),
            tag: "default".to_string(),
            bench_root: PathBuf::from("bms"),
            work_root: PathBuf::from("transpilations"),
            n_prompt_examples: 4,
            restart_budget: 3,
            fix_budget: 5,
            fallback: Fallback::Fix,
            comp_fix: CompileFix::Base,
            comp_fix_attempt_budget: 3,
            sem_fix: SemanticFix::Base,
            initial_temperature: 0.2,
            hinted: false,
            conversation: false,
            conversation_window_size: 3,
            pruning: false,
            transpl_attempt_budget: 3,
            init_attempt_budget: 5,
            seed: 123,
            cargo_fix: true,
            explain_errors: false,
            lint_report: false,
            extra_constraints: Vec::new(),
            tools: ToolPaths::default(),
            verifier: BackoffConfig::default(),
        }
    }
}

impl Options {
    /// Load options from a YAML or JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse options from YAML
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    /// Serialize to YAML
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(Error::from)
    }

    /// Reject inconsistent combinations
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.benchmark_name.is_empty() || self.submodule_name.is_empty() {
            return Err(Error::Config(
                "benchmark_name and submodule_name are required".to_string(),
            ));
        }
        if self.n_prompt_examples == 0 && self.conversation {
            return Err(Error::Config(
                "conversational repair requires n_prompt_examples > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.initial_temperature) {
            return Err(Error::Config(format!(
                "initial_temperature {} outside [0, 1]",
                self.initial_temperature
            )));
        }
        if self.transpl_attempt_budget == 0 || self.init_attempt_budget == 0 {
            return Err(Error::Config("attempt budgets must be positive".to_string()));
        }
        Ok(())
    }

    /// `<work_root>/<model>/<language>/<benchmark>/<tag>`
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.work_root
            .join(&self.model)
            .join(self.language.tag())
            .join(&self.benchmark_name)
            .join(&self.tag)
    }

    /// Reused build directory
    #[must_use]
    pub fn workspace_dir(&self) -> PathBuf {
        self.work_dir().join(WORKSPACE_DIR)
    }

    /// Where accepted translations are written
    #[must_use]
    pub fn results_dir(&self) -> PathBuf {
        self.work_dir().join("results")
    }

    /// Original source file of the unit
    #[must_use]
    pub fn source_path(&self) -> PathBuf {
        self.bench_dir()
            .join(format!("{}.{}", self.submodule_name, self.language.extension()))
    }

    /// JSON sidecar describing the unit's declarations
    #[must_use]
    pub fn source_json_path(&self) -> PathBuf {
        self.bench_dir().join(format!("{}.json", self.submodule_name))
    }

    fn bench_dir(&self) -> PathBuf {
        self.bench_root
            .join(self.language.tag())
            .join(&self.benchmark_name)
    }

    /// Constraints added to every generation request
    #[must_use]
    pub fn global_constraints(&self) -> Vec<String> {
        let mut constraints: Vec<String> = self
            .language
            .global_constraints()
            .iter()
            .map(ToString::to_string)
            .collect();
        constraints.extend(self.extra_constraints.iter().cloned());
        constraints
    }

    /// Persist the effective options as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named() -> Options {
        Options {
            benchmark_name: "libopenaptx".to_string(),
            submodule_name: "aptx_encode".to_string(),
            ..Options::default()
        }
    }

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.n_prompt_examples, 4);
        assert_eq!(options.restart_budget, 3);
        assert_eq!(options.fix_budget, 5);
        assert_eq!(options.fallback, Fallback::Fix);
        assert_eq!(options.conversation_window_size, 3);
        assert_eq!(options.verifier.initial_max_len, 32768);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r"
benchmark_name: libopenaptx
submodule_name: aptx_encode
language: go
fallback: param-search
restart_budget: 7
verifier:
  retry_limit: 2
";
        let options = Options::from_yaml(yaml).unwrap();
        assert_eq!(options.language, Language::Go);
        assert_eq!(options.fallback, Fallback::ParamSearch);
        assert_eq!(options.restart_budget, 7);
        assert_eq!(options.verifier.retry_limit, 2);
        assert_eq!(options.verifier.initial_max_len, 32768);
        assert_eq!(options.fix_budget, 5);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"benchmark_name": "b", "submodule_name": "s", "pruning": true}"#;
        let options = Options::from_yaml(json).unwrap();
        assert!(options.pruning);
    }

    #[test]
    fn test_yaml_roundtrip_preserves_fields() {
        let options = named();
        let yaml = options.to_yaml().unwrap();
        assert_eq!(Options::from_yaml(&yaml).unwrap(), options);
    }

    #[test]
    fn test_validate() {
        assert!(named().validate().is_ok());
        assert!(Options::default().validate().is_err());

        let mut options = named();
        options.n_prompt_examples = 0;
        options.conversation = true;
        assert!(options.validate().unwrap_err().to_string().contains("n_prompt_examples"));

        let mut options = named();
        options.initial_temperature = 1.5;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_paths() {
        let options = named();
        assert_eq!(
            options.work_dir(),
            PathBuf::from("transpilations/claude3/c/libopenaptx/default")
        );
        assert_eq!(
            options.workspace_dir(),
            PathBuf::from("transpilations/claude3/c/libopenaptx/default/wspace")
        );
        assert_eq!(
            options.source_path(),
            PathBuf::from("bms/c/libopenaptx/aptx_encode.c")
        );
        assert_eq!(
            options.source_json_path(),
            PathBuf::from("bms/c/libopenaptx/aptx_encode.json")
        );
    }

    #[test]
    fn test_global_constraints() {
        let mut options = named();
        options.extra_constraints = vec!["No unsafe.".to_string()];
        let constraints = options.global_constraints();
        assert!(constraints[0].contains("wrapping_add"));
        assert_eq!(constraints.last().unwrap(), "No unsafe.");
    }

    #[test]
    fn test_save_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        named().save_json(&path).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"benchmark_name\": \"libopenaptx\""));
    }
}
