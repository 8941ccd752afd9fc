//! Instrumentation and oracle construction
//!
//! Turns a results directory holding `<name>.<ext>`, `<name>.json` and
//! `<name>.rs` into a differential harness: the reference implementation is
//! built as `libground_truth.so`, then the Rust instrumentor wraps the
//! candidate's functions so that every generated input runs through both.

use crate::command::CommandRunner;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// File name of the reference shared library
pub const GROUND_TRUTH_LIBRARY: &str = "libground_truth.so";

/// Inputs the instrumentor is asked to generate
pub const DEFAULT_EXAMPLE_BUDGET: usize = 1000;

/// Source language of the unit being translated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// C
    #[default]
    C,
    /// Go
    Go,
    /// Rust (translation side only)
    Rust,
}

impl Language {
    /// Short tag used in paths and configs
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Go => "go",
            Self::Rust => "rust",
        }
    }

    /// Source file extension
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Go => "go",
            Self::Rust => "rs",
        }
    }

    /// Constraints added to every generation request for this language
    #[must_use]
    pub fn global_constraints(self) -> &'static [&'static str] {
        match self {
            Self::C => &["Consider using functions like `wrapping_add` to simulate C semantics."],
            Self::Go => &[
                "Translate Go methods into free-standing functions where receivers are not structs.",
            ],
            Self::Rust => &[],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::C => write!(f, "C"),
            Self::Go => write!(f, "Go"),
            Self::Rust => write!(f, "Rust"),
        }
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "c" => Ok(Self::C),
            "go" => Ok(Self::Go),
            "rust" | "rs" => Ok(Self::Rust),
            other => Err(Error::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// Builds differential harnesses
#[derive(Clone)]
pub struct OracleBuilder {
    runner: Arc<dyn CommandRunner>,
    example_budget: usize,
}

impl fmt::Debug for OracleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleBuilder")
            .field("example_budget", &self.example_budget)
            .finish_non_exhaustive()
    }
}

impl OracleBuilder {
    /// Builder with the default example budget
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            example_budget: DEFAULT_EXAMPLE_BUDGET,
        }
    }

    /// Change the number of inputs requested from the instrumentor
    #[must_use]
    pub fn with_example_budget(mut self, example_budget: usize) -> Self {
        self.example_budget = example_budget;
        self
    }

    /// Instrument `<results_dir>/<name>.rs` against its reference into
    /// `output_dir`, which must not exist yet
    ///
    /// # Errors
    ///
    /// - [`Error::OutputExists`] if `output_dir` exists
    /// - [`Error::MissingInput`] if a source file is absent
    /// - [`Error::UnsupportedLanguage`] for a Rust reference
    /// - [`Error::CommandFailed`] if any tool exits non-zero
    pub fn instrument(
        &self,
        language: Language,
        results_dir: &Path,
        name: &str,
        output_dir: &Path,
    ) -> Result<()> {
        tracing::info!(unit = name, %language, "instrumenting");
        let rust_file = existing(results_dir.join(format!("{name}.rs")))?;
        if output_dir.exists() {
            return Err(Error::OutputExists(output_dir.to_path_buf()));
        }

        let scratch = tempfile::tempdir()?;
        let library = match language {
            Language::Go => {
                self.build_go(&existing(results_dir.join(format!("{name}.go")))?, scratch.path())?
            }
            Language::C => {
                self.build_c(&existing(results_dir.join(format!("{name}.json")))?, scratch.path())?
            }
            Language::Rust => return Err(Error::UnsupportedLanguage(language.tag().to_string())),
        };

        self.runner
            .instrument_rust(&rust_file, output_dir, &library, self.example_budget)
            .into_success("instrument-rust")?;
        move_file(&library, &output_dir.join(GROUND_TRUTH_LIBRARY))?;
        Ok(())
    }

    fn build_go(&self, source: &Path, scratch: &Path) -> Result<PathBuf> {
        let staged = scratch.join("ground_truth.go");
        std::fs::copy(source, &staged)?;
        self.runner.instrument_go(&staged).into_success("instrument-go")?;
        self.runner.go_fmt(&staged).into_success("go fmt")?;
        let library = scratch.join(GROUND_TRUTH_LIBRARY);
        self.runner.go_build_shared(&staged, &library).into_success("go build")?;
        Ok(library)
    }

    fn build_c(&self, unit: &Path, scratch: &Path) -> Result<PathBuf> {
        let project = scratch.join("ground_truth");
        let build = project.join("_build");
        self.runner.instrument_c(unit, &project).into_success("instrument-c")?;
        self.runner.cmake_configure(&project, &build).into_success("cmake configure")?;
        self.runner.cmake_build(&build).into_success("cmake build")?;
        let library = scratch.join(GROUND_TRUTH_LIBRARY);
        move_file(&build.join(GROUND_TRUTH_LIBRARY), &library)?;
        Ok(library)
    }
}

fn existing(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::MissingInput(path))
    }
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        return Err(Error::MissingInput(from.to_path_buf()));
    }
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}
