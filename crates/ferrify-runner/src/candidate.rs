//! Candidate translations and their evidence
//!
//! A [`Candidate`] exists only for a translation that was instrumented and
//! verified. Its score is the fraction of agreeing examples. Candidates are
//! ordered by score alone, so two different translations with the same score
//! compare equal.

use crate::command::CommandRunner;
use crate::coverage::{CoverageBucket, CoverageEngine, CoverageReport};
use crate::differential::{BackoffConfig, DifferentialVerifier};
use crate::error::Result;
use crate::example::{ExampleSet, IoExample, list_examples};
use crate::oracle::{Language, OracleBuilder};
use ferrify_gen::{Message, ModelParams, Prompt, QueryEngine, tag};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

/// Counterexamples kept per candidate for repair prompts
pub const REPAIR_GROUP_SIZE: usize = 10;

/// Constraints on every semantic repair
pub const REPAIR_CONSTRAINTS: [&str; 5] = [
    "Use only safe Rust.",
    "Don't use raw pointers.",
    "Use box pointer whenever possible. Box pointers are preferable to other alternatives.",
    "Try not to use Traits if possible. I would not like to have Traits in resulting Rust code.",
    "Try not to use custom Generics if possible.",
];

const REPAIR_INSTRUCTION: &str =
    "Make changes in the given code to obtain expected outputs for given test inputs.";

/// How counterexamples are presented in repair prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SemanticFix {
    /// Counterexamples only
    #[default]
    Base,
    /// Counterexamples plus a model-written root-cause explanation
    LlmExplain,
}

/// The unit being translated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Source language
    pub language: Language,
    /// Submodule name, used for file names
    pub name: String,
    /// Original source text
    pub code: String,
    /// JSON sidecar describing the declarations
    pub json: String,
}

impl SourceUnit {
    /// Read `<name>.<ext>` and its JSON sidecar
    ///
    /// A missing sidecar loads as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the source, or a sidecar that exists, cannot be
    /// read.
    pub fn load(language: Language, name: &str, source: &Path, json: &Path) -> Result<Self> {
        let json = match std::fs::read_to_string(json) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(sidecar = %json.display(), "no JSON sidecar, decomposition unavailable");
                String::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            language,
            name: name.to_string(),
            code: std::fs::read_to_string(source)?,
            json,
        })
    }

    /// Write the source, sidecar and `translation` beside each other in `dir`
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub fn stage(&self, dir: &Path, translation: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(
            dir.join(format!("{}.{}", self.name, self.language.extension())),
            &self.code,
        )?;
        std::fs::write(dir.join(format!("{}.json", self.name)), &self.json)?;
        std::fs::write(dir.join(format!("{}.rs", self.name)), translation)?;
        Ok(())
    }
}

/// Counterexamples chosen as repair evidence for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enhancement {
    /// One coverage bucket, at most [`REPAIR_GROUP_SIZE`] examples
    pub counterexamples: Vec<IoExample>,
    /// Presentation strategy
    pub strategy: SemanticFix,
}

impl Enhancement {
    /// Pick one bucket at random and sample from it
    pub fn sample<R: Rng + ?Sized>(
        buckets: &[CoverageBucket],
        strategy: SemanticFix,
        rng: &mut R,
    ) -> Self {
        let counterexamples = buckets
            .choose(rng)
            .map(|bucket| {
                bucket
                    .examples
                    .choose_multiple(rng, REPAIR_GROUP_SIZE)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Self {
            counterexamples,
            strategy,
        }
    }

    /// Extra guidance appended after the counterexamples
    ///
    /// # Errors
    ///
    /// Returns an error if the explanation query fails.
    pub fn elaborate(&self, context: &str, textual: &str, engine: &QueryEngine) -> Result<String> {
        match self.strategy {
            SemanticFix::Base => Ok(String::new()),
            SemanticFix::LlmExplain => {
                tracing::info!("asking for a root-cause explanation");
                let prompt = Prompt::new(
                    context,
                    "Tell me the root cause of the issue and how to fix it in the Rust code.",
                )
                .with_extra_information(format!(
                    "A set of input/output example(s) contained in <testcases> tag is given below.\n{}",
                    tag(textual, "testcases")
                ));
                let answer = engine.query(&prompt, &ModelParams::default())?;
                Ok(format!(
                    "\nBelow is an explanation and one possible way to solve the issue. Consider taking this information into account when fixing the problem.\n\n{answer}"
                ))
            }
        }
    }
}

/// What a candidate carries besides its examples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum CandidateExtra {
    /// Nothing attached
    #[default]
    None,
    /// Repair evidence of an imperfect candidate
    Repair(Enhancement),
    /// Corpus coverage of a freshly verified perfect candidate
    Coverage(CoverageReport),
}

/// A verified translation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Rust source
    pub code: String,
    /// Verification evidence
    pub examples: ExampleSet,
    score: f64,
    /// Attached evidence
    pub extra: CandidateExtra,
}

impl Candidate {
    /// Wrap a translation and its evidence; None for an empty example set
    #[must_use]
    pub fn new(code: impl Into<String>, examples: ExampleSet) -> Option<Self> {
        if examples.is_empty() {
            return None;
        }
        let score = examples.positive.len() as f64 / examples.len() as f64;
        Some(Self {
            code: code.into(),
            examples,
            score,
            extra: CandidateExtra::None,
        })
    }

    /// Fraction of agreeing examples
    #[must_use]
    pub fn score(&self) -> f64 {
        self.score
    }

    /// No counterexamples
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.examples.negative.is_empty()
    }

    /// Examples of this candidate rendered for a restart prompt
    pub fn hint<R: Rng + ?Sized>(&self, n_examples: usize, rng: &mut R) -> String {
        self.examples.hint(n_examples, rng)
    }

    /// Repair prompt embedding up to `n_examples` counterexamples
    ///
    /// With a non-empty `history` the prompt continues that conversation
    /// instead of restating the source.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidState`] for an ok candidate or one
    /// without repair evidence, or the explanation query error.
    pub fn repair_prompt<R: Rng + ?Sized>(
        &self,
        engine: &QueryEngine,
        source: &SourceUnit,
        n_examples: usize,
        history: &[Message],
        rng: &mut R,
    ) -> Result<Prompt> {
        if self.is_ok() {
            return Err(crate::Error::InvalidState(
                "an ok candidate needs no repair".to_string(),
            ));
        }
        let CandidateExtra::Repair(enhancement) = &self.extra else {
            return Err(crate::Error::InvalidState(
                "candidate carries no repair evidence".to_string(),
            ));
        };
        let group: Vec<IoExample> = enhancement
            .counterexamples
            .choose_multiple(rng, n_examples)
            .cloned()
            .collect();
        let textual = list_examples(&group);
        let constraints: Vec<String> = REPAIR_CONSTRAINTS.iter().map(ToString::to_string).collect();

        if !history.is_empty() {
            return Ok(Prompt::new(
                format!(
                    "That is incorrect on the following inputs:\n{}",
                    tag(&textual, "testcases")
                ),
                REPAIR_INSTRUCTION,
            )
            .with_constraints(constraints)
            .with_history(history.to_vec()));
        }

        let context = format!(
            "\n\nYou are given a {} code contained in the following <code> tag\n{}\nYou are also given a plausible Rust translation contained in <code> tag that does not provide expected outputs for certain inputs. {}\n",
            source.language,
            tag(&source.code, "code"),
            tag(&self.code, "code")
        );
        let extra = if n_examples > 0 {
            let elaboration = enhancement.elaborate(&context, &textual, engine)?;
            format!(
                "A set of input/output example(s) contained in <testcases> tag is given below.\n{}\n{elaboration}",
                tag(&textual, "testcases")
            )
        } else {
            String::new()
        };
        Ok(Prompt::new(context, REPAIR_INSTRUCTION)
            .with_constraints(constraints)
            .with_extra_information(extra))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score)
    }
}

/// Instruments, verifies and scores translations of one unit
pub struct CandidateFactory<R> {
    source: SourceUnit,
    oracle: OracleBuilder,
    verifier: DifferentialVerifier,
    coverage: CoverageEngine,
    strategy: SemanticFix,
    rng: R,
}

impl<R> std::fmt::Debug for CandidateFactory<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateFactory")
            .field("unit", &self.source.name)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl<R: Rng> CandidateFactory<R> {
    /// Create a factory
    pub fn new(
        source: SourceUnit,
        runner: Arc<dyn CommandRunner>,
        backoff: BackoffConfig,
        strategy: SemanticFix,
        rng: R,
    ) -> Self {
        Self {
            source,
            oracle: OracleBuilder::new(Arc::clone(&runner)),
            verifier: DifferentialVerifier::new(Arc::clone(&runner), backoff),
            coverage: CoverageEngine::new(runner),
            strategy,
            rng,
        }
    }

    /// The unit being translated
    #[must_use]
    pub fn source(&self) -> &SourceUnit {
        &self.source
    }

    /// Random source shared with the repair loop
    pub fn rng(&mut self) -> &mut R {
        &mut self.rng
    }

    /// Build the evidence for `code`
    ///
    /// Without `prior` the harness is fuzzed for fresh examples; with it the
    /// prior examples are replayed. Returns `Ok(None)` ("no evidence") if
    /// instrumentation fails or verification yields nothing.
    ///
    /// # Errors
    ///
    /// Returns hard errors only: launch failures, I/O errors and soft-verify
    /// protocol violations.
    pub fn construct_candidate(
        &mut self,
        code: &str,
        prior: Option<&ExampleSet>,
    ) -> Result<Option<Candidate>> {
        let scratch = tempfile::tempdir()?;
        self.source.stage(scratch.path(), code)?;
        let harness = scratch.path().join("replay");

        match self
            .oracle
            .instrument(self.source.language, scratch.path(), &self.source.name, &harness)
        {
            Ok(()) => {}
            Err(e) if e.is_tool_failure() => {
                tracing::warn!(error = %e, "failed to instrument candidate");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let evidence = match prior {
            None => self.verifier.verify(&harness, &self.source.name, None)?,
            Some(examples) => self
                .verifier
                .soft_verify(&harness, &self.source.name, examples)?,
        };
        let Some(mut candidate) = evidence.and_then(|examples| Candidate::new(code, examples)) else {
            tracing::info!("failed to generate oracle");
            return Ok(None);
        };
        tracing::info!(
            score = candidate.score(),
            positive = candidate.examples.positive.len(),
            negative = candidate.examples.negative.len(),
            "candidate verified"
        );

        if !candidate.is_ok() {
            let buckets = self
                .coverage
                .group_examples_by_coverage(
                    &harness,
                    &candidate.examples.negative,
                    REPAIR_GROUP_SIZE,
                    true,
                )
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "coverage unavailable, using all counterexamples");
                    vec![CoverageBucket {
                        signature: Vec::new(),
                        examples: candidate.examples.negative.clone(),
                    }]
                });
            candidate.extra = CandidateExtra::Repair(Enhancement::sample(
                &buckets,
                self.strategy,
                &mut self.rng,
            ));
        } else if prior.is_none() {
            match self.coverage.corpus_coverage(&harness) {
                Ok(report) => candidate.extra = CandidateExtra::Coverage(report),
                Err(e) => tracing::warn!(error = %e, "corpus coverage unavailable"),
            }
        }
        Ok(Some(candidate))
    }
}
