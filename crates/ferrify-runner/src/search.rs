//! Fallback strategies
//!
//! After an imperfect initial candidate the driver asks the configured
//! [`Fallback`] for the next candidate once per round. Every strategy except
//! [`Fallback::Fix`] produces a fresh translation; `Fix` runs
//! [`SemanticRepair`], a bounded loop of counterexample-guided repair
//! prompts.

use crate::candidate::{Candidate, CandidateFactory};
use crate::compile::CompilationService;
use crate::error::Result;
use crate::transpiler::{PromptMode, Transpiler};
use ferrify_gen::{Message, ModelParams, QueryEngine};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Generations per repair round before giving up on a compiling fix
pub const COMPILE_RETRY_LIMIT: usize = 5;

/// Standard deviation of a temperature step
pub const TEMPERATURE_STEP: f64 = 0.1;

/// Strategy for producing the next candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fallback {
    /// Translate again with unchanged parameters
    Restart,
    /// Translate again at a perturbed temperature
    ParamSearch,
    /// Translate again with the alternative wording
    PromptSearch,
    /// Translate again piece by piece
    Simplify,
    /// Repair the candidate with counterexamples
    #[default]
    Fix,
}

impl std::fmt::Display for Fallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Restart => "restart",
            Self::ParamSearch => "param-search",
            Self::PromptSearch => "prompt-search",
            Self::Simplify => "simplify",
            Self::Fix => "fix",
        };
        write!(f, "{name}")
    }
}

/// What one fallback round produced
#[derive(Debug, Clone)]
pub enum Proposal {
    /// A verified candidate
    Verified(Candidate),
    /// Repair cleared every known counterexample; the result of fuzzing it
    /// again from scratch
    Repaired(Option<Candidate>),
    /// The new translation did not compile
    NotCompiling,
    /// The new translation compiled but produced no evidence
    NoEvidence,
}

/// Settings of a semantic repair loop
#[derive(Debug, Clone, PartialEq)]
pub struct RepairSettings {
    /// Repair rounds
    pub budget: usize,
    /// Counterexamples per prompt
    pub n_examples: usize,
    /// Keep rounds as conversation history
    pub conversation: bool,
    /// Rounds of history kept
    pub window: usize,
    /// Reject repairs that do not strictly improve the score
    pub pruning: bool,
}

/// Counterexample-guided repair of one candidate
#[derive(Debug, Clone)]
pub struct SemanticRepair {
    restart: usize,
    settings: RepairSettings,
    params: ModelParams,
    history: Vec<Message>,
    rounds: usize,
    llm_calls: usize,
}

impl SemanticRepair {
    /// Repair loop for fallback round `restart`
    #[must_use]
    pub fn new(restart: usize, settings: RepairSettings, params: ModelParams) -> Self {
        Self {
            restart,
            settings,
            params,
            history: Vec::new(),
            rounds: 0,
            llm_calls: 0,
        }
    }

    /// Rounds run so far
    #[must_use]
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Generator calls so far
    #[must_use]
    pub fn llm_calls(&self) -> usize {
        self.llm_calls
    }

    /// Conversation kept so far
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Repair until the candidate is ok or the budget runs out
    ///
    /// # Errors
    ///
    /// Returns generation failures and hard candidate-construction errors.
    pub fn optimize<R: Rng>(
        &mut self,
        mut candidate: Candidate,
        compiler: &mut CompilationService,
        engine: &QueryEngine,
        factory: &mut CandidateFactory<R>,
    ) -> Result<Candidate> {
        while self.rounds < self.settings.budget {
            tracing::info!(
                round = self.rounds,
                history = self.history.len(),
                "starting repair round"
            );
            candidate = self.fix_round(candidate, compiler, engine, factory)?;
            tracing::info!(score = candidate.score(), "repair round finished");
            self.rounds += 1;
            if candidate.is_ok() {
                break;
            }
        }
        Ok(candidate)
    }

    /// One repair round; returns the input candidate when the round fails
    ///
    /// # Errors
    ///
    /// Returns generation failures and hard candidate-construction errors.
    pub fn fix_round<R: Rng>(
        &mut self,
        candidate: Candidate,
        compiler: &mut CompilationService,
        engine: &QueryEngine,
        factory: &mut CandidateFactory<R>,
    ) -> Result<Candidate> {
        let window = self.history.len().min(self.settings.window * 2);
        let source = factory.source().clone();
        let prompt = candidate.repair_prompt(
            engine,
            &source,
            self.settings.n_examples,
            &self.history[..window],
            factory.rng(),
        )?;
        let rendered = engine.stringify_prompt(&prompt);

        let mut compiled = None;
        for trial in 0..COMPILE_RETRY_LIMIT {
            let code = engine.generate_code(&prompt, &self.params)?;
            self.llm_calls += 1;
            let log_id = format!(
                "{}_{}_{trial}",
                self.restart,
                self.settings.budget - self.rounds
            );
            if compiler.compile_coarse(&code, &rendered, &log_id)?.is_clean() {
                compiled = Some(code);
                break;
            }
            tracing::info!(trial, "repaired code does not compile, retrying");
        }
        let Some(code) = compiled else {
            tracing::info!("no compiling repair found, giving up on this round");
            return Ok(candidate);
        };

        let Some(repaired) = factory.construct_candidate(&code, Some(&candidate.examples))? else {
            tracing::info!("repaired candidate produced no evidence");
            return Ok(candidate);
        };
        if self.settings.pruning && repaired <= candidate {
            tracing::info!(
                old = candidate.score(),
                new = repaired.score(),
                "repair does not improve the score, discarding"
            );
            return Ok(candidate);
        }

        if self.settings.conversation {
            self.history.push(Message::user(prompt.to_string()));
            self.history.push(Message::assistant(code));
        }
        Ok(repaired)
    }
}

/// Standard normal sample by the Box-Muller transform
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen_range(0.0..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Gaussian step of [`TEMPERATURE_STEP`] from `current`, clamped to [0, 1]
pub fn mutate_temperature<R: Rng + ?Sized>(current: f64, rng: &mut R) -> f64 {
    (current + TEMPERATURE_STEP * standard_normal(rng)).clamp(0.0, 1.0)
}

/// Counters a fallback run accumulates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Semantic repair rounds
    pub fix_rounds: usize,
    /// Generator calls spent in semantic repair
    pub llm_calls: usize,
}

impl Fallback {
    /// Produce the next candidate after `candidate`
    ///
    /// `round` numbers the fallback rounds; `rng` drives temperature steps.
    ///
    /// # Errors
    ///
    /// Returns generation failures, compilation-service errors and hard
    /// candidate-construction errors.
    #[allow(clippy::too_many_arguments)]
    pub fn propose_next<R: Rng, G: Rng + ?Sized>(
        self,
        round: usize,
        candidate: &Candidate,
        transpiler: &mut Transpiler,
        factory: &mut CandidateFactory<R>,
        settings: &RepairSettings,
        stats: &mut SearchStats,
        rng: &mut G,
    ) -> Result<Proposal> {
        tracing::info!(strategy = %self, round, "fallback round");
        match self {
            Self::Fix => {
                let params = transpiler.params;
                let mut repair = SemanticRepair::new(round, settings.clone(), params);
                let (compiler, engine) = transpiler.parts_mut();
                let repaired = repair.optimize(candidate.clone(), compiler, engine, factory)?;
                stats.fix_rounds += repair.rounds();
                stats.llm_calls += repair.llm_calls();
                if !repaired.is_ok() {
                    return Ok(Proposal::Verified(repaired));
                }
                tracing::info!("known counterexamples cleared, verifying again");
                Ok(Proposal::Repaired(factory.construct_candidate(&repaired.code, None)?))
            }
            Self::Restart | Self::ParamSearch | Self::PromptSearch | Self::Simplify => {
                match self {
                    Self::ParamSearch => {
                        let temperature = mutate_temperature(transpiler.params.temperature, rng);
                        tracing::info!(temperature, "temperature changed");
                        transpiler.params.temperature = temperature;
                    }
                    Self::PromptSearch => transpiler.mode = PromptMode::Mutate,
                    Self::Simplify => transpiler.mode = PromptMode::DecompIter,
                    _ => {}
                }
                let Some(code) = transpiler.transpile()? else {
                    return Ok(Proposal::NotCompiling);
                };
                tracing::info!("found a compiling translation, checking equivalence");
                Ok(match factory.construct_candidate(&code, None)? {
                    Some(next) => Proposal::Verified(next),
                    None => Proposal::NoEvidence,
                })
            }
        }
    }
}
