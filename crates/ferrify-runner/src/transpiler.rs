//! Initial translation
//!
//! Generates a Rust translation of the source unit, keeps the answer with the
//! fewest compile errors out of a few attempts, then tries `cargo fix` and
//! the compile [`Fixer`]. A translation that ends up compiling is written to
//! the results directory beside the original source.

use crate::candidate::SourceUnit;
use crate::compile::CompilationService;
use crate::diagnostics::CompilationOutcome;
use crate::error::Result;
use crate::fixer::{FixStep, Fixer};
use crate::oracle::Language;
use ferrify_gen::{ModelParams, Prompt, QueryEngine, tag};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const TRANSLATION_CONSTRAINTS: [&str; 6] = [
    "Make sure it includes all imports, uses safe rust, and compiles.",
    "Don't use raw pointers.",
    "Use box pointer whenever possible. Box pointers are preferable to other alternatives.",
    "Try not to use Traits if possible. I would not like to have Traits in resulting Rust code.",
    "Try not to use custom Generics if possible.",
    "Do not give me main function.",
];

const SIGNATURE_CONSTRAINT: &str = "Use the same function name, same argument and return types.";

/// How the translation request is worded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptMode {
    /// Translate the whole unit at once
    #[default]
    Base,
    /// Same request, different wording
    Mutate,
    /// Header definitions first, then one function at a time
    DecompIter,
}

/// Declarations of a unit as listed in its JSON sidecar
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecomposedSource {
    /// `#include`s or imports
    #[serde(rename = "Includes")]
    pub includes: Vec<String>,
    /// Struct definitions
    #[serde(rename = "Structs")]
    pub structs: Vec<String>,
    /// Enum definitions
    #[serde(rename = "Enums")]
    pub enums: Vec<String>,
    /// Macro definitions
    #[serde(rename = "Defines")]
    pub defines: Vec<String>,
    /// Type aliases
    #[serde(rename = "TypeDefs")]
    pub type_defs: Vec<String>,
    /// Global variables
    #[serde(rename = "Globals")]
    pub globals: Vec<String>,
    /// Function declarations, aligned with `implementations`
    #[serde(rename = "Function Declarations")]
    pub declarations: Vec<String>,
    /// Function bodies
    #[serde(rename = "Function Implementations")]
    pub implementations: Vec<String>,
}

impl DecomposedSource {
    /// Parse a JSON sidecar
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Everything that is not a function: includes, auxiliary definitions
    /// and structs
    #[must_use]
    pub fn header(&self) -> String {
        let aux = [&self.enums, &self.type_defs, &self.defines, &self.globals]
            .iter()
            .map(|items| items.join("\n"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\n{}\n{aux}\n{}",
            self.includes.join("\n"),
            self.structs.join("\n")
        )
    }

    /// `(name, declaration + implementation)` per function
    #[must_use]
    pub fn functions(&self, language: Language) -> Vec<(String, String)> {
        self.declarations
            .iter()
            .zip(&self.implementations)
            .map(|(decl, body)| (function_name(language, decl, body), format!("{decl}\n{body}")))
            .collect()
    }
}

/// Name of a function from its declaration (C) or implementation (Go)
fn function_name(language: Language, declaration: &str, implementation: &str) -> String {
    let signature = match language {
        Language::Go => {
            let head = implementation.split('{').next().unwrap_or_default();
            let parts: Vec<&str> = head.split('(').collect();
            parts
                .len()
                .checked_sub(2)
                .map_or(head, |idx| parts[idx])
                .to_string()
        }
        _ => declaration.split('(').next().unwrap_or_default().to_string(),
    };
    signature
        .lines()
        .last()
        .unwrap_or_default()
        .split_whitespace()
        .last()
        .unwrap_or("function")
        .to_string()
}

/// Counters across every translation of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranspileStats {
    /// Calls to [`Transpiler::transpile`]
    pub translations: usize,
    /// Generator calls, fixer included
    pub llm_calls: usize,
    /// Fixer verdicts, in order
    pub fix_path: Vec<FixStep>,
}

/// Produces compiling translations of one unit
pub struct Transpiler {
    /// Prompt wording
    pub mode: PromptMode,
    /// Sampling parameters
    pub params: ModelParams,
    /// Example text added to the next prompts
    pub hint: String,
    source: SourceUnit,
    compiler: CompilationService,
    engine: QueryEngine,
    fixer: Option<Fixer>,
    attempt_budget: usize,
    cargo_fix: bool,
    results_dir: PathBuf,
    rng: StdRng,
    stats: TranspileStats,
}

impl std::fmt::Debug for Transpiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transpiler")
            .field("mode", &self.mode)
            .field("params", &self.params)
            .field("unit", &self.source.name)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Transpiler {
    /// Create a transpiler writing accepted translations to `results_dir`
    #[must_use]
    pub fn new(
        source: SourceUnit,
        compiler: CompilationService,
        engine: QueryEngine,
        results_dir: impl Into<PathBuf>,
        rng: StdRng,
    ) -> Self {
        Self {
            mode: PromptMode::Base,
            params: ModelParams::default(),
            hint: String::new(),
            source,
            compiler,
            engine,
            fixer: None,
            attempt_budget: 3,
            cargo_fix: true,
            results_dir: results_dir.into(),
            rng,
            stats: TranspileStats::default(),
        }
    }

    /// Repair compile errors with `fixer`
    #[must_use]
    pub fn with_fixer(mut self, fixer: Option<Fixer>) -> Self {
        self.fixer = fixer;
        self
    }

    /// Generations per translation
    #[must_use]
    pub fn with_attempt_budget(mut self, attempt_budget: usize) -> Self {
        self.attempt_budget = attempt_budget.max(1);
        self
    }

    /// Whether to run `cargo fix` before the fixer
    #[must_use]
    pub fn with_cargo_fix(mut self, cargo_fix: bool) -> Self {
        self.cargo_fix = cargo_fix;
        self
    }

    /// Starting sampling parameters
    #[must_use]
    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }

    /// Counters so far
    #[must_use]
    pub fn stats(&self) -> &TranspileStats {
        &self.stats
    }

    /// Compiler and generator, for repair rounds sharing the workspace
    pub fn parts_mut(&mut self) -> (&mut CompilationService, &QueryEngine) {
        (&mut self.compiler, &self.engine)
    }

    /// Translate the unit
    ///
    /// Returns the accepted translation, or None if no compiling
    /// translation was found.
    ///
    /// # Errors
    ///
    /// Returns generation failures and compilation-service errors.
    pub fn transpile(&mut self) -> Result<Option<String>> {
        self.stats.translations += 1;
        tracing::info!(unit = %self.source.name, mode = ?self.mode, "transpiling");
        let (code, outcome) = match self.mode {
            PromptMode::Base => self.best_of(&self.base_prompt(), "base")?,
            PromptMode::Mutate => self.best_of(&self.mutated_prompt(), "mutate")?,
            PromptMode::DecompIter => self.decomposed()?,
        };
        self.finish(code, outcome)
    }

    fn base_prompt(&self) -> Prompt {
        let language = self.source.language;
        let mut constraints = vec![
            "Give me only the refactored code, don't add explanations comments or anything else."
                .to_string(),
            SIGNATURE_CONSTRAINT.to_string(),
        ];
        constraints.extend(TRANSLATION_CONSTRAINTS.iter().map(ToString::to_string));
        Prompt::new(
            format!(
                "You are given a {language} code contained in <code> tags. We need to translate this code to Rust.\n\n{}",
                tag(&self.source.code, "code")
            ),
            format!("Give me Rust refactoring of above {language} code."),
        )
        .with_constraints(constraints)
        .with_extra_information(self.hint.clone())
    }

    fn mutated_prompt(&self) -> Prompt {
        let language = self.source.language;
        let mut constraints = vec![
            "Keep the public interface identical: function names, parameter types and return types must not change."
                .to_string(),
            "Reproduce the exact runtime behaviour of the original, including integer overflow and error cases."
                .to_string(),
        ];
        constraints.extend(TRANSLATION_CONSTRAINTS.iter().map(ToString::to_string));
        Prompt::new(
            format!(
                "Below is a program written in {language}, enclosed in <code> tags.\n\n{}",
                tag(&self.source.code, "code")
            ),
            "Port this program to idiomatic Rust so that it behaves identically on every input.",
        )
        .with_constraints(constraints)
        .with_extra_information(self.hint.clone())
    }

    fn piece_prompt(&self, code: &str, answer: &str) -> Prompt {
        let language = self.source.language;
        let mut constraints = vec![TRANSLATION_CONSTRAINTS[0].to_string(), SIGNATURE_CONSTRAINT.to_string()];
        constraints.extend(TRANSLATION_CONSTRAINTS[1..].iter().map(ToString::to_string));
        Prompt::new(
            format!(
                "You are given a {language} code contained in <code> tags. We need to translate this code to Rust.{}",
                tag(code, "code")
            ),
            format!("Give me the Rust translation of the above {language} code."),
        )
        .with_constraints(constraints)
        .with_preamble(answer)
    }

    fn header_prompt(&self, header: &str) -> Prompt {
        let language = self.source.language;
        Prompt::new(
            format!(
                "You are given a {language} code contained in <code> tags. This code contains only import statements and possibly structs and global variables. We need to translate this code piece to Rust.\n{}",
                tag(header, "code")
            ),
            format!("Give me the Rust translation of the above {language} code."),
        )
        .with_constraints(TRANSLATION_CONSTRAINTS.iter().map(ToString::to_string).collect())
    }

    /// Generate up to the attempt budget, keep the answer with the fewest
    /// errors and leave it built in the workspace
    fn best_of(&mut self, prompt: &Prompt, label: &str) -> Result<(String, CompilationOutcome)> {
        let rendered = self.engine.stringify_prompt(prompt);
        let mut best: Option<(String, usize)> = None;
        for attempt in 1..=self.attempt_budget {
            let code = self.engine.generate_code(prompt, &self.params)?;
            self.stats.llm_calls += 1;
            let outcome = self
                .compiler
                .compile_phased(&code, &rendered, &format!("{label}_{attempt}"))?;
            tracing::info!(attempt, errors = outcome.total, "translation compiled");
            if best.as_ref().is_none_or(|(_, fewest)| outcome.total < *fewest) {
                best = Some((code, outcome.total));
            }
            if outcome.is_clean() {
                break;
            }
        }
        let code = best.map(|(code, _)| code).unwrap_or_default();
        let outcome = self.compiler.compile_phased(&code, &rendered, label)?;
        Ok((code, outcome))
    }

    fn decomposed(&mut self) -> Result<(String, CompilationOutcome)> {
        let pieces = match DecomposedSource::from_json(&self.source.json) {
            Ok(pieces) => pieces,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable declaration sidecar, translating whole unit");
                return self.best_of(&self.base_prompt(), "base");
            }
        };

        let mut source_so_far = pieces.header();
        let mut answer = String::new();
        let mut prompt = self.header_prompt(&source_so_far);
        let mut label = "header".to_string();
        for (name, function) in pieces.functions(self.source.language) {
            tracing::info!(piece = %label, "translating piece");
            let (code, _) = self.best_of(&prompt, &label)?;
            answer.push_str(&code);
            source_so_far.push('\n');
            source_so_far.push_str(&function);
            prompt = self.piece_prompt(&source_so_far, &answer);
            label = name;
        }
        tracing::info!(piece = %label, "translating piece");
        let (code, _) = self.best_of(&prompt, &label)?;
        answer.push_str(&code);

        let rendered = self.engine.stringify_prompt(&prompt);
        let outcome = self.compiler.compile_phased(&answer, &rendered, &label)?;
        Ok((answer, outcome))
    }

    fn finish(&mut self, mut code: String, mut outcome: CompilationOutcome) -> Result<Option<String>> {
        if self.cargo_fix && !outcome.is_clean() {
            let report = self.compiler.cargo_fix()?;
            if report.outcome.total <= outcome.total {
                code = report.code;
                outcome = report.outcome;
            }
        }

        if !outcome.is_clean() {
            let Some(fixer) = self.fixer.clone() else {
                tracing::info!(errors = outcome.total, "translation failed, no fixer set");
                return Ok(None);
            };
            tracing::info!(errors = outcome.total, "translation failed, fixing compile errors");
            let initial = outcome.total;
            let fixed = fixer.fix(&code, outcome, &mut self.compiler, &self.engine, &mut self.rng)?;
            self.stats.llm_calls += fixed.llm_calls;
            self.stats.fix_path.extend(fixed.path.iter().copied());
            tracing::info!(
                from = initial,
                to = fixed.remaining_errors,
                path = ?fixed.path.iter().map(|s| s.code()).collect::<Vec<_>>(),
                "compile fixing done"
            );
            if fixed.remaining_errors > 0 {
                return Ok(None);
            }
            code = fixed.code;
        }

        tracing::info!("translation compiles");
        self.source.stage(&self.results_dir, &code)?;
        Ok(Some(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, MockCommandRunner};
    use crate::workspace::Workspace;
    use ferrify_gen::ScriptedGenerator;
    use rand::SeedableRng;
    use std::sync::Arc;

    const E0308: &str = "   Compiling wspace v0.1.0\nerror[E0308]: mismatched types\n --> src/lib.rs:1:1\n";

    fn unit(json: &str) -> SourceUnit {
        SourceUnit {
            language: Language::C,
            name: "add".into(),
            code: "int add(int a, int b) { return a + b; }".into(),
            json: json.into(),
        }
    }

    fn transpiler(
        runner: MockCommandRunner,
        responses: Vec<&str>,
        json: &str,
    ) -> (tempfile::TempDir, Transpiler, ScriptedGenerator) {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::open(tmp.path().join("wspace")).unwrap();
        let compiler = CompilationService::new(Arc::new(runner), ws);
        let generator = ScriptedGenerator::new(responses.into_iter().map(String::from).collect());
        let engine = QueryEngine::new(Box::new(generator.clone()), Vec::new());
        let results = tmp.path().join("results");
        let t = Transpiler::new(unit(json), compiler, engine, results, StdRng::seed_from_u64(1));
        (tmp, t, generator)
    }

    #[test]
    fn test_prompt_mode_serde() {
        assert_eq!(
            serde_yaml::from_str::<PromptMode>("decomp-iter").unwrap(),
            PromptMode::DecompIter
        );
    }

    #[test]
    fn test_clean_translation_is_staged() {
        let (tmp, mut t, _) = transpiler(
            MockCommandRunner::new(),
            vec!["<code>pub fn add(a: i32, b: i32) -> i32 { a + b }</code>"],
            "{}",
        );
        let code = t.transpile().unwrap().unwrap();
        assert_eq!(code, "pub fn add(a: i32, b: i32) -> i32 { a + b }");
        let results = tmp.path().join("results");
        assert_eq!(std::fs::read_to_string(results.join("add.rs")).unwrap(), code);
        assert!(results.join("add.c").exists());
        assert!(results.join("add.json").exists());
        assert_eq!(t.stats().llm_calls, 1);
    }

    #[test]
    fn test_best_of_keeps_fewest_errors() {
        let two = format!("{E0308}error[E0599]: no method\n");
        let runner = MockCommandRunner::new().with_builds(vec![
            CommandOutput::failure(101, two.clone()),
            CommandOutput::failure(101, E0308),
            CommandOutput::failure(101, two),
            CommandOutput::failure(101, E0308),
        ]);
        let (_tmp, mut t, _) = transpiler(runner, vec!["<code>a</code>", "<code>b</code>", "<code>c</code>"], "{}");
        let (code, outcome) = t.best_of(&t.base_prompt(), "base").unwrap();
        assert_eq!(code, "b");
        assert_eq!(outcome.total, 1);
    }

    #[test]
    fn test_no_fixer_rejects_broken_translation() {
        let runner = MockCommandRunner::new()
            .with_builds((0..8).map(|_| CommandOutput::failure(101, E0308)).collect());
        let (tmp, t, _) = transpiler(runner, vec!["<code>x</code>"; 3], "{}");
        let mut t = t.with_cargo_fix(false);
        assert!(t.transpile().unwrap().is_none());
        assert!(!tmp.path().join("results").join("add.rs").exists());
    }

    #[test]
    fn test_fixer_rescues_translation() {
        let runner = MockCommandRunner::new()
            .with_builds((0..4).map(|_| CommandOutput::failure(101, E0308)).collect());
        let (_tmp, t, _) = transpiler(
            runner.clone(),
            vec!["<code>x</code>", "<code>y</code>", "<code>z</code>", "<code>fixed</code>"],
            "{}",
        );
        let mut t = t
            .with_cargo_fix(false)
            .with_fixer(Some(Fixer::new(3, ModelParams::default())));
        assert_eq!(t.transpile().unwrap().as_deref(), Some("fixed"));
        assert_eq!(t.stats().llm_calls, 4);
        assert_eq!(t.stats().fix_path, vec![FixStep::Subset]);
    }

    #[test]
    fn test_cargo_fix_runs_on_errors() {
        // attempt, rebuild of the best, and the build before `cargo fix`
        let runner = MockCommandRunner::new().with_builds(vec![
            CommandOutput::failure(101, E0308),
            CommandOutput::failure(101, E0308),
            CommandOutput::failure(101, E0308),
        ]);
        let (_tmp, t, _) = transpiler(runner.clone(), vec!["<code>x</code>"; 3], "{}");
        let mut t = t.with_attempt_budget(1);
        let code = t.transpile().unwrap();
        assert_eq!(runner.count("cargo_fix"), 1);
        assert_eq!(code.as_deref(), Some("x"));
    }

    #[test]
    fn test_hint_reaches_prompt() {
        let (_tmp, mut t, generator) = transpiler(MockCommandRunner::new(), vec!["<code>f</code>"], "{}");
        t.hint = "Example 0: 1 + 2 = 3".into();
        t.transpile().unwrap();
        let received = generator.received();
        let prompts = received.lock().unwrap();
        assert!(prompts[0].extra_information.contains("1 + 2 = 3"));
    }

    #[test]
    fn test_mutate_wording_differs() {
        let (_tmp, t, _) = transpiler(MockCommandRunner::new(), vec![], "{}");
        assert_ne!(t.base_prompt().instruction, t.mutated_prompt().instruction);
        assert!(t.mutated_prompt().context.contains("int add"));
    }

    #[test]
    fn test_decomposed_translation_accumulates_pieces() {
        let json = r##"{
            "Includes": ["#include <stdint.h>"],
            "Function Declarations": ["int add(int a, int b);", "int twice(int a);"],
            "Function Implementations": ["int add(int a, int b) { return a + b; }", "int twice(int a) { return add(a, a); }"]
        }"##;
        let (tmp, t, generator) = transpiler(
            MockCommandRunner::new(),
            vec!["<code>use std::num::Wrapping;\n</code>", "<code>fn add() {}\n</code>", "<code>fn twice() {}\n</code>"],
            json,
        );
        let mut t = t;
        t.mode = PromptMode::DecompIter;
        let code = t.transpile().unwrap().unwrap();
        assert_eq!(code, "use std::num::Wrapping;\nfn add() {}\nfn twice() {}\n");
        let received = generator.received();
        let prompts = received.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].context.contains("only import statements"));
        assert_eq!(prompts[2].preamble, "use std::num::Wrapping;\nfn add() {}\n");
        assert!(tmp.path().join("wspace/logs/prog_twice.err").exists());
    }

    #[test]
    fn test_function_names() {
        assert_eq!(function_name(Language::C, "static int\nadd(int a, int b);", ""), "add");
        assert_eq!(
            function_name(Language::Go, "", "func (p *Point) Norm() float64 {"),
            "Norm"
        );
        assert_eq!(function_name(Language::Go, "", "func Add(a, b int) int {"), "Add");
    }
}
