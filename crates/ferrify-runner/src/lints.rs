//! Clippy lint summary of an accepted translation

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Clippy lint group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LintCategory {
    /// Code that is outright wrong
    Correctness,
    /// Code that is most likely wrong
    Suspicious,
    /// Non-idiomatic code
    Style,
    /// Needlessly complex code
    Complexity,
    /// Slow code
    Perf,
    /// Strict lints, off by default
    Pedantic,
    /// Lints not in the table
    Unknown,
}

/// Category of the clippy lints translations trip most often
pub static LINT_CATEGORIES: LazyLock<HashMap<&'static str, LintCategory>> = LazyLock::new(|| {
    use LintCategory::{Complexity, Correctness, Pedantic, Perf, Style, Suspicious};
    HashMap::from([
        ("absurd_extreme_comparisons", Correctness),
        ("eq_op", Correctness),
        ("erasing_op", Correctness),
        ("out_of_bounds_indexing", Correctness),
        ("overflow_check_conditional", Correctness),
        ("not_unsafe_ptr_arg_deref", Correctness),
        ("almost_swapped", Correctness),
        ("suspicious_arithmetic_impl", Suspicious),
        ("suspicious_else_formatting", Suspicious),
        ("precedence", Complexity),
        ("float_equality_without_abs", Suspicious),
        ("needless_return", Style),
        ("needless_range_loop", Style),
        ("redundant_field_names", Style),
        ("let_and_return", Style),
        ("collapsible_if", Style),
        ("collapsible_else_if", Style),
        ("new_without_default", Style),
        ("len_zero", Style),
        ("assign_op_pattern", Style),
        ("manual_range_contains", Style),
        ("ptr_arg", Style),
        ("upper_case_acronyms", Style),
        ("missing_safety_doc", Style),
        ("needless_late_init", Style),
        ("single_match", Style),
        ("comparison_chain", Style),
        ("too_many_arguments", Complexity),
        ("unnecessary_cast", Complexity),
        ("identity_op", Complexity),
        ("needless_borrow", Style),
        ("nonminimal_bool", Complexity),
        ("manual_memcpy", Complexity),
        ("char_lit_as_u8", Complexity),
        ("type_complexity", Complexity),
        ("while_let_loop", Complexity),
        ("explicit_counter_loop", Complexity),
        ("useless_conversion", Complexity),
        ("box_collection", Perf),
        ("vec_box", Complexity),
        ("large_enum_variant", Perf),
        ("slow_vector_initialization", Perf),
        ("cast_lossless", Pedantic),
        ("cast_possible_truncation", Pedantic),
        ("cast_sign_loss", Pedantic),
        ("cast_possible_wrap", Pedantic),
        ("similar_names", Pedantic),
        ("many_single_char_names", Pedantic),
        ("missing_panics_doc", Pedantic),
        ("must_use_candidate", Pedantic),
    ])
});

static LINT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"clippy::([a-z_0-9]+)").unwrap()
});

static UNSAFE_USE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\bunsafe\b").unwrap()
});

/// Category of `lint`
#[must_use]
pub fn category_of(lint: &str) -> LintCategory {
    LINT_CATEGORIES
        .get(lint)
        .copied()
        .unwrap_or(LintCategory::Unknown)
}

/// Lint counts of one translation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintSummary {
    /// Occurrences per lint
    pub lints: BTreeMap<String, usize>,
    /// Occurrences per category
    pub categories: BTreeMap<LintCategory, usize>,
    /// Whether the translation contains `unsafe`
    pub uses_unsafe: bool,
}

impl LintSummary {
    /// Count the clippy lints mentioned in `output`
    ///
    /// Each lint is counted once per warning: rendered warnings name their
    /// lint in a `#[warn(clippy::..)]` note or a `clippy::..` help link, and
    /// JSON messages carry it in the lint code.
    #[must_use]
    pub fn from_clippy_output(output: &str, code: &str) -> Self {
        let mut summary = Self {
            uses_unsafe: UNSAFE_USE.is_match(code),
            ..Self::default()
        };
        for message in output.lines().filter(|l| l.starts_with('{')) {
            if let Some(lint) = json_lint(message) {
                summary.add(&lint);
            }
        }
        if summary.lints.is_empty() {
            for block in output.split("\n\n").filter(|b| b.trim_start().starts_with("warning")) {
                if let Some(caps) = LINT_NAME.captures(block) {
                    summary.add(&caps[1]);
                }
            }
        }
        summary
    }

    fn add(&mut self, lint: &str) {
        *self.lints.entry(lint.to_string()).or_default() += 1;
        *self.categories.entry(category_of(lint)).or_default() += 1;
    }

    /// Total lint occurrences
    #[must_use]
    pub fn total(&self) -> usize {
        self.lints.values().sum()
    }
}

fn json_lint(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let code = value.get("message")?.get("code")?.get("code")?.as_str()?;
    code.strip_prefix("clippy::").map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = "warning: unneeded `return` statement\n --> src/lib.rs:2:5\n  |\n2 |     return a + b;\n  |     ^^^^^^^^^^^^\n  |\n  = help: for further information visit https://rust-lang.github.io/rust-clippy/master/index.html#needless_return\n  = note: `#[warn(clippy::needless_return)]` on by default\n\nwarning: this function has too many arguments (8/7)\n --> src/lib.rs:5:1\n  |\n  = note: `#[warn(clippy::too_many_arguments)]` on by default\n\nwarning: `wspace` (lib) generated 2 warnings\n";

    #[test]
    fn test_category_lookup() {
        assert_eq!(category_of("needless_return"), LintCategory::Style);
        assert_eq!(category_of("eq_op"), LintCategory::Correctness);
        assert_eq!(category_of("no_such_lint"), LintCategory::Unknown);
    }

    #[test]
    fn test_rendered_output() {
        let summary = LintSummary::from_clippy_output(RENDERED, "pub fn add(a: i32, b: i32) -> i32 { return a + b; }");
        assert_eq!(summary.lints.get("needless_return"), Some(&1));
        assert_eq!(summary.categories.get(&LintCategory::Complexity), Some(&1));
        assert_eq!(summary.total(), 2);
        assert!(!summary.uses_unsafe);
    }

    #[test]
    fn test_json_output() {
        let output = r#"{"reason":"compiler-message","message":{"code":{"code":"clippy::needless_range_loop","explanation":null},"level":"warning"}}
{"reason":"compiler-message","message":{"code":{"code":"clippy::needless_range_loop","explanation":null},"level":"warning"}}
{"reason":"compiler-message","message":{"code":{"code":"E0308","explanation":null},"level":"error"}}
{"reason":"build-finished","success":true}"#;
        let summary = LintSummary::from_clippy_output(output, "unsafe { f() }");
        assert_eq!(summary.lints.get("needless_range_loop"), Some(&2));
        assert_eq!(summary.categories.get(&LintCategory::Style), Some(&2));
        assert!(summary.uses_unsafe);
    }

    #[test]
    fn test_unsafe_word_boundary() {
        let summary = LintSummary::from_clippy_output("", "let not_unsafe_name = 1;");
        assert!(!summary.uses_unsafe);
    }

    #[test]
    fn test_summary_serializes_lowercase_categories() {
        let summary = LintSummary::from_clippy_output(RENDERED, "");
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"style\":1"));
    }
}
