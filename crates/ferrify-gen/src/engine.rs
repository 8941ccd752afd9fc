//! Query engine
//!
//! Wraps a [`CodeGenerator`] backend with global constraints, the network
//! retry policy, and code-block extraction.

use crate::error::{Error, Result};
use crate::prompt::{ModelParams, Prompt};
use crate::retry::RetryPolicy;
use regex::Regex;
use std::sync::LazyLock;

static TAGGED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"<code>(?P<code>[\s\S]*?)</code>").unwrap()
});

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"```(?:rust)?(?P<code>[\s\S]*?)```").unwrap()
});

/// Constraints appended to every code-generation request
pub const OUTPUT_CONSTRAINTS: [&str; 2] = [
    "Give me code only, no explanation.",
    "Place your code inside a <code></code> tag.",
];

/// Text-generation backend
///
/// Implementations map transient failures to [`Error::Query`] so the engine
/// retries them, and everything else to [`Error::Backend`].
pub trait CodeGenerator: Send + Sync {
    /// Send one prompt and return the raw response text
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot produce a response.
    fn raw_query(&self, prompt: &Prompt, params: &ModelParams) -> Result<String>;

    /// Flat text rendering of a prompt, for logs and text-only backends
    fn stringify(&self, prompt: &Prompt) -> String {
        prompt
            .messages()
            .iter()
            .map(|m| format!("{}:\n{}\n", m.role, m.content))
            .collect()
    }
}

/// Backend plus the policies every request goes through
pub struct QueryEngine {
    backend: Box<dyn CodeGenerator>,
    global_constraints: Vec<String>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("global_constraints", &self.global_constraints)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    /// Engine over `backend` with the network retry policy
    #[must_use]
    pub fn new(backend: Box<dyn CodeGenerator>, global_constraints: Vec<String>) -> Self {
        Self {
            backend,
            global_constraints,
            retry: RetryPolicy::network(),
        }
    }

    /// Replace the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Constraints added to every code request
    #[must_use]
    pub fn global_constraints(&self) -> &[String] {
        &self.global_constraints
    }

    /// Query the backend under the retry policy
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetriesExhausted`] once the policy gives up, or the
    /// backend's own error if it was not retryable.
    pub fn query(&self, prompt: &Prompt, params: &ModelParams) -> Result<String> {
        self.retry
            .run(|_| self.backend.raw_query(prompt, params), Error::is_retryable)
            .map_err(|exhausted| match exhausted.last {
                Error::Query(last) => Error::RetriesExhausted {
                    attempts: exhausted.attempts,
                    elapsed_ms: exhausted.elapsed.as_millis() as u64,
                    last,
                },
                other => other,
            })
    }

    /// Ask for code and extract it from the response
    ///
    /// # Errors
    ///
    /// Propagates [`QueryEngine::query`] failures.
    pub fn generate_code(&self, prompt: &Prompt, params: &ModelParams) -> Result<String> {
        let mut constrained = prompt.clone();
        constrained
            .constraints
            .extend(self.global_constraints.iter().cloned());
        constrained
            .constraints
            .extend(OUTPUT_CONSTRAINTS.iter().map(ToString::to_string));
        let response = self.query(&constrained, params)?;
        tracing::debug!(chars = response.len(), "generator responded");
        Ok(extract_code(&response))
    }

    /// Flat rendering of a prompt as the backend sees it
    #[must_use]
    pub fn stringify_prompt(&self, prompt: &Prompt) -> String {
        self.backend.stringify(prompt)
    }
}

/// Extract the first `<code>` block, else the first fenced block, else the
/// whole response
#[must_use]
pub fn extract_code(response: &str) -> String {
    if let Some(caps) = TAGGED_BLOCK.captures(response) {
        return caps["code"].to_string();
    }
    if let Some(caps) = FENCED_BLOCK.captures(response) {
        return caps["code"].to_string();
    }
    tracing::debug!("no code block in response");
    response.trim().to_string()
}
