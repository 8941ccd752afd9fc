//! Ferrify
//!
//! LLM-driven translation of C and Go units to Rust, checked by differential
//! fuzzing against the original and repaired until equivalent.
//!
//! - [`generator`]: the code-generator contract and backends
//! - [`runner`]: compilation, verification, scoring, repair and the driver

#![forbid(unsafe_code)]

pub use ferrify_gen as generator;
pub use ferrify_runner as runner;

pub use ferrify_gen::{CodeGenerator, QueryEngine};
pub use ferrify_runner::{Candidate, Executor, Options, ReturnCode, RunReport};
