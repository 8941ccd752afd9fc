//! Ferrify Code Generator Contract
//!
//! The code generator is an opaque collaborator: a structured prompt goes in,
//! response text comes out, and a code block is extracted from it. This crate
//! holds the prompt model, the [`QueryEngine`] that decorates prompts with
//! global constraints, the explicit [`RetryPolicy`] used for network calls,
//! and a few [`CodeGenerator`] backends.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod engine;
pub mod error;
pub mod prompt;
pub mod retry;

pub use backend::{CommandGenerator, FailingGenerator, ScriptedGenerator};
pub use engine::{CodeGenerator, QueryEngine, extract_code};
pub use error::{Error, Result};
pub use prompt::{Message, ModelParams, Prompt, Role, tag};
pub use retry::{Exhausted, RetryPolicy};
