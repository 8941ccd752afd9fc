//! Code generator backends
//!
//! [`CommandGenerator`] pipes a JSON request into an external program and
//! reads the completion from its stdout, so any model client can be plugged
//! in without linking it. [`ScriptedGenerator`] and [`FailingGenerator`]
//! stand in for a model in tests.

use crate::engine::CodeGenerator;
use crate::error::{Error, Result};
use crate::prompt::{Message, ModelParams, Prompt};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

/// Request body written to the external program's stdin
#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    messages: Vec<Message>,
    temperature: f64,
    prompt: &'a str,
}

/// Backend that delegates to an external program
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    /// Program to run
    pub program: String,
    /// Fixed arguments
    pub args: Vec<String>,
}

impl CommandGenerator {
    /// Backend running `program` with `args`
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a shell-like command line (whitespace separated)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] for an empty command line.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(ToString::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Backend("empty generator command".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }
}

impl CodeGenerator for CommandGenerator {
    fn raw_query(&self, prompt: &Prompt, params: &ModelParams) -> Result<String> {
        let flat = self.stringify(prompt);
        let request = CommandRequest {
            messages: prompt.messages(),
            temperature: params.temperature,
            prompt: &flat,
        };
        let body = serde_json::to_vec(&request)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Backend(format!("failed to start {}: {e}", self.program)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&body)?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::Query(format!(
                "{} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Backend replaying canned responses in order
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    responses: Arc<Mutex<VecDeque<String>>>,
    received: Arc<Mutex<Vec<Prompt>>>,
}

impl ScriptedGenerator {
    /// Backend answering with `responses`, one per query
    #[must_use]
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared log of prompts received so far
    #[must_use]
    pub fn received(&self) -> Arc<Mutex<Vec<Prompt>>> {
        Arc::clone(&self.received)
    }

    /// Responses not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.responses.lock().map_or(0, |r| r.len())
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn raw_query(&self, prompt: &Prompt, _params: &ModelParams) -> Result<String> {
        if let Ok(mut received) = self.received.lock() {
            received.push(prompt.clone());
        }
        self.responses
            .lock()
            .map_err(|_| Error::Backend("script lock poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| Error::Backend("script exhausted".to_string()))
    }
}

/// Backend that always fails
#[derive(Debug, Clone)]
pub struct FailingGenerator {
    message: String,
    transient: bool,
}

impl FailingGenerator {
    /// Fails with a retryable error
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    /// Fails with a permanent error
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl CodeGenerator for FailingGenerator {
    fn raw_query(&self, _prompt: &Prompt, _params: &ModelParams) -> Result<String> {
        if self.transient {
            Err(Error::Query(self.message.clone()))
        } else {
            Err(Error::Backend(self.message.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_in_order() {
        let backend = ScriptedGenerator::new(vec!["one".into(), "two".into()]);
        let params = ModelParams::default();
        assert_eq!(backend.raw_query(&Prompt::default(), &params).unwrap(), "one");
        assert_eq!(backend.remaining(), 1);
        assert_eq!(backend.raw_query(&Prompt::default(), &params).unwrap(), "two");
        assert!(matches!(
            backend.raw_query(&Prompt::default(), &params),
            Err(Error::Backend(_))
        ));
        assert_eq!(backend.received().lock().unwrap().len(), 3);
    }

    #[test]
    fn test_command_line_parse() {
        let backend = CommandGenerator::from_command_line("python3 client.py --model x").unwrap();
        assert_eq!(backend.program, "python3");
        assert_eq!(backend.args, vec!["client.py", "--model", "x"]);
        assert!(CommandGenerator::from_command_line("   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_generator_reads_stdout() {
        let backend = CommandGenerator::new("sh", vec!["-c".into(), "cat >/dev/null; echo '<code>ok</code>'".into()]);
        let out = backend
            .raw_query(&Prompt::new("ctx", "inst"), &ModelParams::default())
            .unwrap();
        assert_eq!(out.trim(), "<code>ok</code>");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_generator_failure_is_transient() {
        let backend = CommandGenerator::new("sh", vec!["-c".into(), "cat >/dev/null; exit 3".into()]);
        let err = backend
            .raw_query(&Prompt::default(), &ModelParams::default())
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_command_generator_missing_program() {
        let backend = CommandGenerator::new("/nonexistent/ferrify-generator", vec![]);
        let err = backend
            .raw_query(&Prompt::default(), &ModelParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }
}
