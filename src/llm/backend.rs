// src/llm/backend.rs
//
// The seam between the pipeline and a language model. The repair loop and the
// generator only see `LlmBackend`; `LlmClient` is the HTTP implementation.

use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::llm::prompt::LlmPrompt;

#[derive(Debug, Clone)]
pub struct LlmRunResult {
    pub text: String,
    pub prompt_hash: String,
    pub cached_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// One entry of a tool-using conversation, provider neutral.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    System(String),
    User(String),
    Assistant(String),
    ToolCall(ToolCall),
    ToolResult { call_id: String, output: String },
}

/// What the model did with its turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    Text(String),
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

pub trait LlmBackend: Send + Sync {
    /// Single-shot completion.
    fn run(&self, prompt: &LlmPrompt, timeout: Duration) -> Result<LlmRunResult, String>;

    /// One model turn of a conversation with function tools available.
    fn converse(
        &self,
        messages: &[Message],
        tools: &[Value],
        timeout: Duration,
    ) -> Result<ModelTurn, String>;
}

/// Outcome of one failed try inside [`with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Worth another try: transport errors, 429, 5xx.
    Transient(String),
    /// Will fail the same way again: bad key, malformed request.
    Permanent(String),
}

/// Runs `op` up to `attempts` times with a growing pause between tries.
///
/// A permanent failure ends the loop at once. No retry is started once
/// `deadline` has passed, and no pause runs past it.
pub fn with_retry<T>(
    attempts: u32,
    deadline: Option<Instant>,
    mut op: impl FnMut() -> Result<T, Failure>,
) -> Result<T, String> {
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op() {
            Ok(v) => return Ok(v),
            Err(Failure::Permanent(e)) => return Err(e),
            Err(Failure::Transient(e)) => last_err = Some(e),
        }

        if attempt == attempts {
            break;
        }

        let pause = Duration::from_millis(350 * attempt as u64);
        match deadline {
            Some(d) if Instant::now() + pause >= d => break,
            _ => thread::sleep(pause),
        }
    }

    Err(last_err.unwrap_or_else(|| "unknown LLM error".into()))
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retry_returns_first_success() {
        let calls = Cell::new(0);
        let out = with_retry(3, None, || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(Failure::Transient("503".into()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(out, Ok(7));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn retry_gives_up_with_the_last_error() {
        let calls = Cell::new(0);
        let out: Result<(), String> = with_retry(2, None, || {
            calls.set(calls.get() + 1);
            Err(Failure::Transient(format!("fail {}", calls.get())))
        });
        assert_eq!(out, Err("fail 2".to_string()));
    }

    #[test]
    fn retry_stops_at_the_deadline() {
        let calls = Cell::new(0);
        let deadline = Instant::now() + Duration::from_millis(10);
        let out: Result<(), String> = with_retry(5, Some(deadline), || {
            calls.set(calls.get() + 1);
            Err(Failure::Transient("timeout".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let calls = Cell::new(0);
        let out: Result<(), String> = with_retry(5, None, || {
            calls.set(calls.get() + 1);
            Err(Failure::Permanent("LLM error 401 Unauthorized".into()))
        });
        assert_eq!(out, Err("LLM error 401 Unauthorized".to_string()));
        assert_eq!(calls.get(), 1);
    }
}
