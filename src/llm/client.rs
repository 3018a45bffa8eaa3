// src/llm/client.rs

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::{LlmConfig, Provider};
use crate::llm::backend::{with_retry, Failure, LlmBackend, LlmRunResult, Message, ModelTurn, ToolCall};
use crate::llm::prompt::LlmPrompt;

const PROMPT_ABI_VERSION: &str = "v1-invarforge";
const OPENAI_URL: &str = "https://api.openai.com/v1/responses";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Clone)]
pub struct LlmClient {
    cfg: LlmConfig,
}

impl LlmClient {
    pub fn new(cfg: LlmConfig) -> Result<Self, String> {
        if cfg.api_key.trim().is_empty() {
            return Err(format!(
                "no API key for {:?}; run `invarforge configure` or set the provider's key variable",
                cfg.provider
            ));
        }
        Ok(Self { cfg })
    }

    fn url(&self) -> String {
        let default = match self.cfg.provider {
            Provider::OpenAI => OPENAI_URL,
            Provider::Anthropic => ANTHROPIC_URL,
        };
        self.cfg.base_url.clone().unwrap_or_else(|| default.into())
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        match self.cfg.provider {
            Provider::OpenAI => vec![("Authorization", format!("Bearer {}", self.cfg.api_key))],
            Provider::Anthropic => vec![
                ("x-api-key", self.cfg.api_key.clone()),
                ("anthropic-version", "2023-06-01".into()),
            ],
        }
    }

    /// POSTs `body`, retrying transient failures until `timeout` is spent.
    fn post(&self, body: &Value, timeout: Duration) -> Result<Value, String> {
        let deadline = Instant::now() + timeout;
        let url = self.url();

        with_retry(self.cfg.max_retries, Some(deadline), || {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Failure::Permanent("LLM request timed out".into()));
            }

            let client = reqwest::blocking::Client::builder()
                .timeout(remaining)
                .build()
                .map_err(|e| Failure::Permanent(e.to_string()))?;

            let mut req = client.post(&url).json(body);
            for (k, v) in self.headers() {
                req = req.header(k, v);
            }

            let resp = req.send().map_err(|e| Failure::Transient(e.to_string()))?;
            let status = resp.status();

            if !status.is_success() {
                let text = resp.text().unwrap_or_default();
                return Err(status_failure(status, &text));
            }

            resp.json::<Value>()
                .map_err(|e| Failure::Transient(format!("unreadable LLM response: {e}")))
        })
    }
}

/// 408, 429 and 5xx are retried; any other status fails the request.
fn status_failure(status: StatusCode, body: &str) -> Failure {
    let msg = format!("LLM error {}: {}", status, body.trim());
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Failure::Transient(msg)
    } else {
        Failure::Permanent(msg)
    }
}

impl LlmBackend for LlmClient {
    fn run(&self, prompt: &LlmPrompt, timeout: Duration) -> Result<LlmRunResult, String> {
        let prompt_hash = hash_prompt(prompt);
        let body = completion_body(&self.cfg, prompt, &prompt_hash);
        let json = self.post(&body, timeout)?;

        let cached_tokens = json
            .pointer("/usage/input_tokens_details/cached_tokens")
            .or_else(|| json.pointer("/usage/cache_read_input_tokens"))
            .and_then(Value::as_u64);

        let text = match parse_turn(self.cfg.provider, &json)? {
            ModelTurn::Text(text) => text,
            ModelTurn::ToolCalls { text, .. } => text.unwrap_or_default(),
        };

        Ok(LlmRunResult {
            text,
            prompt_hash,
            cached_tokens,
        })
    }

    fn converse(
        &self,
        messages: &[Message],
        tools: &[Value],
        timeout: Duration,
    ) -> Result<ModelTurn, String> {
        let body = conversation_body(&self.cfg, messages, tools);
        let json = self.post(&body, timeout)?;
        parse_turn(self.cfg.provider, &json)
    }
}

fn hash_prompt(prompt: &LlmPrompt) -> String {
    let mut h = Sha256::new();
    h.update(PROMPT_ABI_VERSION.as_bytes());
    h.update(prompt.system.as_bytes());
    h.update(prompt.user.as_bytes());
    hex::encode(h.finalize())
}

/* ============================================================
   Request bodies
   ============================================================ */

fn completion_body(cfg: &LlmConfig, prompt: &LlmPrompt, prompt_hash: &str) -> Value {
    let mut body = match cfg.provider {
        Provider::OpenAI => json!({
            "model": cfg.model,
            "instructions": prompt.system,
            "input": prompt.user,
            "max_output_tokens": cfg.max_tokens,
            "prompt_cache_key": prompt_hash,
        }),
        Provider::Anthropic => json!({
            "model": cfg.model,
            "max_tokens": cfg.max_tokens,
            "system": prompt.system,
            "messages": [
                { "role": "user", "content": prompt.user }
            ]
        }),
    };

    if let Some(t) = cfg.temperature {
        body["temperature"] = json!(t);
    }
    body
}

fn conversation_body(cfg: &LlmConfig, messages: &[Message], tools: &[Value]) -> Value {
    match cfg.provider {
        Provider::OpenAI => {
            let input: Vec<Value> = messages.iter().map(openai_item).collect();
            json!({
                "model": cfg.model,
                "input": input,
                "tools": tools,
                "tool_choice": "auto",
                "max_output_tokens": cfg.max_tokens,
            })
        }

        Provider::Anthropic => {
            let system: Vec<&str> = messages
                .iter()
                .filter_map(|m| match m {
                    Message::System(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect();

            let mut out: Vec<Value> = Vec::new();
            for m in messages {
                match m {
                    Message::System(_) => {}
                    Message::User(text) => {
                        push_block(&mut out, "user", json!({ "type": "text", "text": text }))
                    }
                    Message::Assistant(text) => {
                        push_block(&mut out, "assistant", json!({ "type": "text", "text": text }))
                    }
                    Message::ToolCall(call) => push_block(
                        &mut out,
                        "assistant",
                        json!({
                            "type": "tool_use",
                            "id": call.call_id,
                            "name": call.name,
                            "input": call.arguments,
                        }),
                    ),
                    Message::ToolResult { call_id, output } => push_block(
                        &mut out,
                        "user",
                        json!({
                            "type": "tool_result",
                            "tool_use_id": call_id,
                            "content": output,
                        }),
                    ),
                }
            }

            let tools: Vec<Value> = tools.iter().map(anthropic_tool).collect();

            json!({
                "model": cfg.model,
                "max_tokens": cfg.max_tokens,
                "system": system.join("\n\n"),
                "messages": out,
                "tools": tools,
            })
        }
    }
}

fn openai_item(m: &Message) -> Value {
    match m {
        Message::System(s) => json!({ "role": "system", "content": s }),
        Message::User(s) => json!({ "role": "user", "content": s }),
        Message::Assistant(s) => json!({ "role": "assistant", "content": s }),
        Message::ToolCall(call) => json!({
            "type": "function_call",
            "call_id": call.call_id,
            "name": call.name,
            "arguments": call.arguments.to_string(),
        }),
        Message::ToolResult { call_id, output } => json!({
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }),
    }
}

/// Consecutive blocks from the same role share one message.
fn push_block(out: &mut Vec<Value>, role: &str, block: Value) {
    if let Some(last) = out.last_mut() {
        if last.get("role").and_then(Value::as_str) == Some(role) {
            if let Some(content) = last.get_mut("content").and_then(Value::as_array_mut) {
                content.push(block);
                return;
            }
        }
    }
    out.push(json!({ "role": role, "content": [block] }));
}

/// Function-tool schemas are written in the Responses API shape.
fn anthropic_tool(schema: &Value) -> Value {
    json!({
        "name": schema.get("name").cloned().unwrap_or(Value::Null),
        "description": schema.get("description").cloned().unwrap_or_else(|| json!("")),
        "input_schema": schema
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({ "type": "object" })),
    })
}

/* ============================================================
   Response parsing
   ============================================================ */

fn parse_turn(provider: Provider, v: &Value) -> Result<ModelTurn, String> {
    let mut texts: Vec<String> = Vec::new();
    let mut calls: Vec<ToolCall> = Vec::new();

    match provider {
        Provider::OpenAI => {
            let output = v
                .get("output")
                .and_then(Value::as_array)
                .ok_or("OpenAI response parse failure: missing output array")?;

            for item in output {
                match item.get("type").and_then(Value::as_str) {
                    Some("function_call") => {
                        let name = item
                            .get("name")
                            .and_then(Value::as_str)
                            .ok_or("function_call missing name")?;
                        let call_id = item
                            .get("call_id")
                            .and_then(Value::as_str)
                            .ok_or("function_call missing call_id")?;
                        let arguments = item
                            .get("arguments")
                            .and_then(Value::as_str)
                            .and_then(|s| serde_json::from_str(s).ok())
                            .unwrap_or_else(|| json!({}));

                        calls.push(ToolCall {
                            call_id: call_id.to_string(),
                            name: name.to_string(),
                            arguments,
                        });
                    }
                    Some("output_text") => {
                        if let Some(t) = item.get("text").and_then(Value::as_str) {
                            texts.push(t.to_string());
                        }
                    }
                    Some("message") => {
                        for c in item
                            .get("content")
                            .and_then(Value::as_array)
                            .into_iter()
                            .flatten()
                        {
                            if c.get("type").and_then(Value::as_str) == Some("output_text") {
                                if let Some(t) = c.get("text").and_then(Value::as_str) {
                                    texts.push(t.to_string());
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Provider::Anthropic => {
            let content = v
                .get("content")
                .and_then(Value::as_array)
                .ok_or("Anthropic response parse failure: missing content")?;

            for block in content {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(t) = block.get("text").and_then(Value::as_str) {
                            texts.push(t.to_string());
                        }
                    }
                    Some("tool_use") => {
                        let call_id = block
                            .get("id")
                            .and_then(Value::as_str)
                            .ok_or("tool_use missing id")?;
                        let name = block
                            .get("name")
                            .and_then(Value::as_str)
                            .ok_or("tool_use missing name")?;

                        calls.push(ToolCall {
                            call_id: call_id.to_string(),
                            name: name.to_string(),
                            arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                        });
                    }
                    _ => {}
                }
            }
        }
    }

    let text = (!texts.is_empty()).then(|| texts.join("\n"));

    match (calls.is_empty(), text) {
        (false, text) => Ok(ModelTurn::ToolCalls { text, calls }),
        (true, Some(text)) => Ok(ModelTurn::Text(text)),
        (true, None) => Err("model returned no tool calls and no text".into()),
    }
}
