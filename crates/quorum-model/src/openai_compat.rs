// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shared driver for OpenAI-compatible chat completion APIs.
//!
//! Most hosted providers and every local server speak the same
//! `/chat/completions` SSE wire format; this single driver covers all of
//! them, configured with a base URL and auth style per provider.

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    catalog,
    provider::ResponseStream,
    retry::{with_backoff, ProviderError},
    CompletionRequest, MessageContent, ResponseEvent, Role,
};

pub struct OpenAICompatProvider {
    /// Canonical provider id returned by `ModelProvider::name()`.
    driver_name: String,
    /// Model id forwarded to the API.
    model: String,
    api_key: Option<String>,
    /// Full chat completions URL.
    chat_url: String,
    default_max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    pub fn new(
        driver_name: impl Into<String>,
        model: String,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let driver_name = driver_name.into();
        let default_max_tokens = max_tokens.unwrap_or_else(|| {
            catalog::lookup(&driver_name, &model)
                .map(|e| e.max_output_tokens)
                .unwrap_or(catalog::DEFAULT_MAX_OUTPUT_TOKENS)
        });
        Self {
            driver_name,
            model,
            api_key,
            chat_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            default_max_tokens,
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for OpenAICompatProvider {
    fn name(&self) -> &str {
        &self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages = build_openai_messages(&req.messages);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let requested = req.max_tokens.unwrap_or(self.default_max_tokens);
        let max_tokens = catalog::cap_max_tokens(&self.driver_name, &self.model, requested);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "max_tokens": max_tokens,
            "temperature": self.temperature,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            driver = %self.driver_name,
            model = %self.model,
            tool_count = tools.len(),
            message_count = messages.len(),
            "sending completion request"
        );

        let resp = with_backoff(&self.driver_name, || async {
            let mut http_req = self.client.post(&self.chat_url).json(&body);
            if let Some(key) = &self.api_key {
                http_req = http_req.bearer_auth(key);
            }
            let resp = http_req
                .send()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Status {
                    provider: self.driver_name.clone(),
                    status: status.as_u16(),
                    body: text,
                });
            }
            Ok(resp)
        })
        .await
        .with_context(|| format!("{} completion request failed", self.driver_name))?;

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across TCP packets.  Maintain a line buffer
        // across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// The trailing incomplete line stays in `buf` until the next TCP chunk
/// extends it.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
///
/// Returns `None` for empty lines, comments, and unparseable payloads.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<ResponseEvent>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    Some(Ok(parse_sse_chunk(&v)))
}

fn parse_sse_chunk(v: &Value) -> ResponseEvent {
    // Usage-only chunk (emitted when stream_options.include_usage = true).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return ResponseEvent::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };
    }

    let delta = &v["choices"][0]["delta"];

    // Tool-call fragment.  Each SSE chunk carries one fragment in practice;
    // the index routes accumulation downstream.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return ResponseEvent::ToolCall {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
        };
    }

    // Thinking delta: `reasoning_content` (llama.cpp, DeepSeek, Qwen) or
    // `reasoning` (OpenRouter and other aggregators).
    let thinking = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(t) = thinking.filter(|t| !t.is_empty()) {
        return ResponseEvent::ThinkingDelta(t.to_string());
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return ResponseEvent::TextDelta(text.to_string());
    }

    ResponseEvent::TextDelta(String::new())
}

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert the internal message list into the OpenAI wire-format JSON array.
///
/// Consecutive `tool_call` messages are merged into a single assistant
/// message with a `tool_calls` array, which is what the parallel-tool-call
/// wire contract requires.  Thinking text is never replayed to the API.
pub(crate) fn build_openai_messages(messages: &[crate::Message]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::with_capacity(messages.len());
    let mut i = 0;

    while i < messages.len() {
        let m = &messages[i];

        if let MessageContent::ToolCall {
            tool_call_id,
            function,
        } = &m.content
        {
            let mut calls = vec![json!({
                "id": tool_call_id,
                "type": "function",
                "function": { "name": function.name, "arguments": function.arguments },
            })];
            i += 1;
            while i < messages.len() {
                if let MessageContent::ToolCall {
                    tool_call_id,
                    function,
                } = &messages[i].content
                {
                    calls.push(json!({
                        "id": tool_call_id,
                        "type": "function",
                        "function": { "name": function.name, "arguments": function.arguments },
                    }));
                    i += 1;
                } else {
                    break;
                }
            }
            result.push(json!({ "role": "assistant", "tool_calls": calls }));
            continue;
        }

        let v = match &m.content {
            MessageContent::Text(t) => json!({ "role": role_str(&m.role), "content": t }),
            MessageContent::ToolResult {
                tool_call_id,
                content,
            } => json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content }),
            MessageContent::ToolCall { .. } => unreachable!("handled above"),
        };
        result.push(v);
        i += 1;
    }

    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
