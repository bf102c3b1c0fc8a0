// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
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

/// Native driver for the Anthropic Messages API.
///
/// Anthropic does not speak the OpenAI wire format: the system prompt is a
/// top-level field, tool calls are `tool_use` content blocks on assistant
/// messages, and tool results are `tool_result` blocks on *user* messages.
pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    default_max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let default_max_tokens = max_tokens.unwrap_or_else(|| {
            catalog::lookup("anthropic", &model)
                .map(|e| e.max_output_tokens)
                .unwrap_or(catalog::DEFAULT_MAX_OUTPUT_TOKENS)
        });
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            default_max_tokens,
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let key = self
            .api_key
            .as_deref()
            .context("Anthropic API key not set (LLM_API_KEY or ANTHROPIC_API_KEY)")?;

        let (system_text, messages) = build_anthropic_messages(&req.messages);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let requested = req.max_tokens.unwrap_or(self.default_max_tokens);
        let max_tokens = catalog::cap_max_tokens("anthropic", &self.model, requested);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": self.temperature,
            "stream": true,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(model = %self.model, tool_count = tools.len(), "sending anthropic request");

        let url = format!("{}/v1/messages", self.base_url);
        let resp = with_backoff("anthropic", || async {
            let resp = self
                .client
                .post(&url)
                .header("x-api-key", key)
                .header("anthropic-version", "2023-06-01")
                .json(&body)
                .send()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Status {
                    provider: "anthropic".into(),
                    status: status.as_u16(),
                    body: text,
                });
            }
            Ok(resp)
        })
        .await
        .context("Anthropic completion request failed")?;

        let byte_stream = resp.bytes_stream();
        // SSE lines can split across TCP chunks; carry a remainder buffer.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let mut events: Vec<anyhow::Result<ResponseEvent>> = Vec::new();
                match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim_end_matches('\r').to_string();
                            buf.drain(..=pos);
                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                                    if let Some(ev) = parse_anthropic_event(&v) {
                                        events.push(Ok(ev));
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => events.push(Err(anyhow::anyhow!(e))),
                }
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Map one Anthropic SSE event to a [`ResponseEvent`].
///
/// Returns `None` for bookkeeping events (`message_start`, pings,
/// `content_block_stop`) that carry nothing the runtime needs.
pub(crate) fn parse_anthropic_event(v: &Value) -> Option<ResponseEvent> {
    match v["type"].as_str().unwrap_or("") {
        "content_block_start" => {
            // Tool-use blocks announce id and name here; argument JSON
            // follows as input_json_delta fragments on the same index.
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                Some(ResponseEvent::ToolCall {
                    index: v["index"].as_u64().unwrap_or(0) as u32,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                })
            } else {
                None
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => Some(ResponseEvent::TextDelta(
                    delta["text"].as_str().unwrap_or("").to_string(),
                )),
                "input_json_delta" => Some(ResponseEvent::ToolCall {
                    index,
                    id: String::new(),
                    name: String::new(),
                    arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                }),
                "thinking_delta" => {
                    let t = delta["thinking"].as_str().unwrap_or("");
                    if t.is_empty() {
                        None
                    } else {
                        Some(ResponseEvent::ThinkingDelta(t.to_string()))
                    }
                }
                _ => None,
            }
        }
        "message_delta" => v.get("usage").map(|usage| ResponseEvent::Usage {
            input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
        }),
        "message_stop" => Some(ResponseEvent::Done),
        "error" => Some(ResponseEvent::Error(
            v["error"]["message"].as_str().unwrap_or("unknown").to_string(),
        )),
        _ => None,
    }
}

/// Split the internal message list into (system text, Anthropic messages).
///
/// Consecutive `tool_call` messages coalesce into one assistant message with
/// multiple `tool_use` blocks; tool results become `tool_result` blocks on
/// user messages.  Thinking text is never replayed.
pub(crate) fn build_anthropic_messages(messages: &[crate::Message]) -> (String, Vec<Value>) {
    let mut system_text = String::new();
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    let mut i = 0;

    while i < messages.len() {
        let m = &messages[i];
        match &m.content {
            MessageContent::Text(t) if m.role == Role::System => {
                if !system_text.is_empty() {
                    system_text.push_str("\n\n");
                }
                system_text.push_str(t);
                i += 1;
            }
            MessageContent::Text(t) => {
                let role = if m.role == Role::Assistant {
                    "assistant"
                } else {
                    "user"
                };
                out.push(json!({ "role": role, "content": t }));
                i += 1;
            }
            MessageContent::ToolCall { .. } => {
                let mut blocks: Vec<Value> = Vec::new();
                while i < messages.len() {
                    if let MessageContent::ToolCall {
                        tool_call_id,
                        function,
                    } = &messages[i].content
                    {
                        let input: Value = serde_json::from_str(&function.arguments)
                            .unwrap_or_else(|_| json!({}));
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tool_call_id,
                            "name": function.name,
                            "input": input,
                        }));
                        i += 1;
                    } else {
                        break;
                    }
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            MessageContent::ToolResult {
                tool_call_id,
                content,
            } => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content,
                    }],
                }));
                i += 1;
            }
        }
    }

    (system_text, out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
