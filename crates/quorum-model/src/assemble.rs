// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Reassembly of streamed deltas into a complete model turn.
//!
//! Providers stream tool-call arguments as JSON fragments keyed by a
//! parallel-call index (OpenAI interleaves fragments for different calls;
//! other providers always use index 0).  The [`Accumulator`] buffers all
//! fragments and resolves them to complete [`ToolCallRequest`]s only after
//! the stream ends, so downstream code never sees a half-built call.

use std::collections::HashMap;

use tracing::warn;

use crate::{Completion, ResponseEvent, ToolCallRequest, Usage};

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Resolve the buffered fragments into a complete request.
    ///
    /// Empty arguments become `{}`; providers (notably Anthropic) reject
    /// `null` tool input on the next request.  Arguments that are not valid
    /// JSON after stream end keep `{}` as the parsed value and carry the raw
    /// text so the loop can report `invalid_tool_arguments`.
    fn finish(self) -> ToolCallRequest {
        let (arguments, invalid_json) = if self.args_buf.trim().is_empty() {
            (serde_json::Value::Object(Default::default()), None)
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => (v, None),
                Err(e) => {
                    warn!(
                        tool_name = %self.name,
                        tool_call_id = %self.id,
                        error = %e,
                        "tool call arguments are not valid JSON after stream end"
                    );
                    (
                        serde_json::Value::Object(Default::default()),
                        Some(self.args_buf),
                    )
                }
            }
        };
        ToolCallRequest {
            id: self.id,
            name: self.name,
            arguments,
            invalid_json,
        }
    }
}

/// Streaming-event accumulator producing a [`Completion`].
#[derive(Debug, Default)]
pub struct Accumulator {
    text: String,
    thinking: String,
    pending: HashMap<u32, PendingToolCall>,
    usage: Usage,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event.  Returns `true` when the stream signalled completion.
    pub fn push(&mut self, event: ResponseEvent) -> bool {
        match event {
            ResponseEvent::TextDelta(t) => self.text.push_str(&t),
            ResponseEvent::ThinkingDelta(t) => self.thinking.push_str(&t),
            ResponseEvent::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let ptc = self.pending.entry(index).or_default();
                if !id.is_empty() {
                    ptc.id = id;
                }
                if !name.is_empty() {
                    ptc.name = name;
                }
                ptc.args_buf.push_str(&arguments);
            }
            ResponseEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                self.usage.input_tokens = input_tokens;
                self.usage.output_tokens = output_tokens;
            }
            ResponseEvent::Done => return true,
            ResponseEvent::Error(e) => {
                warn!("model stream error: {e}");
            }
        }
        false
    }

    /// Resolve the accumulated state into a complete turn.
    ///
    /// Tool calls are ordered by their parallel-call index.  Calls with an
    /// empty name cannot be dispatched and are dropped; calls with an empty
    /// id get a synthetic one so the turn can still complete.
    pub fn finish(self) -> Completion {
        let mut sorted: Vec<(u32, PendingToolCall)> = self.pending.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);

        let mut tool_calls = Vec::with_capacity(sorted.len());
        for (i, (_, ptc)) in sorted.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(
                    tool_call_id = %ptc.id,
                    "dropping tool call with empty name from model; cannot dispatch"
                );
                continue;
            }
            let mut tc = ptc.finish();
            if tc.id.is_empty() {
                tc.id = format!("tc_synthetic_{i}");
                warn!(
                    tool_name = %tc.name,
                    tool_call_id = %tc.id,
                    "tool call from model had empty id; generated synthetic id"
                );
            }
            tool_calls.push(tc);
        }

        Completion {
            content: self.text,
            thinking: if self.thinking.is_empty() {
                None
            } else {
                Some(self.thinking)
            },
            tool_calls,
            usage: self.usage,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
