// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

use quorum_tools::InputRequest;

/// Events emitted by the agent loop, in strict program order.
/// Consumers (CLI, coordinators, the trace layer) subscribe via `mpsc`.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A step is starting; token accounting is post-compaction.
    Step {
        n: u32,
        token_count: usize,
        token_limit: usize,
    },
    /// A text chunk streamed from the model
    TextDelta(String),
    /// A thinking/reasoning chunk streamed from the model
    ThinkingDelta(String),
    /// The model's complete text for one turn
    TextComplete(String),
    /// The model's complete reasoning block for one turn
    ThinkingComplete(String),
    /// The model requested a tool call
    ToolCallStarted {
        call_id: String,
        tool: String,
        args: Value,
    },
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool: String,
        output: String,
        is_error: bool,
        duration_ms: u64,
    },
    /// Context was compacted; statistics for observers
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
    },
    /// The run suspended awaiting out-of-band user input
    InputRequired {
        tool_call_id: String,
        request: InputRequest,
    },
    /// The run reached a terminal state
    Completed {
        response: String,
        steps: u32,
        success: bool,
    },
    /// A non-recoverable error ended the run
    Error(String),
}
