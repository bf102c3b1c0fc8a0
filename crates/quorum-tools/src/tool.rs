// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Where a tool was loaded from.  Determines registration order and lets the
/// registry report meaningful shadowing warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolSource {
    /// Built into the binary.
    #[default]
    Native,
    /// Discovered from a remote MCP server.
    Mcp,
    /// Session-scoped sandboxed replacement for a native tool.
    Sandbox,
    /// The `spawn_agent` tool.
    Spawn,
}

impl std::fmt::Display for ToolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Native => "native",
            Self::Mcp => "mcp",
            Self::Sandbox => "sandbox",
            Self::Spawn => "spawn",
        };
        write!(f, "{s}")
    }
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// The result of executing a tool.
///
/// Tool failure is a value, not an exception: `content` always carries the
/// text the model will see (the error message, for failures), and `error`
/// carries the failure reason when `is_error` is set.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
    pub error: Option<String>,
}

impl ToolOutput {
    /// Successful result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
            error: None,
        }
    }

    /// Failed result; `msg` doubles as the content the model sees.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let text = msg.into();
        Self {
            call_id: call_id.into(),
            content: text.clone(),
            is_error: true,
            error: Some(text),
        }
    }

    pub fn success(&self) -> bool {
        !self.is_error
    }
}

/// Capability trait every tool implements, regardless of source.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the argument object.
    fn parameters_schema(&self) -> Value;
    fn source(&self) -> ToolSource {
        ToolSource::Native
    }
    /// Usage guidance for the system prompt; only injected when
    /// [`add_instructions_to_prompt`](Tool::add_instructions_to_prompt) is set.
    fn instructions(&self) -> Option<&str> {
        None
    }
    fn add_instructions_to_prompt(&self) -> bool {
        false
    }
    /// Per-tool execution timeout override; `None` uses the registry default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
    /// Execute the tool.  Failures are wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
