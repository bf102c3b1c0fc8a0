// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Tool, ToolCall, ToolOutput};

/// Returns its input unchanged.  Useful for smoke tests, wiring checks, and
/// as a harmless default tool in examples.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo back" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match call.args.get("text").and_then(|v| v.as_str()) {
            Some(text) => ToolOutput::ok(&call.id, text),
            None => ToolOutput::err(&call.id, "missing 'text'"),
        }
    }
}
