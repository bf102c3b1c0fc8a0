// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The `get_user_input` tool and the flagged payload it produces.
//!
//! The tool does not block on any input source.  It validates the model's
//! field descriptors and returns a payload tagged with
//! [`INPUT_REQUEST_KIND`]; the agent loop detects that flag, suspends the
//! run, and yields the request to its caller.  The answer comes back later
//! as a fresh user message, possibly minutes or days later, so nothing in
//! this module waits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{Tool, ToolCall, ToolOutput};

/// Discriminator value marking a tool result as an input request.
pub const INPUT_REQUEST_KIND: &str = "input_request";

/// The type of one requested input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
}

/// One field the user is asked to fill in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub description: String,
}

/// A structured request for out-of-band user input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRequest {
    pub fields: Vec<InputField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct InputRequestPayload {
    kind: String,
    #[serde(flatten)]
    request: InputRequest,
}

/// Parse a tool-result content string back into an [`InputRequest`].
///
/// Returns `None` for anything that is not a flagged input-request payload,
/// so ordinary tool output can never be mistaken for a suspension.
pub fn parse_input_request(content: &str) -> Option<InputRequest> {
    let payload: InputRequestPayload = serde_json::from_str(content).ok()?;
    if payload.kind != INPUT_REQUEST_KIND {
        return None;
    }
    Some(payload.request)
}

/// Render a set of user-provided answers as the follow-up user message.
pub fn format_answer_message(values: &serde_json::Map<String, Value>) -> String {
    let mut lines = vec!["[user_input]".to_string()];
    for (name, value) in values {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        lines.push(format!("{name}: {rendered}"));
    }
    lines.join("\n")
}

/// Tool the model calls when it needs clarification from the user.
pub struct GetUserInputTool;

#[async_trait]
impl Tool for GetUserInputTool {
    fn name(&self) -> &str {
        "get_user_input"
    }

    fn description(&self) -> &str {
        "Ask the user for missing information. Provide one descriptor per field \
         you need (name, type, description) plus optional context explaining why. \
         The run suspends until the user answers; use this only when you cannot \
         proceed without the information."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fields": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "type": { "type": "string", "enum": ["string", "int", "float", "bool"] },
                            "description": { "type": "string" }
                        },
                        "required": ["name", "type", "description"]
                    },
                    "minItems": 1
                },
                "context": {
                    "type": "string",
                    "description": "Why this information is needed"
                }
            },
            "required": ["fields"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(raw_fields) = call.args.get("fields").and_then(|v| v.as_array()) else {
            return ToolOutput::err(&call.id, "missing 'fields' array");
        };
        if raw_fields.is_empty() {
            return ToolOutput::err(&call.id, "'fields' must not be empty");
        }

        let mut fields: Vec<InputField> = Vec::with_capacity(raw_fields.len());
        for (i, raw) in raw_fields.iter().enumerate() {
            match serde_json::from_value::<InputField>(raw.clone()) {
                Ok(f) => fields.push(f),
                Err(e) => {
                    return ToolOutput::err(
                        &call.id,
                        format!("field {} is invalid: {e}", i + 1),
                    )
                }
            }
        }

        let payload = InputRequestPayload {
            kind: INPUT_REQUEST_KIND.to_string(),
            request: InputRequest {
                fields,
                context: call
                    .args
                    .get("context")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            },
        };
        match serde_json::to_string(&payload) {
            Ok(content) => ToolOutput::ok(&call.id, content),
            Err(e) => ToolOutput::err(&call.id, format!("failed to encode request: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
