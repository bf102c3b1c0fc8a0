// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quorum_skills::SkillCatalog;

use crate::{Tool, ToolCall, ToolOutput};

/// Loads the full body of an indexed skill by name.
///
/// The system prompt lists skill names and one-line descriptions; this tool
/// is how the model pulls in the full content when a skill applies.
pub struct GetSkillTool {
    catalog: Arc<SkillCatalog>,
}

impl GetSkillTool {
    pub fn new(catalog: Arc<SkillCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for GetSkillTool {
    fn name(&self) -> &str {
        "get_skill"
    }

    fn description(&self) -> &str {
        "Load the full content of a skill by name. Skill names and summaries \
         are listed in the system prompt."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Skill name as listed" }
            },
            "required": ["name"]
        })
    }

    fn instructions(&self) -> Option<&str> {
        Some(
            "Load at most one skill per task with get_skill, and only when the \
             task clearly matches the skill's description.",
        )
    }

    fn add_instructions_to_prompt(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(name) = call.args.get("name").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'name'");
        };
        debug!(skill = name, "loading skill");
        match self.catalog.load(name) {
            Ok(body) => ToolOutput::ok(&call.id, body),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}
