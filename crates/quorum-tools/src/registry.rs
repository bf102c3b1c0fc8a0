// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::{Tool, ToolCall, ToolOutput};

/// A tool schema handed to model providers.  Mirrors the model crate's
/// schema type without depending on it.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Central registry holding every tool reachable by one agent.
///
/// Load order is native → MCP → sandbox substitution → spawn; a later
/// registration under an existing name shadows the earlier one with a
/// warning.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    default_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout: timeout,
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Some(prev) = self.tools.insert(name.clone(), tool) {
            let new = &self.tools[&name];
            warn!(
                tool = %name,
                shadowed_source = %prev.source(),
                winning_source = %new.source(),
                "tool name collision; later registration shadows the earlier one"
            );
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas for all registered tools, sorted by name for deterministic
    /// request bodies.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Usage-guideline strings from tools that opted into prompt injection,
    /// sorted by tool name.
    pub fn prompt_instructions(&self) -> Vec<String> {
        let mut entries: Vec<(String, String)> = self
            .tools
            .values()
            .filter(|t| t.add_instructions_to_prompt())
            .filter_map(|t| t.instructions().map(|i| (t.name().to_string(), i.to_string())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, i)| i).collect()
    }

    /// A registry containing only the named tools (unknown names are
    /// ignored).  Used by `spawn_agent` and team members to narrow the
    /// parent's tool surface.
    pub fn subset(&self, names: &[String]) -> Self {
        let mut out = Self::with_default_timeout(self.default_timeout);
        for name in names {
            if let Some(tool) = self.tools.get(name) {
                out.tools.insert(name.clone(), Arc::clone(tool));
            }
        }
        out
    }

    /// Dispatch one tool call.
    ///
    /// - Unknown names fail without invocation.
    /// - Arguments are validated best-effort against the tool's JSON schema:
    ///   missing required fields fail without invocation, extra fields pass
    ///   through untouched.
    /// - Execution is bounded by the tool's timeout (or the registry
    ///   default); a timeout produces a failed result, never a panic or a
    ///   hung loop.
    pub async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool {}", call.name));
        };

        let missing = missing_required_fields(&tool.parameters_schema(), &call.args);
        if !missing.is_empty() {
            return ToolOutput::err(
                &call.id,
                format!(
                    "missing required argument(s) for {}: {}",
                    call.name,
                    missing.join(", ")
                ),
            );
        }

        let timeout = tool.timeout().unwrap_or(self.default_timeout);
        match tokio::time::timeout(timeout, tool.execute(call)).await {
            Ok(output) => output,
            Err(_) => ToolOutput::err(
                &call.id,
                format!("timeout after {}ms", timeout.as_millis()),
            ),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort JSON-Schema validation: report declared `required` fields
/// that are absent from `args`.  Anything beyond required-field presence is
/// left to the tool itself.
pub fn missing_required_fields(schema: &Value, args: &Value) -> Vec<String> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Vec::new();
    };
    let empty = serde_json::Map::new();
    let args_obj = args.as_object().unwrap_or(&empty);
    required
        .iter()
        .filter_map(|r| r.as_str())
        .filter(|field| !args_obj.contains_key(*field))
        .map(str::to_string)
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolSource;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoNamed {
        name: &'static str,
        source: ToolSource,
    }

    #[async_trait]
    impl Tool for EchoNamed {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        fn source(&self) -> ToolSource {
            self.source
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, call.args["text"].as_str().unwrap_or("").to_string())
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ToolOutput::ok(&call.id, "never happens")
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn invoke_known_tool_succeeds() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoNamed {
            name: "echo",
            source: ToolSource::Native,
        });
        let out = reg.invoke(&call("echo", json!({"text": "hi"}))).await;
        assert!(out.success());
        assert_eq!(out.content, "hi");
    }

    #[tokio::test]
    async fn invoke_unknown_tool_fails_without_panic() {
        let reg = ToolRegistry::new();
        let out = reg.invoke(&call("missing", json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool missing"));
    }

    #[tokio::test]
    async fn missing_required_field_fails_before_invocation() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoNamed {
            name: "echo",
            source: ToolSource::Native,
        });
        let out = reg.invoke(&call("echo", json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("text"));
    }

    #[tokio::test]
    async fn extra_fields_pass_through() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoNamed {
            name: "echo",
            source: ToolSource::Native,
        });
        let out = reg
            .invoke(&call("echo", json!({"text": "hi", "surplus": 1})))
            .await;
        assert!(out.success());
    }

    #[tokio::test]
    async fn per_tool_timeout_produces_failed_result() {
        let mut reg = ToolRegistry::new();
        reg.register(SlowTool);
        let out = reg.invoke(&call("slow", json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("timeout after 20ms"));
    }

    #[test]
    fn shadowing_keeps_later_registration() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoNamed {
            name: "dup",
            source: ToolSource::Native,
        });
        reg.register(EchoNamed {
            name: "dup",
            source: ToolSource::Sandbox,
        });
        assert_eq!(reg.names().len(), 1);
        assert_eq!(reg.get("dup").unwrap().source(), ToolSource::Sandbox);
    }

    #[test]
    fn subset_filters_by_name_and_ignores_unknown() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoNamed {
            name: "a",
            source: ToolSource::Native,
        });
        reg.register(EchoNamed {
            name: "b",
            source: ToolSource::Native,
        });
        let sub = reg.subset(&["a".to_string(), "nope".to_string()]);
        assert_eq!(sub.names(), vec!["a"]);
    }

    #[test]
    fn schemas_are_sorted_by_name() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoNamed {
            name: "zeta",
            source: ToolSource::Native,
        });
        reg.register(EchoNamed {
            name: "alpha",
            source: ToolSource::Native,
        });
        let schemas = reg.schemas();
        assert_eq!(schemas[0].name, "alpha");
        assert_eq!(schemas[1].name, "zeta");
    }

    #[test]
    fn missing_required_fields_reports_each_absent_field() {
        let schema = json!({
            "type": "object",
            "required": ["a", "b", "c"]
        });
        let missing = missing_required_fields(&schema, &json!({"b": 1}));
        assert_eq!(missing, vec!["a", "c"]);
    }

    #[test]
    fn schema_without_required_accepts_anything() {
        let schema = json!({ "type": "object" });
        assert!(missing_required_fields(&schema, &json!(null)).is_empty());
    }
}
