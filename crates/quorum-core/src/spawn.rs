// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The `spawn_agent` tool: run a nested agent to completion and return its
//! final text.
//!
//! Every agent in one delegation tree shares a single depth counter, so the
//! configured bound applies to the whole tree; a spawned agent that spawns
//! again consumes the same budget.  The spawned agent sees a subset of the
//! parent's tools (all of them by default, narrowed by the `tools`
//! argument) plus its own `spawn_agent`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use quorum_config::RunConfig;
use quorum_model::ModelProvider;
use quorum_tools::{Tool, ToolCall, ToolOutput, ToolRegistry, ToolSource};

use crate::agent::{Agent, RunStatus};
use crate::events::AgentEvent;

const SPAWNED_AGENT_PROMPT: &str =
    "You are a focused sub-agent. Complete the delegated task and reply with \
     the result as plain text. Do not ask the user questions.";

/// Tool that spawns a bounded nested agent.
pub struct SpawnAgentTool {
    model: Arc<dyn ModelProvider>,
    /// The parent's tool set *without* `spawn_agent` itself; each spawned
    /// agent gets a fresh spawn tool over its own subset, which avoids a
    /// reference cycle between the registry and the tool.
    base_tools: Arc<ToolRegistry>,
    config: RunConfig,
    depth: Arc<AtomicUsize>,
    max_depth: usize,
}

impl SpawnAgentTool {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        base_tools: Arc<ToolRegistry>,
        config: RunConfig,
        depth: Arc<AtomicUsize>,
        max_depth: usize,
    ) -> Self {
        Self {
            model,
            base_tools,
            config,
            depth,
            max_depth,
        }
    }

    /// Build an agent-facing registry: `base` plus a `spawn_agent` tool that
    /// shares `depth` with every other agent in the tree.
    pub fn attach(
        base: ToolRegistry,
        model: Arc<dyn ModelProvider>,
        config: RunConfig,
        depth: Arc<AtomicUsize>,
        max_depth: usize,
    ) -> ToolRegistry {
        let base = Arc::new(base);
        let names = base.names();
        let mut out = base.subset(&names);
        out.register(Self::new(model, base, config, depth, max_depth));
        out
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused task and return its final \
         text. Optionally restrict it to a subset of your tools by name. \
         Nesting depth is bounded."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the sub-agent"
                },
                "tools": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Tool names the sub-agent may use (default: all of yours)"
                },
                "max_steps": {
                    "type": "integer",
                    "description": "Step ceiling for the sub-agent (default: inherited)"
                }
            },
            "required": ["task"]
        })
    }

    fn source(&self) -> ToolSource {
        ToolSource::Spawn
    }

    /// Nested runs legitimately outlast the ordinary tool budget; the outer
    /// bound is the sub-agent's own step ceiling.
    fn timeout(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(600))
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(task) = call.args.get("task").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'task'");
        };

        let current = self.depth.load(Ordering::SeqCst);
        if current >= self.max_depth {
            return ToolOutput::err(
                &call.id,
                format!("spawn depth limit ({}) reached", self.max_depth),
            );
        }
        self.depth.fetch_add(1, Ordering::SeqCst);
        debug!(depth = current + 1, task, "spawning sub-agent");

        let sub_base = match call.args.get("tools").and_then(|v| v.as_array()) {
            Some(list) => {
                let names: Vec<String> = list
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                self.base_tools.subset(&names)
            }
            None => {
                let names = self.base_tools.names();
                self.base_tools.subset(&names)
            }
        };

        let mut sub_config = self.config;
        if let Some(max_steps) = call.args.get("max_steps").and_then(|v| v.as_u64()) {
            sub_config.max_steps = max_steps as u32;
        }

        let sub_tools = Self::attach(
            sub_base,
            Arc::clone(&self.model),
            sub_config,
            Arc::clone(&self.depth),
            self.max_depth,
        );

        let mut agent = Agent::new(
            "spawned-agent",
            Arc::clone(&self.model),
            Arc::new(sub_tools),
            SPAWNED_AGENT_PROMPT,
            sub_config,
        );

        // The sub-agent's event stream is not surfaced; its final text is
        // the whole contract.
        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let result = agent.run(task, tx).await;
        while rx.try_recv().is_ok() {}

        self.depth.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(outcome) => match outcome.status {
                RunStatus::Completed | RunStatus::MaxSteps => {
                    if outcome.response.is_empty() {
                        ToolOutput::ok(&call.id, "(sub-agent produced no text output)")
                    } else {
                        ToolOutput::ok(&call.id, outcome.response)
                    }
                }
                RunStatus::AwaitingInput => ToolOutput::err(
                    &call.id,
                    "sub-agent requested user input; spawned runs cannot suspend",
                ),
                RunStatus::Error => ToolOutput::err(
                    &call.id,
                    format!(
                        "sub-agent failed: {}",
                        outcome.reason.unwrap_or_else(|| outcome.response)
                    ),
                ),
            },
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}
