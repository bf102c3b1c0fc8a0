// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The leader's delegation tools.
//!
//! `delegate_task_to_member` runs one named member to completion and returns
//! its final text; `delegate_task_to_all_members` fans the same task out to
//! every member with bounded parallelism.  Member failure is never fatal to
//! the leader: the error string comes back as the tool result and the
//! leader decides whether to retry, reroute, or give up.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use quorum_config::RunConfig;
use quorum_core::{build_prompt, Agent, AgentEvent, PromptConfig, PromptEnv, SpawnAgentTool};
use quorum_model::ModelProvider;
use quorum_session::{RunRecord, SessionStore};
use quorum_tools::{Tool, ToolCall, ToolOutput, ToolRegistry};
use quorum_trace::{TraceEventType, TraceLogger};

use crate::member::MemberConfig;

/// Everything a delegation needs to run members; shared by both tools.
pub(crate) struct DelegationContext {
    pub team_name: String,
    pub model: Arc<dyn ModelProvider>,
    /// The pool members draw their tool subsets from.
    pub tool_pool: Arc<ToolRegistry>,
    pub members: Vec<MemberConfig>,
    pub run_config: RunConfig,
    pub store: Arc<dyn SessionStore>,
    pub session_id: String,
    pub leader_run_id: String,
    pub trace: Option<Arc<TraceLogger>>,
    /// Shared spawn-depth budget for the whole delegation tree.
    pub spawn_depth: Arc<AtomicUsize>,
    pub spawn_max_depth: usize,
    pub max_parallel: usize,
}

impl DelegationContext {
    fn member(&self, name: &str) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.name == name)
    }

    fn trace_event(&self, event_type: TraceEventType, run_id: &str, payload: Value) {
        if let Some(trace) = &self.trace {
            trace.emit(run_id, Some(&self.leader_run_id), event_type, payload);
        }
    }

    /// Run one member to completion and commit its run record.
    pub(crate) async fn run_member(&self, member: &MemberConfig, task: &str) -> ToolOutput {
        // ToolOutput's call id is filled in by the caller; use a neutral
        // placeholder here.
        let call_id = "";
        self.trace_event(
            TraceEventType::Delegation,
            &self.leader_run_id,
            json!({ "member": member.name, "task": task }),
        );

        let mut record = RunRecord::member(&member.name, task, &self.leader_run_id);
        let run_id = record.run_id.clone();
        self.trace_event(TraceEventType::TaskStart, &run_id, json!({ "member": member.name }));

        let base = self.tool_pool.subset(&member.tool_names);
        let tools = SpawnAgentTool::attach(
            base,
            Arc::clone(&self.model),
            self.member_run_config(member),
            Arc::clone(&self.spawn_depth),
            self.spawn_max_depth,
        );

        let config = PromptConfig {
            name: Some(member.name.clone()),
            role: Some(member.role.clone()),
            instructions: member.instructions.clone(),
            ..Default::default()
        };
        let system_prompt = build_prompt(&config, &tools.prompt_instructions(), &[], &PromptEnv::default());

        let mut agent = Agent::new(
            member.name.clone(),
            Arc::clone(&self.model),
            Arc::new(tools),
            system_prompt,
            self.member_run_config(member),
        );

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let result = agent.run(task, tx).await;
        while rx.try_recv().is_ok() {}

        let output = match result {
            Ok(outcome) => {
                record = record.finish(&outcome.response, outcome.success(), outcome.steps);
                if outcome.success() {
                    ToolOutput::ok(call_id, outcome.response)
                } else {
                    let reason = outcome
                        .reason
                        .unwrap_or_else(|| "member run failed".to_string());
                    ToolOutput::err(call_id, format!("member {} failed: {reason}", member.name))
                }
            }
            Err(e) => {
                let msg = format!("member {} failed: {e}", member.name);
                record = record.finish(&msg, false, 0);
                ToolOutput::err(call_id, msg)
            }
        };

        self.trace_event(
            TraceEventType::TaskEnd,
            &run_id,
            json!({ "member": member.name, "success": output.success() }),
        );
        if let Err(e) = self.store.append_run(&self.session_id, record).await {
            warn!(session_id = %self.session_id, error = %e, "failed to persist member run");
        }
        output
    }

    fn member_run_config(&self, member: &MemberConfig) -> RunConfig {
        let mut config = self.run_config;
        if member.max_steps > 0 {
            config.max_steps = member.max_steps;
        }
        config
    }
}

/// `delegate_task_to_member(member_name, task)`, registered for the leader only.
pub(crate) struct DelegateTool {
    pub ctx: Arc<DelegationContext>,
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate_task_to_member"
    }

    fn description(&self) -> &str {
        "Delegate a subtask to one team member by name and receive their \
         final answer. Members work independently; give each one a complete, \
         self-contained task description."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "member_name": {
                    "type": "string",
                    "description": "Name of the member to delegate to"
                },
                "task": {
                    "type": "string",
                    "description": "The complete subtask description"
                }
            },
            "required": ["member_name", "task"]
        })
    }

    /// Member runs are bounded by their own step ceilings, not the tool
    /// timeout.
    fn timeout(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(600))
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(member_name) = call.args.get("member_name").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'member_name'");
        };
        let Some(task) = call.args.get("task").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'task'");
        };
        let Some(member) = self.ctx.member(member_name) else {
            let known: Vec<&str> = self.ctx.members.iter().map(|m| m.name.as_str()).collect();
            return ToolOutput::err(
                &call.id,
                format!("unknown member {member_name:?}; team members: {known:?}"),
            );
        };

        debug!(team = %self.ctx.team_name, member = member_name, "delegating task");
        let mut output = self.ctx.run_member(member, task).await;
        output.call_id = call.id.clone();
        output
    }
}

/// `delegate_task_to_all_members(task)`: bounded-parallel fan-out.
pub(crate) struct DelegateAllTool {
    pub ctx: Arc<DelegationContext>,
}

#[async_trait]
impl Tool for DelegateAllTool {
    fn name(&self) -> &str {
        "delegate_task_to_all_members"
    }

    fn description(&self) -> &str {
        "Send the same task to every team member in parallel and receive \
         their answers, labelled by member name."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task every member receives"
                }
            },
            "required": ["task"]
        })
    }

    fn timeout(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(600))
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(task) = call.args.get("task").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'task'");
        };

        let semaphore = Arc::new(Semaphore::new(self.ctx.max_parallel.max(1)));
        let mut handles = Vec::with_capacity(self.ctx.members.len());
        for (idx, member) in self.ctx.members.iter().cloned().enumerate() {
            let ctx = Arc::clone(&self.ctx);
            let semaphore = Arc::clone(&semaphore);
            let task = task.to_string();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let output = ctx.run_member(&member, &task).await;
                (idx, member.name, output)
            }));
        }

        let mut sections: Vec<(usize, String)> = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((idx, name, output)) => {
                    sections.push((idx, format!("### {name}\n{}", output.content)));
                }
                Err(e) => {
                    warn!(error = %e, "member task panicked during fan-out");
                    sections.push((usize::MAX, format!("### (unknown member)\npanic: {e}")));
                }
            }
        }
        sections.sort_by_key(|(idx, _)| *idx);

        let combined = sections
            .into_iter()
            .map(|(_, s)| s)
            .collect::<Vec<_>>()
            .join("\n\n");
        ToolOutput::ok(&call.id, combined)
    }
}
