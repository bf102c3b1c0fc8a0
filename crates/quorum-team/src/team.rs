// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use quorum_config::RunConfig;
use quorum_core::{build_prompt, Agent, AgentEvent, PromptConfig, PromptEnv};
use quorum_model::ModelProvider;
use quorum_session::{RunRecord, SessionStore};
use quorum_tools::ToolRegistry;
use quorum_trace::{TraceEventType, TraceLogger};

use crate::delegate::{DelegateAllTool, DelegateTool, DelegationContext};
use crate::member::MemberConfig;

/// Outcome of one team run.
#[derive(Debug, Clone)]
pub struct TeamOutcome {
    pub response: String,
    pub success: bool,
    pub steps: u32,
    pub leader_run_id: String,
}

/// A leader agent plus the member blueprints it can delegate to.
///
/// The leader runs an ordinary agent loop whose tool set contains only the
/// delegation tools; members run nested loops over name-filtered subsets of
/// the team's tool pool.  Every run (the leader's and each member's) is
/// committed to the shared session, members linked by `parent_run_id`.
pub struct Team {
    name: String,
    model: Arc<dyn ModelProvider>,
    tool_pool: Arc<ToolRegistry>,
    members: Vec<MemberConfig>,
    run_config: RunConfig,
    store: Arc<dyn SessionStore>,
    trace: Option<Arc<TraceLogger>>,
    leader_instructions: Vec<String>,
    delegate_to_all: bool,
    max_parallel: usize,
    spawn_max_depth: usize,
}

impl Team {
    pub fn new(
        name: impl Into<String>,
        model: Arc<dyn ModelProvider>,
        tool_pool: Arc<ToolRegistry>,
        members: Vec<MemberConfig>,
        run_config: RunConfig,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            tool_pool,
            members,
            run_config,
            store,
            trace: None,
            leader_instructions: Vec::new(),
            delegate_to_all: false,
            max_parallel: 4,
            spawn_max_depth: 3,
        }
    }

    pub fn with_trace(mut self, trace: Arc<TraceLogger>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_leader_instructions(mut self, instructions: Vec<String>) -> Self {
        self.leader_instructions = instructions;
        self
    }

    /// Also give the leader `delegate_task_to_all_members`.
    pub fn with_delegate_to_all(mut self, enabled: bool) -> Self {
        self.delegate_to_all = enabled;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_spawn_max_depth(mut self, depth: usize) -> Self {
        self.spawn_max_depth = depth;
        self
    }

    /// Run the composite task.  Leader events stream through `tx`.
    pub async fn run(
        &self,
        session_id: &str,
        task: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<TeamOutcome> {
        self.store
            .get_or_create(session_id, None, &self.name)
            .await?;
        let history = self.store.history_context(session_id, 3).await?;

        // The leader's run record exists up front so member records can
        // link to it; it is committed once the leader finishes.
        let leader_record = RunRecord::leader(format!("{}-leader", self.name), task);
        let leader_run_id = leader_record.run_id.clone();

        if let Some(trace) = &self.trace {
            trace.emit(
                &leader_run_id,
                None,
                TraceEventType::WorkflowStart,
                json!({ "team": self.name, "task": task }),
            );
            trace.emit(
                &leader_run_id,
                None,
                TraceEventType::AgentStart,
                json!({ "agent": format!("{}-leader", self.name) }),
            );
        }

        let ctx = Arc::new(DelegationContext {
            team_name: self.name.clone(),
            model: Arc::clone(&self.model),
            tool_pool: Arc::clone(&self.tool_pool),
            members: self.members.clone(),
            run_config: self.run_config,
            store: Arc::clone(&self.store),
            session_id: session_id.to_string(),
            leader_run_id: leader_run_id.clone(),
            trace: self.trace.clone(),
            spawn_depth: Arc::new(AtomicUsize::new(0)),
            spawn_max_depth: self.spawn_max_depth,
            max_parallel: self.max_parallel,
        });

        let mut leader_tools = ToolRegistry::new();
        leader_tools.register(DelegateTool {
            ctx: Arc::clone(&ctx),
        });
        if self.delegate_to_all {
            leader_tools.register(DelegateAllTool {
                ctx: Arc::clone(&ctx),
            });
        }

        let mut leader_agent = Agent::new(
            format!("{}-leader", self.name),
            Arc::clone(&self.model),
            Arc::new(leader_tools),
            self.leader_prompt(history),
            self.run_config,
        );

        debug!(team = %self.name, session_id, "team run starting");
        let outcome = leader_agent.run(task, tx).await?;

        let success = outcome.success();
        self.store
            .append_run(
                session_id,
                leader_record.finish(&outcome.response, success, outcome.steps),
            )
            .await?;

        if let Some(trace) = &self.trace {
            trace.emit(
                &leader_run_id,
                None,
                TraceEventType::AgentEnd,
                json!({ "success": success }),
            );
            trace.emit(
                &leader_run_id,
                None,
                TraceEventType::WorkflowEnd,
                json!({ "team": self.name, "success": success }),
            );
        }

        Ok(TeamOutcome {
            response: outcome.response,
            success,
            steps: outcome.steps,
            leader_run_id,
        })
    }

    fn leader_prompt(&self, history: Option<String>) -> String {
        let roster = self
            .members
            .iter()
            .map(|m| format!("- {}: {}", m.name, m.role))
            .collect::<Vec<_>>()
            .join("\n");

        let mut instructions = vec![
            "Break the task into subtasks and delegate them with \
             delegate_task_to_member(member_name, task)."
                .to_string(),
            "Give members complete, self-contained task descriptions; they do \
             not see the conversation."
                .to_string(),
            "When the composite task is done, reply with the final answer and \
             no further tool calls."
                .to_string(),
        ];
        instructions.extend(self.leader_instructions.iter().cloned());

        let config = PromptConfig {
            name: Some(self.name.clone()),
            role: Some(
                "You lead a team of specialist agents and coordinate their work.".to_string(),
            ),
            instructions,
            custom_sections: vec![("Team Members".to_string(), roster)],
            additional_context: history,
            ..Default::default()
        };
        build_prompt(&config, &[], &[], &PromptEnv::default())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
