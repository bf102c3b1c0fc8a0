// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Agent-loop scenarios driven entirely by scripted mock providers.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::mpsc;

use quorum_config::RunConfig;
use quorum_model::{
    FailingMockProvider, Message, MessageContent, ModelProvider, ResponseEvent, Role,
    ScriptedMockProvider,
};
use quorum_tools::{EchoTool, GetUserInputTool, ToolRegistry};

use crate::agent::{Agent, RunStatus};
use crate::events::AgentEvent;
use crate::spawn::SpawnAgentTool;

fn run_config() -> RunConfig {
    RunConfig {
        max_steps: 10,
        token_limit: 100_000,
        streaming: true,
        enable_summarization: true,
    }
}

fn agent_with(model: Arc<dyn ModelProvider>, tools: ToolRegistry) -> Agent {
    Agent::new(
        "test-agent",
        model,
        Arc::new(tools),
        "You are a test agent.",
        run_config(),
    )
}

fn drain(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

/// Check the call/result bijection: every `tool_call` message is answered by
/// exactly one `tool_result` with the same id before the next assistant
/// text turn.
fn assert_tool_call_bijection(messages: &[Message]) {
    let mut open: Vec<&str> = Vec::new();
    for m in messages {
        match &m.content {
            MessageContent::ToolCall { tool_call_id, .. } => open.push(tool_call_id),
            MessageContent::ToolResult { tool_call_id, .. } => {
                let pos = open
                    .iter()
                    .position(|id| id == tool_call_id)
                    .unwrap_or_else(|| panic!("unmatched tool_result {tool_call_id}"));
                open.remove(pos);
            }
            MessageContent::Text(_) if m.role == Role::Assistant => {
                assert!(
                    open.is_empty(),
                    "assistant turn with unanswered tool calls: {open:?}"
                );
            }
            _ => {}
        }
    }
    assert!(open.is_empty(), "unanswered tool calls at end: {open:?}");
}

// ── S1: single-step answer, no tools ─────────────────────────────────────────

#[tokio::test]
async fn single_step_answer_without_tools() {
    let model = Arc::new(ScriptedMockProvider::always_text("4"));
    let mut agent = agent_with(model, ToolRegistry::new());
    let (tx, mut rx) = mpsc::channel(256);

    let outcome = agent.run("What is 2+2?", tx).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.response, "4");
    assert_eq!(outcome.steps, 1);
    assert!(outcome.success());

    let events = drain(&mut rx);
    let steps = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Step { .. }))
        .count();
    assert_eq!(steps, 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::Completed { success: true, .. })));
    assert_tool_call_bijection(agent.messages());
}

// ── S2: tool round-trip ──────────────────────────────────────────────────────

#[tokio::test]
async fn tool_round_trip() {
    let model = Arc::new(ScriptedMockProvider::tool_then_text(
        "call-1",
        "echo",
        r#"{"text":"hi"}"#,
        "hi",
    ));
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let mut agent = agent_with(model, tools);
    let (tx, mut rx) = mpsc::channel(256);

    let outcome = agent
        .run("Call echo with 'hi', then reply with its output.", tx)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.response, "hi");
    assert_eq!(outcome.steps, 2);

    let events = drain(&mut rx);
    let mut saw_started = false;
    let mut saw_finished = false;
    for e in &events {
        match e {
            AgentEvent::ToolCallStarted { call_id, tool, .. } => {
                assert_eq!(call_id, "call-1");
                assert_eq!(tool, "echo");
                saw_started = true;
            }
            AgentEvent::ToolCallFinished {
                output,
                is_error,
                duration_ms,
                ..
            } => {
                assert_eq!(output, "hi");
                assert!(!is_error);
                assert!(*duration_ms > 0, "tool_execution duration must be positive");
                saw_finished = true;
            }
            _ => {}
        }
    }
    assert!(saw_started && saw_finished);
    assert_tool_call_bijection(agent.messages());
}

#[tokio::test]
async fn tool_result_precedes_next_model_call() {
    let model = Arc::new(ScriptedMockProvider::tool_then_text(
        "c1",
        "echo",
        r#"{"text":"ping"}"#,
        "pong",
    ));
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let mut agent = agent_with(model.clone(), tools);
    let (tx, _rx) = mpsc::channel(256);
    agent.run("go", tx).await.unwrap();

    // The second request must already contain the tool result.
    let requests = model.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    let second = &requests[1];
    assert!(second.messages.iter().any(|m| matches!(
        &m.content,
        MessageContent::ToolResult { tool_call_id, content } if tool_call_id == "c1" && content == "ping"
    )));
}

// ── Tool failure is never fatal ──────────────────────────────────────────────

#[tokio::test]
async fn unknown_tool_failure_lets_model_recover() {
    let model = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_script("c1", "no_such_tool", "{}"),
        ScriptedMockProvider::text_script("recovered"),
    ]));
    let mut agent = agent_with(model, ToolRegistry::new());
    let (tx, mut rx) = mpsc::channel(256);

    let outcome = agent.run("try", tx).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.response, "recovered");
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolCallFinished { is_error: true, .. }
    )));
    assert_tool_call_bijection(agent.messages());
}

#[tokio::test]
async fn malformed_tool_arguments_are_reported_not_fatal() {
    let model = Arc::new(ScriptedMockProvider::new(vec![
        vec![
            ResponseEvent::ToolCall {
                index: 0,
                id: "c1".into(),
                name: "echo".into(),
                arguments: r#"{"broken"#.into(),
            },
            ResponseEvent::Done,
        ],
        ScriptedMockProvider::text_script("self-corrected"),
    ]));
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let mut agent = agent_with(model, tools);
    let (tx, mut rx) = mpsc::channel(256);

    let outcome = agent.run("go", tx).await.unwrap();
    assert_eq!(outcome.response, "self-corrected");

    let events = drain(&mut rx);
    let invalid = events.iter().find_map(|e| match e {
        AgentEvent::ToolCallFinished {
            output, is_error, ..
        } if *is_error => Some(output.clone()),
        _ => None,
    });
    assert!(invalid.unwrap().contains("invalid_tool_arguments"));
    assert_tool_call_bijection(agent.messages());
}

// ── S4: human-input suspension ───────────────────────────────────────────────

#[tokio::test]
async fn human_input_suspends_and_resumes() {
    let model = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_script(
            "c1",
            "get_user_input",
            r#"{"fields":[{"name":"city","type":"string","description":"Which city?"}]}"#,
        ),
        ScriptedMockProvider::text_script("Sunny in Paris."),
    ]));
    let mut tools = ToolRegistry::new();
    tools.register(GetUserInputTool);
    let mut agent = agent_with(model, tools);

    let (tx, mut rx) = mpsc::channel(256);
    let outcome = agent.run("What's the weather?", tx).await.unwrap();

    assert_eq!(outcome.status, RunStatus::AwaitingInput);
    let pending = outcome.input_request.expect("input request");
    assert_eq!(pending.tool_call_id, "c1");
    assert_eq!(pending.request.fields[0].name, "city");
    let steps_at_suspend = outcome.steps;

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::InputRequired { tool_call_id, .. } if tool_call_id == "c1"
    )));

    // Resume with the user's answer.
    let (tx2, _rx2) = mpsc::channel(256);
    let final_outcome = agent.resume("[user_input] city: Paris", tx2).await.unwrap();

    assert_eq!(final_outcome.status, RunStatus::Completed);
    assert_eq!(final_outcome.response, "Sunny in Paris.");
    // Suspension itself consumed no steps: one before, one after.
    assert_eq!(final_outcome.steps, steps_at_suspend + 1);
    assert_tool_call_bijection(agent.messages());
}

#[tokio::test]
async fn run_refuses_while_suspended() {
    let model = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_script(
            "c1",
            "get_user_input",
            r#"{"fields":[{"name":"x","type":"string","description":"?"}]}"#,
        ),
    ]));
    let mut tools = ToolRegistry::new();
    tools.register(GetUserInputTool);
    let mut agent = agent_with(model, tools);
    let (tx, _rx) = mpsc::channel(256);
    agent.run("ask me", tx).await.unwrap();

    let (tx2, _rx2) = mpsc::channel(256);
    assert!(agent.run("another task", tx2).await.is_err());
}

#[tokio::test]
async fn resume_without_suspension_is_an_error() {
    let model = Arc::new(ScriptedMockProvider::always_text("hi"));
    let mut agent = agent_with(model, ToolRegistry::new());
    let (tx, _rx) = mpsc::channel(256);
    assert!(agent.resume("answer", tx).await.is_err());
}

// ── Step ceiling ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn max_steps_terminates_with_success() {
    // The model asks for the same tool forever.
    let scripts: Vec<_> = (0..20)
        .map(|i| {
            ScriptedMockProvider::tool_call_script(
                format!("c{i}"),
                "echo",
                r#"{"text":"again"}"#,
            )
        })
        .collect();
    let model = Arc::new(ScriptedMockProvider::new(scripts));
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let mut agent = Agent::new(
        "looper",
        model,
        Arc::new(tools),
        "loop forever",
        RunConfig {
            max_steps: 3,
            ..run_config()
        },
    );
    let (tx, mut rx) = mpsc::channel(1024);

    let outcome = agent.run("never stop", tx).await.unwrap();

    assert_eq!(outcome.status, RunStatus::MaxSteps);
    assert_eq!(outcome.reason.as_deref(), Some("max_steps_reached"));
    assert!(outcome.success(), "step-limit termination is not an error");
    assert_eq!(outcome.steps, 3);

    let events = drain(&mut rx);
    let steps = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Step { .. }))
        .count();
    assert!(steps <= 3);
    assert_tool_call_bijection(agent.messages());
}

// ── Provider failure ─────────────────────────────────────────────────────────

#[tokio::test]
async fn provider_failure_is_a_terminal_error() {
    let model = Arc::new(FailingMockProvider {
        message: "upstream exploded".into(),
    });
    let mut agent = agent_with(model, ToolRegistry::new());
    let (tx, mut rx) = mpsc::channel(256);

    let outcome = agent.run("hello", tx).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Error);
    assert!(!outcome.success());
    assert!(outcome.response.contains("upstream exploded"));
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, AgentEvent::Error(_))));
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn pre_cancelled_run_terminates_with_reason() {
    let model = Arc::new(ScriptedMockProvider::always_text("never seen"));
    let mut agent = agent_with(model, ToolRegistry::new());
    let (tx, _rx) = mpsc::channel(256);
    let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
    cancel_tx.send(()).unwrap();

    let outcome = agent.run_with_cancel("task", tx, cancel_rx).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.reason.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn dropped_cancel_sender_counts_as_cancellation() {
    let model = Arc::new(ScriptedMockProvider::always_text("never seen"));
    let mut agent = agent_with(model, ToolRegistry::new());
    let (tx, _rx) = mpsc::channel(256);
    let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();
    drop(cancel_tx);

    let outcome = agent.run_with_cancel("task", tx, cancel_rx).await.unwrap();
    assert_eq!(outcome.reason.as_deref(), Some("cancelled"));
}

// ── Compaction inside the loop ───────────────────────────────────────────────

#[tokio::test]
async fn over_budget_history_is_compacted_before_the_model_call() {
    let model = Arc::new(ScriptedMockProvider::new(vec![
        // One summary call per closed segment, then the real answer.
        ScriptedMockProvider::text_script("s1"),
        ScriptedMockProvider::text_script("s2"),
        ScriptedMockProvider::text_script("s3"),
        ScriptedMockProvider::text_script("final answer"),
    ]));
    let mut agent = Agent::new(
        "compacting",
        model,
        Arc::new(ToolRegistry::new()),
        "sys",
        RunConfig {
            token_limit: 260,
            ..run_config()
        },
    );
    agent.seed_history(vec![
        Message::user("old question one"),
        Message::assistant(format!("long answer {}", "x".repeat(300))),
        Message::user("old question two"),
        Message::assistant(format!("long answer {}", "y".repeat(300))),
        Message::user("recent question"),
        Message::assistant("recent answer"),
    ]);
    let (tx, mut rx) = mpsc::channel(256);

    let outcome = agent.run("new task", tx).await.unwrap();
    assert_eq!(outcome.response, "final answer");

    let events = drain(&mut rx);
    let compacted = events.iter().find_map(|e| match e {
        AgentEvent::ContextCompacted {
            tokens_before,
            tokens_after,
        } => Some((*tokens_before, *tokens_after)),
        _ => None,
    });
    let (before, after) = compacted.expect("compaction event");
    assert!(after <= 260, "post-compaction count within budget");
    assert!(before > after);

    // The step event reports the post-compaction count.
    let step_count = events.iter().find_map(|e| match e {
        AgentEvent::Step { token_count, .. } => Some(*token_count),
        _ => None,
    });
    assert!(step_count.unwrap() <= 260);
}

#[tokio::test]
async fn overflow_without_summarization_fails_the_run() {
    let model = Arc::new(ScriptedMockProvider::always_text("unused"));
    let mut agent = Agent::new(
        "strict",
        model,
        Arc::new(ToolRegistry::new()),
        "sys",
        RunConfig {
            token_limit: 50,
            enable_summarization: false,
            ..run_config()
        },
    );
    agent.seed_history(vec![
        Message::user("x".repeat(500)),
        Message::assistant("y".repeat(500)),
    ]);
    let (tx, _rx) = mpsc::channel(256);

    let outcome = agent.run("task", tx).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.reason.as_deref(), Some("context_overflow"));
}

// ── spawn_agent ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn spawn_agent_runs_nested_loop_to_completion() {
    // Parent calls spawn_agent; the nested agent answers in one turn; the
    // parent folds that answer into its final reply.
    let model = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_script(
            "c1",
            "spawn_agent",
            r#"{"task":"compute the thing"}"#,
        ),
        ScriptedMockProvider::text_script("nested says hello"),
        ScriptedMockProvider::text_script("done: nested says hello"),
    ]));

    let depth = Arc::new(AtomicUsize::new(0));
    let mut base = ToolRegistry::new();
    base.register(EchoTool);
    let tools = SpawnAgentTool::attach(
        base,
        model.clone(),
        run_config(),
        Arc::clone(&depth),
        3,
    );
    let mut agent = agent_with(model, tools);
    let (tx, _rx) = mpsc::channel(1024);

    let outcome = agent.run("delegate it", tx).await.unwrap();
    assert_eq!(outcome.response, "done: nested says hello");
    assert_eq!(depth.load(std::sync::atomic::Ordering::SeqCst), 0, "depth restored");
    assert_tool_call_bijection(agent.messages());
}

#[tokio::test]
async fn spawn_depth_limit_fails_the_tool_not_the_run() {
    let model = Arc::new(ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_call_script("c1", "spawn_agent", r#"{"task":"go deeper"}"#),
        ScriptedMockProvider::text_script("stopped at the limit"),
    ]));

    // Depth already at the configured maximum.
    let depth = Arc::new(AtomicUsize::new(3));
    let tools = SpawnAgentTool::attach(
        ToolRegistry::new(),
        model.clone(),
        run_config(),
        Arc::clone(&depth),
        3,
    );
    let mut agent = agent_with(model, tools);
    let (tx, mut rx) = mpsc::channel(1024);

    let outcome = agent.run("try", tx).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.response, "stopped at the limit");

    let events = drain(&mut rx);
    let failed = events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolCallFinished { is_error: true, output, .. } if output.contains("spawn depth limit")
    ));
    assert!(failed, "spawn failure surfaces as a failed tool result");
}

#[tokio::test]
async fn spawned_agent_tool_subset_is_honoured() {
    let model = Arc::new(ScriptedMockProvider::new(vec![
        // Parent: spawn with only echo.
        ScriptedMockProvider::tool_call_script(
            "c1",
            "spawn_agent",
            r#"{"task":"use your tools","tools":["echo"]}"#,
        ),
        // Nested agent: tries a tool it was not granted.
        ScriptedMockProvider::tool_call_script("c2", "get_user_input", r#"{"fields":[]}"#),
        // Nested agent recovers and finishes.
        ScriptedMockProvider::text_script("nested done"),
        // Parent finishes.
        ScriptedMockProvider::text_script("parent done"),
    ]));

    let depth = Arc::new(AtomicUsize::new(0));
    let mut base = ToolRegistry::new();
    base.register(EchoTool);
    base.register(GetUserInputTool);
    let tools = SpawnAgentTool::attach(base, model.clone(), run_config(), depth, 3);
    let mut agent = agent_with(model.clone(), tools);
    let (tx, _rx) = mpsc::channel(1024);

    let outcome = agent.run("go", tx).await.unwrap();
    assert_eq!(outcome.response, "parent done");

    // The nested agent's second request advertised only echo + spawn_agent.
    let requests = model.requests.lock().unwrap();
    let nested_first = &requests[1];
    let names: Vec<&str> = nested_first.tools.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"echo"));
    assert!(!names.contains(&"get_user_input"));
}
