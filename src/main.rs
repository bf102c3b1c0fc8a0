// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::{BufRead, Read, Write};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use quorum_config::Config;
use quorum_core::{build_prompt, Agent, AgentEvent, PromptConfig, PromptEnv, SpawnAgentTool};
use quorum_mcp::{register_mcp_tools, McpConfig};
use quorum_session::{FileSessionStore, RunRecord, SessionStore};
use quorum_skills::SkillCatalog;
use quorum_tools::{
    format_answer_message, EchoTool, FieldType, GetSkillTool, GetUserInputTool, ToolRegistry,
};
use quorum_trace::RunLogger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::from_env();
    if let Some(model) = &cli.model {
        config.model.model = model.clone();
    }
    if let Some(max_steps) = cli.max_steps {
        config.run.max_steps = max_steps;
    }
    if cli.no_stream {
        config.run.streaming = false;
    }

    let task = match &cli.task {
        Some(t) => t.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .lock()
                .read_to_string(&mut buf)
                .context("reading task from stdin")?;
            buf.trim().to_string()
        }
    };
    if task.is_empty() {
        anyhow::bail!("no task given (argument or stdin)");
    }

    let model = quorum_model::from_config(&config.model)?;

    // Skill catalog is optional; absence just means no skills section.
    let catalog = Arc::new(match &config.runtime.skills_dir {
        Some(dir) => SkillCatalog::index(dir),
        None => SkillCatalog::default(),
    });

    // Tool load order: native → MCP → sandbox substitution → spawn.
    let mut registry = ToolRegistry::with_default_timeout(std::time::Duration::from_secs(
        config.runtime.tool_timeout_secs,
    ));
    registry.register(EchoTool);
    registry.register(GetUserInputTool);
    if !catalog.is_empty() {
        registry.register(GetSkillTool::new(Arc::clone(&catalog)));
    }
    if config.runtime.enable_mcp {
        let path = config
            .runtime
            .mcp_config_path
            .clone()
            .context("ENABLE_MCP is set but MCP_CONFIG_PATH is not")?;
        let mcp_config = McpConfig::from_file(&path)?;
        let count = register_mcp_tools(&mut registry, &mcp_config).await?;
        tracing::info!(count, "MCP tools registered");
    }
    if config.runtime.enable_sandbox {
        // The sandbox daemon is an external collaborator wired in by
        // embedders via SandboxManager; the CLI has no backend to offer.
        warn!("ENABLE_SANDBOX is set but the CLI has no sandbox backend; tools run natively");
    }
    let depth = Arc::new(AtomicUsize::new(0));
    let registry = SpawnAgentTool::attach(
        registry,
        Arc::clone(&model),
        config.run,
        depth,
        config.runtime.spawn_max_depth,
    );
    let registry = Arc::new(registry);

    // Session: replay recent history into the prompt, commit the run after.
    let store = FileSessionStore::new(config.session_dir())?;
    let session_id = cli.session.clone().unwrap_or_else(fresh_session_id);
    store.get_or_create(&session_id, None, "quorum").await?;
    let history = store
        .history_context(&session_id, config.runtime.history_runs)
        .await?;

    let prompt_config = PromptConfig {
        name: Some("quorum".into()),
        role: Some(
            "You are a capable general-purpose agent. Use your tools when they help.".into(),
        ),
        markdown: true,
        add_datetime: true,
        add_workspace_info: true,
        timezone: "UTC".into(),
        additional_context: history,
        ..Default::default()
    };
    let system_prompt = build_prompt(
        &prompt_config,
        &registry.prompt_instructions(),
        &catalog.list(),
        &PromptEnv::current(),
    );

    let logger = Arc::new(RunLogger::to_dir(&config.run_log_dir())?);
    let mut agent = Agent::new("quorum", model, registry, system_prompt, config.run)
        .with_logger(Arc::clone(&logger));

    let record = RunRecord::solo("quorum", &task);

    let (tx, rx) = mpsc::channel::<AgentEvent>(1024);
    let printer = tokio::spawn(print_events(rx, config.run.streaming));

    let mut outcome = agent.run(&task, tx).await?;

    // The CLI is the human-input bridge: answer requests interactively.
    while outcome.status == quorum_core::RunStatus::AwaitingInput {
        let pending = outcome.input_request.clone().expect("awaiting input");
        let answer = prompt_for_input(&pending)?;
        let (tx, rx) = mpsc::channel::<AgentEvent>(1024);
        tokio::spawn(print_events(rx, config.run.streaming));
        outcome = agent.resume(&answer, tx).await?;
    }
    let _ = printer.await;

    store
        .append_run(
            &session_id,
            record.finish(&outcome.response, outcome.success(), outcome.steps),
        )
        .await?;

    if !config.run.streaming && !outcome.response.is_empty() {
        println!("{}", outcome.response);
    }
    if let Some(path) = logger.path() {
        tracing::info!(log = %path.display(), session_id = %session_id, "run recorded");
    }

    if outcome.success() {
        Ok(())
    } else {
        anyhow::bail!(
            "run failed: {}",
            outcome.reason.as_deref().unwrap_or(&outcome.response)
        )
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn fresh_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Stream agent events to stdout.  In streaming mode text deltas print as
/// they arrive; tool activity goes to stderr so piped output stays clean.
async fn print_events(mut rx: mpsc::Receiver<AgentEvent>, streaming: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::TextDelta(t) if streaming => {
                print!("{t}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::Completed { .. } if streaming => {
                println!();
            }
            AgentEvent::ToolCallStarted { tool, .. } => {
                eprintln!("[tool] {tool} …");
            }
            AgentEvent::ToolCallFinished {
                tool,
                is_error,
                duration_ms,
                ..
            } => {
                let status = if is_error { "failed" } else { "ok" };
                eprintln!("[tool] {tool} {status} ({duration_ms}ms)");
            }
            AgentEvent::ContextCompacted {
                tokens_before,
                tokens_after,
            } => {
                eprintln!("[context] compacted {tokens_before} → {tokens_after} tokens");
            }
            AgentEvent::Error(e) => {
                eprintln!("[error] {e}");
            }
            _ => {}
        }
    }
}

/// Render an input request, read the answers from stdin, and format them
/// with the same helper the runtime uses so the wire format cannot drift.
fn prompt_for_input(pending: &quorum_core::PendingInput) -> anyhow::Result<String> {
    eprintln!();
    if let Some(context) = &pending.request.context {
        eprintln!("The agent needs more information: {context}");
    } else {
        eprintln!("The agent needs more information.");
    }

    let stdin = std::io::stdin();
    let mut values = serde_json::Map::new();
    for field in &pending.request.fields {
        eprint!("  {} ({}): ", field.name, field.description);
        let mut line = String::new();
        stdin.lock().read_line(&mut line).context("reading answer")?;
        values.insert(field.name.clone(), typed_answer(field.field_type, line.trim()));
    }
    Ok(format_answer_message(&values))
}

/// Parse a raw answer according to the requested field type; anything that
/// does not parse is passed through as a string for the model to judge.
fn typed_answer(field_type: FieldType, raw: &str) -> serde_json::Value {
    match field_type {
        FieldType::Int => raw
            .parse::<i64>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
        FieldType::Float => raw
            .parse::<f64>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
        FieldType::Bool => raw
            .parse::<bool>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
        FieldType::String => serde_json::Value::String(raw.to_string()),
    }
}
