// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use quorum_config::RunConfig;
use quorum_model::{
    assemble::Accumulator, tokens, Completion, CompletionRequest, Message, ModelProvider,
    ResponseEvent, ToolCallRequest,
};
use quorum_tools::{parse_input_request, InputRequest, ToolCall, ToolRegistry};
use quorum_trace::RunLogger;

use crate::compact::{CompactionError, Compactor};
use crate::events::AgentEvent;

/// Terminal (or suspended) state of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// The model finished with a plain answer.
    Completed,
    /// The step ceiling was reached; not an error.
    MaxSteps,
    /// The run is suspended awaiting user input; resume with
    /// [`Agent::resume`].
    AwaitingInput,
    /// An unrecoverable failure (provider exhausted retries, context
    /// overflow, cancellation).
    Error,
}

/// A pending `get_user_input` suspension.
#[derive(Debug, Clone)]
pub struct PendingInput {
    pub tool_call_id: String,
    pub request: InputRequest,
}

/// The outcome of [`Agent::run`] / [`Agent::resume`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub response: String,
    pub steps: u32,
    /// Machine-readable termination reason for non-plain completions:
    /// `max_steps_reached`, `context_overflow`, `cancelled`.
    pub reason: Option<String>,
    /// Present exactly when `status` is [`RunStatus::AwaitingInput`].
    pub input_request: Option<PendingInput>,
}

impl RunOutcome {
    /// Step-limit termination counts as success; errors do not.
    pub fn success(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::MaxSteps)
    }
}

/// The core agent: a bounded step machine over model calls and tool
/// dispatch.
///
/// Each step is one `budget gate → model turn → tool dispatch` cycle.  The
/// loop owns its message list for the life of the run; suspension for user
/// input preserves it so [`resume`](Agent::resume) continues seamlessly.
pub struct Agent {
    name: String,
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    config: RunConfig,
    system_prompt: String,
    messages: Vec<Message>,
    steps_taken: u32,
    pending_input: Option<PendingInput>,
    logger: Arc<RunLogger>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
        config: RunConfig,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            tools,
            config,
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            steps_taken: 0,
            pending_input: None,
            logger: Arc::new(RunLogger::disabled()),
        }
    }

    /// Attach a run logger; every step, request, response, and tool
    /// execution is recorded through it.
    pub fn with_logger(mut self, logger: Arc<RunLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn steps_taken(&self) -> u32 {
        self.steps_taken
    }

    /// Pre-load history (e.g. replayed session turns) before the first run.
    /// System messages are stripped; the agent injects its own.
    pub fn seed_history(&mut self, messages: Vec<Message>) {
        self.ensure_system_message();
        self.messages
            .extend(messages.into_iter().filter(|m| m.role != quorum_model::Role::System));
    }

    fn ensure_system_message(&mut self) {
        if self.messages.is_empty() && !self.system_prompt.is_empty() {
            self.messages.push(Message::system(self.system_prompt.clone()));
        }
    }

    /// Run the loop on a fresh user task.  Events stream through `tx`; the
    /// caller drops the receiver when it is not interested.
    pub async fn run(
        &mut self,
        task: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<RunOutcome> {
        if self.pending_input.is_some() {
            anyhow::bail!("run is suspended awaiting user input; call resume()");
        }
        self.ensure_system_message();
        self.messages.push(Message::user(task));
        self.run_loop(tx, None).await
    }

    /// Like [`run`](Agent::run) with a cancellation channel.  Dropping the
    /// sender (or sending `()`) cancels at the next suspension point and
    /// terminates the run with reason `cancelled`.
    pub async fn run_with_cancel(
        &mut self,
        task: &str,
        tx: mpsc::Sender<AgentEvent>,
        cancel: tokio::sync::oneshot::Receiver<()>,
    ) -> anyhow::Result<RunOutcome> {
        if self.pending_input.is_some() {
            anyhow::bail!("run is suspended awaiting user input; call resume()");
        }
        self.ensure_system_message();
        self.messages.push(Message::user(task));
        self.run_loop(tx, Some(cancel)).await
    }

    /// Resume a suspended run with the user's answer.
    ///
    /// The originating `get_user_input` call is answered by a synthetic tool
    /// message carrying `answer`, and `answer` is also appended as a fresh
    /// user turn, so the model sees both the closed tool round and the new
    /// input.  Suspension consumed no steps.
    pub async fn resume(
        &mut self,
        answer: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<RunOutcome> {
        let pending = self
            .pending_input
            .take()
            .context("resume() called but the run is not awaiting input")?;
        self.messages
            .push(Message::tool_result(pending.tool_call_id, answer));
        self.messages.push(Message::user(answer));
        self.run_loop(tx, None).await
    }

    // ─── The step machine ─────────────────────────────────────────────────────

    async fn run_loop(
        &mut self,
        tx: mpsc::Sender<AgentEvent>,
        mut cancel: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> anyhow::Result<RunOutcome> {
        loop {
            // Cancellation gate between steps.  A dropped sender counts as
            // a cancellation signal, same as an explicit send.
            if let Some(rx) = cancel.as_mut() {
                match rx.try_recv() {
                    Err(tokio::sync::oneshot::error::TryRecvError::Empty) => {}
                    _ => return Ok(self.finish_error("cancelled", &tx).await),
                }
            }

            // Hard step ceiling, enforced before the model call.
            if self.steps_taken >= self.config.max_steps {
                let response = self.last_assistant_text();
                let outcome = RunOutcome {
                    status: RunStatus::MaxSteps,
                    response: response.clone(),
                    steps: self.steps_taken,
                    reason: Some("max_steps_reached".into()),
                    input_request: None,
                };
                self.logger
                    .completion("max_steps_reached", self.steps_taken, &response);
                let _ = tx
                    .send(AgentEvent::Completed {
                        response,
                        steps: self.steps_taken,
                        success: true,
                    })
                    .await;
                return Ok(outcome);
            }

            // Budget gate: compact (or fail) before the model sees the list.
            let mut token_count = tokens::count(&self.messages);
            if token_count > self.config.token_limit {
                if !self.config.enable_summarization {
                    return Ok(self.finish_error("context_overflow", &tx).await);
                }
                let compactor = Compactor::new(Arc::clone(&self.model));
                match compactor
                    .maybe_compact(std::mem::take(&mut self.messages), self.config.token_limit)
                    .await
                {
                    Ok(compacted) => {
                        let after = tokens::count(&compacted);
                        let _ = tx
                            .send(AgentEvent::ContextCompacted {
                                tokens_before: token_count,
                                tokens_after: after,
                            })
                            .await;
                        self.messages = compacted;
                        token_count = after;
                    }
                    Err(CompactionError::Overflow { .. }) => {
                        return Ok(self.finish_error("context_overflow", &tx).await);
                    }
                }
            }

            self.steps_taken += 1;
            let step = self.steps_taken;
            self.logger
                .step(step, token_count, self.config.token_limit);
            let _ = tx
                .send(AgentEvent::Step {
                    n: step,
                    token_count,
                    token_limit: self.config.token_limit,
                })
                .await;

            // Model turn, cancellable at the network suspension point.
            let completion = {
                let turn = self.model_turn(&tx);
                tokio::pin!(turn);
                match cancel.as_mut() {
                    Some(rx) => tokio::select! {
                        biased;
                        _ = rx => None,
                        result = &mut turn => Some(result),
                    },
                    None => Some(turn.await),
                }
            };
            let completion = match completion {
                None => return Ok(self.finish_error("cancelled", &tx).await),
                Some(Err(e)) => {
                    let msg = format!("{e:#}");
                    warn!(agent = %self.name, error = %msg, "model turn failed");
                    self.logger.completion("error", self.steps_taken, &msg);
                    let _ = tx.send(AgentEvent::Error(msg.clone())).await;
                    return Ok(RunOutcome {
                        status: RunStatus::Error,
                        response: msg,
                        steps: self.steps_taken,
                        reason: None,
                        input_request: None,
                    });
                }
                Some(Ok(c)) => c,
            };

            self.logger.response(
                &completion.content,
                &completion
                    .tool_calls
                    .iter()
                    .map(|c| c.name.clone())
                    .collect::<Vec<_>>(),
            );

            if let Some(thinking) = &completion.thinking {
                let _ = tx
                    .send(AgentEvent::ThinkingComplete(thinking.clone()))
                    .await;
            }
            if !completion.content.is_empty() {
                let _ = tx
                    .send(AgentEvent::TextComplete(completion.content.clone()))
                    .await;
            }

            // Decision: no tool calls → the turn's text is the final answer.
            if completion.tool_calls.is_empty() {
                let response = completion.content.clone();
                self.push_assistant(completion);
                self.logger
                    .completion("completed", self.steps_taken, &response);
                let _ = tx
                    .send(AgentEvent::Completed {
                        response: response.clone(),
                        steps: self.steps_taken,
                        success: true,
                    })
                    .await;
                return Ok(RunOutcome {
                    status: RunStatus::Completed,
                    response,
                    steps: self.steps_taken,
                    reason: None,
                    input_request: None,
                });
            }

            // Tool phase: record the calls, then dispatch in order.
            let calls = completion.tool_calls.clone();
            self.push_assistant(completion);

            if let Some(outcome) = self.dispatch_tools(&calls, &tx).await {
                return Ok(outcome);
            }
            // Back to the top: next step.
        }
    }

    /// Dispatch one turn's tool calls in order.  Returns `Some(outcome)`
    /// when the run suspends for user input, `None` to continue stepping.
    async fn dispatch_tools(
        &mut self,
        calls: &[ToolCallRequest],
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Option<RunOutcome> {
        for (idx, request) in calls.iter().enumerate() {
            // Malformed argument JSON never reaches the tool; the model
            // gets a failed result and can self-correct next turn.
            if let Some(raw) = &request.invalid_json {
                let msg = format!("invalid_tool_arguments: {raw}");
                self.logger.tool_execution(&request.id, &request.name, 0, false);
                let _ = tx
                    .send(AgentEvent::ToolCallFinished {
                        call_id: request.id.clone(),
                        tool: request.name.clone(),
                        output: msg.clone(),
                        is_error: true,
                        duration_ms: 0,
                    })
                    .await;
                self.messages.push(Message::tool_result(&request.id, msg));
                continue;
            }

            let call = ToolCall {
                id: request.id.clone(),
                name: request.name.clone(),
                args: request.arguments.clone(),
            };
            let _ = tx
                .send(AgentEvent::ToolCallStarted {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    args: call.args.clone(),
                })
                .await;

            let started = Instant::now();
            let output = self.tools.invoke(&call).await;
            let duration_ms = started.elapsed().as_millis().max(1) as u64;
            self.logger
                .tool_execution(&call.id, &call.name, duration_ms, output.success());

            // A successful get_user_input result suspends the run.  Any
            // calls after it in the same turn are answered synthetically so
            // the call/result bijection survives the suspension.
            if output.success() {
                if let Some(input) = parse_input_request(&output.content) {
                    for later in &calls[idx + 1..] {
                        self.messages.push(Message::tool_result(
                            &later.id,
                            "not executed: run suspended awaiting user input",
                        ));
                    }
                    let pending = PendingInput {
                        tool_call_id: call.id.clone(),
                        request: input.clone(),
                    };
                    self.pending_input = Some(pending.clone());
                    debug!(agent = %self.name, call_id = %call.id, "run suspended for user input");
                    let _ = tx
                        .send(AgentEvent::InputRequired {
                            tool_call_id: call.id,
                            request: input,
                        })
                        .await;
                    return Some(RunOutcome {
                        status: RunStatus::AwaitingInput,
                        response: String::new(),
                        steps: self.steps_taken,
                        reason: None,
                        input_request: Some(pending),
                    });
                }
            }

            let _ = tx
                .send(AgentEvent::ToolCallFinished {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    output: output.content.clone(),
                    is_error: output.is_error,
                    duration_ms,
                })
                .await;
            self.messages
                .push(Message::tool_result(&call.id, output.content));
        }
        None
    }

    /// Call the model once, streaming deltas when configured, and return
    /// the reassembled turn.
    async fn model_turn(&self, tx: &mpsc::Sender<AgentEvent>) -> anyhow::Result<Completion> {
        let tools: Vec<quorum_model::ToolSchema> = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| quorum_model::ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        self.logger
            .request(self.model.model_name(), self.messages.len(), tools.len());

        let req = CompletionRequest {
            messages: self.messages.clone(),
            tools,
            max_tokens: None,
            stream: self.config.streaming,
        };

        if !self.config.streaming {
            return self.model.generate(req).await;
        }

        let mut stream = self.model.stream(req).await?;
        let mut acc = Accumulator::new();
        while let Some(event) = stream.next().await {
            let event = event?;
            match &event {
                ResponseEvent::TextDelta(t) if !t.is_empty() => {
                    let _ = tx.send(AgentEvent::TextDelta(t.clone())).await;
                }
                ResponseEvent::ThinkingDelta(t) if !t.is_empty() => {
                    let _ = tx.send(AgentEvent::ThinkingDelta(t.clone())).await;
                }
                _ => {}
            }
            if acc.push(event) {
                break;
            }
        }
        Ok(acc.finish())
    }

    /// Append the model's turn to the message list: optional text (with
    /// thinking attached), then one `tool_call` message per requested call.
    fn push_assistant(&mut self, completion: Completion) {
        if !completion.content.is_empty() || completion.tool_calls.is_empty() {
            let mut msg = Message::assistant(completion.content);
            msg.thinking = completion.thinking;
            self.messages.push(msg);
        }
        for call in completion.tool_calls {
            self.messages.push(Message::tool_call(
                call.id,
                call.name,
                call.arguments.to_string(),
            ));
        }
    }

    fn last_assistant_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == quorum_model::Role::Assistant)
            .find_map(|m| m.as_text())
            .unwrap_or_default()
            .to_string()
    }

    async fn finish_error(&self, reason: &str, tx: &mpsc::Sender<AgentEvent>) -> RunOutcome {
        self.logger.completion(reason, self.steps_taken, "");
        let _ = tx.send(AgentEvent::Error(reason.to_string())).await;
        RunOutcome {
            status: RunStatus::Error,
            response: String::new(),
            steps: self.steps_taken,
            reason: Some(reason.to_string()),
            input_request: None,
        }
    }
}
