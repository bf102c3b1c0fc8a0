// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! LLM-driven context compaction.
//!
//! The message list is partitioned into *segments*: each user message opens
//! a segment, and the assistant/tool messages that follow close it.  The
//! leading system messages are preserved verbatim, and the most recent
//! segment is never summarised.  Every older segment is replaced by its
//! opening user message plus a bounded model-written summary; if that is
//! not enough, the summaries are re-summarised together, then dropped
//! oldest-first in (user, summary) pairs.

use std::sync::Arc;

use tracing::warn;

use quorum_model::{tokens, CompletionRequest, Message, ModelProvider, Role};

/// Output budget for one summary call, matching the ≤ ~400-token contract.
const SUMMARY_MAX_TOKENS: u32 = 400;

const SUMMARY_PROMPT: &str =
    "Summarise the following conversation slice for an agent that will continue \
     the work. Preserve: the user's stated goals, every tool call that was made \
     and what it returned or changed, and every decision taken. Be dense and \
     factual; keep the summary under 400 tokens.";

#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    /// Even the system prefix plus the most recent segment exceeds the
    /// budget; the caller surfaces this as an unrecoverable run failure.
    #[error("context overflow: {token_count} tokens exceed the {limit}-token budget after compaction")]
    Overflow { token_count: usize, limit: usize },
}

/// One user-opened slice of the conversation.
#[derive(Debug, Clone)]
pub struct Segment {
    /// The opening user message; `None` only for a leading slice that
    /// precedes any user turn.
    pub user: Option<Message>,
    /// Assistant and tool messages closing the segment.
    pub rest: Vec<Message>,
}

impl Segment {
    fn all_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.rest.len() + 1);
        if let Some(u) = &self.user {
            out.push(u.clone());
        }
        out.extend(self.rest.iter().cloned());
        out
    }
}

/// Split a message list into its leading system messages and segments.
pub fn split_segments(messages: &[Message]) -> (Vec<Message>, Vec<Segment>) {
    let mut system: Vec<Message> = Vec::new();
    let mut iter = messages.iter().peekable();
    while let Some(m) = iter.peek() {
        if m.role == Role::System {
            system.push((*m).clone());
            iter.next();
        } else {
            break;
        }
    }

    let mut segments: Vec<Segment> = Vec::new();
    for m in iter {
        if m.role == Role::User {
            segments.push(Segment {
                user: Some(m.clone()),
                rest: Vec::new(),
            });
        } else {
            match segments.last_mut() {
                Some(seg) => seg.rest.push(m.clone()),
                None => segments.push(Segment {
                    user: None,
                    rest: vec![m.clone()],
                }),
            }
        }
    }
    (system, segments)
}

/// Serialise a segment into plain text for inclusion in a summary prompt.
fn serialize_segment(seg: &Segment) -> String {
    seg.all_messages()
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            let text = match &m.content {
                quorum_model::MessageContent::Text(t) => t.clone(),
                quorum_model::MessageContent::ToolCall { function, .. } => {
                    format!("[tool_call: {}({})]", function.name, function.arguments)
                }
                quorum_model::MessageContent::ToolResult { content, .. } => {
                    format!("[tool_result: {content}]")
                }
            };
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Compacts over-budget message lists through the model that owns the run.
pub struct Compactor {
    model: Arc<dyn ModelProvider>,
}

impl Compactor {
    pub fn new(model: Arc<dyn ModelProvider>) -> Self {
        Self { model }
    }

    /// One model call producing a bounded summary of `text`.
    ///
    /// A failed or empty summary degrades to `None`; the caller then drops
    /// the segment instead of summarising it, so compaction always makes
    /// forward progress.
    async fn summarize(&self, text: &str) -> Option<String> {
        let req = CompletionRequest {
            messages: vec![Message::user(format!("{SUMMARY_PROMPT}\n\n---\n\n{text}"))],
            tools: vec![],
            max_tokens: Some(SUMMARY_MAX_TOKENS),
            stream: false,
        };
        match self.model.generate(req).await {
            Ok(completion) if !completion.content.trim().is_empty() => Some(completion.content),
            Ok(_) => {
                warn!("summary call returned empty content; segment will be dropped");
                None
            }
            Err(e) => {
                warn!(error = %e, "summary call failed; segment will be dropped");
                None
            }
        }
    }

    /// Return `messages` unchanged when within budget; otherwise compact.
    ///
    /// Phases, in order, re-checking the budget after each:
    /// 1. replace every closed segment except the most recent with
    ///    `[user, assistant(summary)]`;
    /// 2. re-summarise all of those summaries together into one;
    /// 3. drop the oldest (user, summary) pairs until the list fits.
    ///
    /// The system messages and the most recent segment are never touched;
    /// when those alone exceed the budget the result is
    /// [`CompactionError::Overflow`].
    pub async fn maybe_compact(
        &self,
        messages: Vec<Message>,
        limit: usize,
    ) -> Result<Vec<Message>, CompactionError> {
        if tokens::count(&messages) <= limit {
            return Ok(messages);
        }

        let (system, mut segments) = split_segments(&messages);
        if segments.is_empty() {
            return Err(CompactionError::Overflow {
                token_count: tokens::count(&messages),
                limit,
            });
        }
        let recent = segments.pop().expect("checked non-empty");

        // Phase 1: summarise each closed segment.
        let mut pairs: Vec<(Option<Message>, Message)> = Vec::new();
        for seg in &segments {
            match self.summarize(&serialize_segment(seg)).await {
                Some(summary) => pairs.push((seg.user.clone(), Message::assistant(summary))),
                None => {}
            }
        }

        let assemble = |pairs: &[(Option<Message>, Message)]| -> Vec<Message> {
            let mut out = system.clone();
            for (user, summary) in pairs {
                if let Some(u) = user {
                    out.push(u.clone());
                }
                out.push(summary.clone());
            }
            out.extend(recent.all_messages());
            out
        };

        let result = assemble(&pairs);
        if tokens::count(&result) <= limit {
            return Ok(result);
        }

        // Phase 2: bottom-up re-summarisation of the summaries together.
        if pairs.len() > 1 {
            let combined_text = pairs
                .iter()
                .filter_map(|(_, s)| s.as_text())
                .collect::<Vec<_>>()
                .join("\n\n");
            if let Some(combined) = self.summarize(&combined_text).await {
                pairs = vec![(None, Message::assistant(combined))];
                let result = assemble(&pairs);
                if tokens::count(&result) <= limit {
                    return Ok(result);
                }
            }
        }

        // Phase 3: drop oldest pairs until the list fits.
        while !pairs.is_empty() {
            pairs.remove(0);
            let result = assemble(&pairs);
            if tokens::count(&result) <= limit {
                return Ok(result);
            }
        }

        // Trimmed head: system + most recent segment only.
        let result = assemble(&[]);
        let token_count = tokens::count(&result);
        if token_count <= limit {
            Ok(result)
        } else {
            Err(CompactionError::Overflow { token_count, limit })
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
