// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{provider::ResponseStream, CompletionRequest, ResponseEvent, Role};

/// Deterministic mock provider for tests.  Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::Usage {
                input_tokens: 10,
                output_tokens: 10,
            }),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted mock provider.  Each `stream` call pops the next response
/// script from the front of the queue, so tests can specify exact event
/// sequences, including tool calls, without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    /// The last `CompletionRequest` seen by this provider.  Written on each
    /// call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
    /// Every request seen, in order.  Used by compaction tests to count and
    /// inspect the per-segment summary calls.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    /// Build a provider from an ordered list of response scripts.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    /// Convenience: provider that returns a tool call, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Self::tool_call_script(tool_id, tool_name, args_json),
            Self::text_script(final_text),
        ])
    }

    /// A script emitting one complete text turn.
    pub fn text_script(reply: impl Into<String>) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::TextDelta(reply.into()),
            ResponseEvent::Usage {
                input_tokens: 5,
                output_tokens: 5,
            },
            ResponseEvent::Done,
        ]
    }

    /// A script emitting one complete tool-call turn.
    pub fn tool_call_script(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
    ) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::ToolCall {
                index: 0,
                id: tool_id.into(),
                name: tool_name.into(),
                arguments: args_json.into(),
            },
            ResponseEvent::Done,
        ]
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.requests.lock().unwrap().push(req.clone());
        *self.last_request.lock().unwrap() = Some(req);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                vec![
                    ResponseEvent::TextDelta("[no more scripts]".into()),
                    ResponseEvent::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<ResponseEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

/// A provider that always fails.  Used to exercise the loop's terminal error
/// path without a network.
pub struct FailingMockProvider {
    pub message: String,
}

#[async_trait]
impl crate::ModelProvider for FailingMockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "failing-mock-model"
    }

    async fn stream(&self, _req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        Err(anyhow::anyhow!("{}", self.message))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, ModelProvider};
    use futures::StreamExt;

    fn req(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user(text)],
            stream: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let mut stream = MockProvider.stream(req("hi")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        match first {
            ResponseEvent::TextDelta(t) => assert!(t.contains("MOCK: hi")),
            other => panic!("unexpected first event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn generate_assembles_scripted_tool_call() {
        let p = ScriptedMockProvider::tool_then_text("c1", "echo", r#"{"text":"hi"}"#, "done");
        let completion = p.generate(req("go")).await.unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "echo");

        let second = p.generate(req("again")).await.unwrap();
        assert_eq!(second.content, "done");
        assert!(second.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn scripted_records_requests() {
        let p = ScriptedMockProvider::always_text("x");
        let _ = p.generate(req("first")).await.unwrap();
        assert_eq!(p.requests.lock().unwrap().len(), 1);
        assert!(p.last_request.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let p = ScriptedMockProvider::new(vec![]);
        let completion = p.generate(req("hi")).await.unwrap();
        assert!(completion.content.contains("no more scripts"));
    }

    #[tokio::test]
    async fn failing_provider_errors() {
        let p = FailingMockProvider {
            message: "connection refused".into(),
        };
        let err = p.generate(req("hi")).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
