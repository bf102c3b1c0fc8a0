// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session-keyed sandbox substitution.
//!
//! The sandbox daemon itself is external; the runtime consumes it behind the
//! narrow [`SandboxBackend`] contract.  Instances are keyed by session id,
//! created on first use, shared by concurrent requests for the same key, and
//! torn down after a TTL of inactivity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Tool, ToolCall, ToolOutput, ToolRegistry, ToolSource};

/// A live sandbox instance for one session.
#[async_trait]
pub trait SandboxExec: Send + Sync {
    /// Run the named tool inside the sandbox and return its output text.
    async fn exec(&self, tool: &str, args: &Value) -> anyhow::Result<String>;
}

/// Factory contract for the external sandbox daemon.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Tool names this backend can substitute.
    fn supports(&self, tool_name: &str) -> bool;
    /// Create (or attach to) the sandbox for a session.
    async fn create(&self, session_id: &str) -> anyhow::Result<Arc<dyn SandboxExec>>;
}

struct LiveSandbox {
    exec: Arc<dyn SandboxExec>,
    last_used: Instant,
}

/// Process-wide sandbox pool with TTL eviction.
pub struct SandboxManager {
    backend: Arc<dyn SandboxBackend>,
    ttl: Duration,
    live: Mutex<HashMap<String, LiveSandbox>>,
}

impl SandboxManager {
    pub fn new(backend: Arc<dyn SandboxBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn supports(&self, tool_name: &str) -> bool {
        self.backend.supports(tool_name)
    }

    /// Get the sandbox for a session, creating it on first use.  Expired
    /// entries are evicted on every acquire, so an idle pool drains itself
    /// without a background task.
    pub async fn acquire(&self, session_id: &str) -> anyhow::Result<Arc<dyn SandboxExec>> {
        let mut live = self.live.lock().await;
        let now = Instant::now();
        live.retain(|key, entry| {
            let keep = now.duration_since(entry.last_used) < self.ttl;
            if !keep {
                debug!(session_id = %key, "sandbox TTL expired; tearing down");
            }
            keep
        });

        if let Some(entry) = live.get_mut(session_id) {
            entry.last_used = now;
            return Ok(Arc::clone(&entry.exec));
        }

        let exec = self.backend.create(session_id).await?;
        live.insert(
            session_id.to_string(),
            LiveSandbox {
                exec: Arc::clone(&exec),
                last_used: now,
            },
        );
        debug!(session_id, "sandbox created");
        Ok(exec)
    }

    /// Number of live (non-expired) sandboxes.  Mainly for tests and
    /// diagnostics.
    pub async fn live_count(&self) -> usize {
        let now = Instant::now();
        self.live
            .lock()
            .await
            .values()
            .filter(|e| now.duration_since(e.last_used) < self.ttl)
            .count()
    }
}

/// A sandboxed replacement for a native tool, bound to one session.
pub struct SandboxTool {
    name: String,
    description: String,
    parameters: Value,
    session_id: String,
    manager: Arc<SandboxManager>,
}

#[async_trait]
impl Tool for SandboxTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }
    fn source(&self) -> ToolSource {
        ToolSource::Sandbox
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let exec = match self.manager.acquire(&self.session_id).await {
            Ok(e) => e,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "sandbox unavailable");
                return ToolOutput::err(&call.id, format!("sandbox unavailable: {e}"));
            }
        };
        match exec.exec(&self.name, &call.args).await {
            Ok(content) => ToolOutput::ok(&call.id, content),
            Err(e) => ToolOutput::err(&call.id, format!("sandbox execution failed: {e}")),
        }
    }
}

/// Replace every native tool that has a sandbox equivalent with its
/// sandboxed counterpart for the duration of one session.
///
/// The substitute keeps the native tool's name, description, and schema, so
/// the model sees an unchanged tool surface.
pub fn substitute_sandbox_tools(
    registry: &mut ToolRegistry,
    manager: &Arc<SandboxManager>,
    session_id: &str,
) {
    let replaceable: Vec<_> = registry
        .names()
        .into_iter()
        .filter(|name| manager.supports(name))
        .collect();

    for name in replaceable {
        let Some(native) = registry.get(&name) else {
            continue;
        };
        if native.source() != ToolSource::Native {
            continue;
        }
        registry.register(SandboxTool {
            name: native.name().to_string(),
            description: native.description().to_string(),
            parameters: native.parameters_schema(),
            session_id: session_id.to_string(),
            manager: Arc::clone(manager),
        });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
