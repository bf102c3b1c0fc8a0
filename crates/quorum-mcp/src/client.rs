// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! rmcp-based client: dial configured servers, enumerate their tools, and
//! adapt each remote tool to the local [`Tool`] trait.
//!
//! Connections are long-lived: a background task holds each service open
//! for the life of the process.  Dialing retries with exponential backoff;
//! a connection that dies later surfaces as failed tool results until the
//! registry is reloaded.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, ClientCapabilities, Implementation, InitializeRequestParams},
    service::ServerSink,
    transport::{child_process::TokioChildProcess, StreamableHttpClientTransport},
    ServiceExt,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use quorum_tools::{Tool, ToolCall, ToolOutput, ToolRegistry, ToolSource};

use crate::config::{McpConfig, McpServerConfig, Transport};

const DIAL_ATTEMPTS: u32 = 5;
const DIAL_INITIAL_DELAY: Duration = Duration::from_millis(100);

fn client_info() -> InitializeRequestParams {
    InitializeRequestParams {
        meta: None,
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "quorum".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        },
    }
}

/// A connected MCP server: its enumerated tools plus the live sink.
pub struct McpConnection {
    pub server_name: String,
    pub tools: Vec<rmcp::model::Tool>,
    sink: ServerSink,
    /// Keeps the service task alive for the life of the connection.
    _service_handle: Arc<JoinHandle<()>>,
}

impl McpConnection {
    /// Dial one configured server and enumerate its tools, retrying with
    /// exponential backoff on connection failure.
    pub async fn connect(name: &str, cfg: &McpServerConfig) -> anyhow::Result<Self> {
        let mut delay = DIAL_INITIAL_DELAY;
        let mut attempt = 1;
        loop {
            match Self::dial(name, cfg).await {
                Ok(conn) => return Ok(conn),
                Err(e) if attempt < DIAL_ATTEMPTS => {
                    warn!(
                        server = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "MCP dial failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e).with_context(|| format!("dialing MCP server {name}")),
            }
        }
    }

    async fn dial(name: &str, cfg: &McpServerConfig) -> anyhow::Result<Self> {
        match cfg.transport {
            Transport::Stdio => {
                let command = cfg
                    .command
                    .as_deref()
                    .context("stdio transport requires a command")?;
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(&cfg.args);
                for (k, v) in &cfg.env {
                    cmd.env(k, v);
                }
                let transport = TokioChildProcess::new(cmd)
                    .with_context(|| format!("spawning MCP server process {command}"))?;
                Self::finish_handshake(name, client_info().serve(transport).await?).await
            }
            // Legacy SSE servers are reached through the same
            // streamable-http client; the transport negotiates downward.
            Transport::Sse | Transport::Http => {
                let url = cfg.url.as_deref().context("http transport requires a url")?;
                let transport = StreamableHttpClientTransport::from_uri(url);
                Self::finish_handshake(name, client_info().serve(transport).await?).await
            }
        }
    }

    async fn finish_handshake(
        name: &str,
        service: rmcp::service::RunningService<rmcp::service::RoleClient, InitializeRequestParams>,
    ) -> anyhow::Result<Self> {
        let sink = service.peer().clone();
        let tools = service
            .peer()
            .list_tools(Default::default())
            .await
            .with_context(|| format!("listing tools on MCP server {name}"))?
            .tools;

        debug!(server = name, tool_count = tools.len(), "MCP server connected");

        // Keep the service alive in the background for the life of the
        // connection.
        let handle = tokio::spawn(async move {
            let _ = service.waiting().await;
        });

        Ok(Self {
            server_name: name.to_string(),
            tools,
            sink,
            _service_handle: Arc::new(handle),
        })
    }

    /// Adapt every enumerated tool to the local [`Tool`] trait.
    pub fn into_tools(self) -> Vec<McpTool> {
        let sink = self.sink;
        self.tools
            .into_iter()
            .map(|info| McpTool::new(info, sink.clone()))
            .collect()
    }
}

/// A remote MCP tool adapted to the local tool trait.
pub struct McpTool {
    info: rmcp::model::Tool,
    description: String,
    sink: ServerSink,
}

impl McpTool {
    pub fn new(info: rmcp::model::Tool, sink: ServerSink) -> Self {
        let description = info
            .description
            .as_deref()
            .unwrap_or("(no description provided by server)")
            .to_string();
        Self {
            info,
            description,
            sink,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        self.info.name.as_ref()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        Value::Object((*self.info.input_schema).clone())
    }

    fn source(&self) -> ToolSource {
        ToolSource::Mcp
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        // MCP takes an open-ended argument object; pass the map through.
        let arguments = call.args.as_object().cloned();
        let result = self
            .sink
            .call_tool(CallToolRequestParam {
                meta: None,
                name: self.info.name.clone(),
                arguments,
                task: None,
            })
            .await;

        match result {
            Ok(res) => {
                let text: String = res
                    .content
                    .iter()
                    .filter_map(|c| c.as_text().map(|t| t.text.clone()))
                    .collect::<Vec<_>>()
                    .join("\n");
                if res.is_error.unwrap_or(false) {
                    ToolOutput::err(&call.id, text)
                } else {
                    ToolOutput::ok(&call.id, text)
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("MCP call failed: {e}")),
        }
    }
}

/// Dial every enabled server in `config` and register the discovered tools,
/// merged by name (the registry warns and shadows on collision).
///
/// A server that cannot be dialed is skipped with a warning rather than
/// failing startup; remote tools are an enrichment, not a prerequisite.
pub async fn register_mcp_tools(
    registry: &mut ToolRegistry,
    config: &McpConfig,
) -> anyhow::Result<usize> {
    let mut registered = 0;
    for (name, cfg) in config.enabled_servers()? {
        match McpConnection::connect(&name, &cfg).await {
            Ok(conn) => {
                for tool in conn.into_tools() {
                    registry.register(tool);
                    registered += 1;
                }
            }
            Err(e) => {
                warn!(server = %name, error = %e, "skipping unreachable MCP server");
            }
        }
    }
    Ok(registered)
}
