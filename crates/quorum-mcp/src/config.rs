// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The `mcpServers` configuration document.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "calculator": { "command": "python", "args": ["server.py"] },
//!     "search": { "transport": "http", "url": "http://localhost:8080/mcp" }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum McpConfigError {
    #[error("failed to read MCP config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid MCP config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("server {name}: transport {transport:?} requires a url")]
    MissingUrl { name: String, transport: Transport },
    #[error("server {name}: stdio transport requires a command")]
    MissingCommand { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Sse,
    Http,
}

/// One server entry under `mcpServers`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct McpServerConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub disabled: bool,
    pub transport: Transport,
    pub url: Option<String>,
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub servers: HashMap<String, McpServerConfig>,
}

impl McpConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let config: Self = serde_json::from_str(raw)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, McpConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| McpConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| McpConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Enabled servers only, validated, sorted by name for deterministic
    /// load order.
    pub fn enabled_servers(&self) -> Result<Vec<(String, McpServerConfig)>, McpConfigError> {
        let mut servers: Vec<(String, McpServerConfig)> = self
            .servers
            .iter()
            .filter(|(_, cfg)| !cfg.disabled)
            .map(|(name, cfg)| (name.clone(), cfg.clone()))
            .collect();
        servers.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, cfg) in &servers {
            match cfg.transport {
                Transport::Stdio => {
                    if cfg.command.is_none() {
                        return Err(McpConfigError::MissingCommand { name: name.clone() });
                    }
                }
                Transport::Sse | Transport::Http => {
                    if cfg.url.is_none() {
                        return Err(McpConfigError::MissingUrl {
                            name: name.clone(),
                            transport: cfg.transport,
                        });
                    }
                }
            }
        }
        Ok(servers)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
