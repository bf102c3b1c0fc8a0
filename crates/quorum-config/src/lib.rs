// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Typed runtime configuration for the quorum agent runtime.
//!
//! All knobs are resolved from environment variables (the runtime has no
//! config-file surface).  Construction goes through [`Config::from_env`] in
//! production and [`Config::from_vars`] in tests, so no test ever mutates
//! process-global environment state.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Model/provider selection and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Raw model identifier as given (`LLM_MODEL`).  May or may not carry a
    /// `provider/` prefix; canonicalisation happens in the model crate.
    pub model: String,
    /// API key for the default provider (`LLM_API_KEY`).
    pub api_key: Option<String>,
    /// Endpoint override for the default provider (`LLM_API_BASE`).
    pub base_url: Option<String>,
    /// Requested completion budget.  Capped to the provider ceiling at call
    /// time; `None` resolves from the model catalog.
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o-mini".into(),
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Per-run loop configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunConfig {
    /// Hard ceiling on loop steps (`AGENT_MAX_STEPS`).
    pub max_steps: u32,
    /// Context budget in tokens (`TOKEN_LIMIT`).
    pub token_limit: usize,
    /// Stream model output instead of blocking per turn.
    pub streaming: bool,
    /// Allow the compactor to run when the budget is exceeded.  When false,
    /// an over-budget message list fails the run instead.
    pub enable_summarization: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            token_limit: 120_000,
            streaming: true,
            enable_summarization: true,
        }
    }
}

/// Process-wide runtime configuration: tool loading, sandboxing, persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Recursion cap for `spawn_agent` (`SPAWN_AGENT_MAX_DEPTH`).
    pub spawn_max_depth: usize,
    /// Default per-tool execution timeout in seconds.
    pub tool_timeout_secs: u64,
    /// Dial MCP servers at startup (`ENABLE_MCP`).
    pub enable_mcp: bool,
    /// Path to the `mcpServers` JSON document (`MCP_CONFIG_PATH`).
    pub mcp_config_path: Option<PathBuf>,
    /// Substitute sandboxed tools per session (`ENABLE_SANDBOX`).
    pub enable_sandbox: bool,
    /// Idle lifetime of a session sandbox (`SANDBOX_TTL_SECONDS`).
    pub sandbox_ttl_secs: u64,
    /// Skill catalog root; `None` disables the skill index.
    pub skills_dir: Option<PathBuf>,
    /// Base directory for run logs and session files (`QUORUM_DATA_DIR`).
    pub data_dir: PathBuf,
    /// How many prior top-level runs to replay into the next prompt.
    pub history_runs: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            spawn_max_depth: 3,
            tool_timeout_secs: 60,
            enable_mcp: false,
            mcp_config_path: None,
            enable_sandbox: false,
            sandbox_ttl_secs: 3600,
            skills_dir: None,
            data_dir: default_data_dir(),
            history_runs: 3,
        }
    }
}

/// Everything the runtime needs, resolved once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub run: RunConfig,
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Resolve configuration from an explicit variable map.
    ///
    /// Unparseable numeric values fall back to the default with a warning
    /// rather than failing startup: a bad `TOKEN_LIMIT` should not take the
    /// whole process down.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |k: &str| vars.get(k).filter(|v| !v.is_empty()).cloned();
        let parse = |k: &str, default: u64| -> u64 {
            match get(k) {
                None => default,
                Some(raw) => raw.parse().unwrap_or_else(|_| {
                    warn!(var = k, value = %raw, "unparseable numeric env var; using default");
                    default
                }),
            }
        };
        let flag = |k: &str| {
            get(k)
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false)
        };

        let defaults = RunConfig::default();
        let rt_defaults = RuntimeConfig::default();

        let model = ModelConfig {
            model: get("LLM_MODEL").unwrap_or_else(|| ModelConfig::default().model),
            api_key: get("LLM_API_KEY"),
            base_url: get("LLM_API_BASE"),
            max_tokens: get("LLM_MAX_TOKENS").and_then(|v| v.parse().ok()),
            temperature: get("LLM_TEMPERATURE").and_then(|v| v.parse().ok()),
        };

        let run = RunConfig {
            max_steps: parse("AGENT_MAX_STEPS", u64::from(defaults.max_steps)) as u32,
            token_limit: parse("TOKEN_LIMIT", defaults.token_limit as u64) as usize,
            streaming: defaults.streaming,
            enable_summarization: defaults.enable_summarization,
        };

        let runtime = RuntimeConfig {
            spawn_max_depth: parse("SPAWN_AGENT_MAX_DEPTH", rt_defaults.spawn_max_depth as u64)
                as usize,
            tool_timeout_secs: parse("TOOL_TIMEOUT_SECONDS", rt_defaults.tool_timeout_secs),
            enable_mcp: flag("ENABLE_MCP"),
            mcp_config_path: get("MCP_CONFIG_PATH").map(expand_path),
            enable_sandbox: flag("ENABLE_SANDBOX"),
            sandbox_ttl_secs: parse("SANDBOX_TTL_SECONDS", rt_defaults.sandbox_ttl_secs),
            skills_dir: get("QUORUM_SKILLS_DIR").map(expand_path),
            data_dir: get("QUORUM_DATA_DIR")
                .map(expand_path)
                .unwrap_or_else(default_data_dir),
            history_runs: parse("QUORUM_HISTORY_RUNS", rt_defaults.history_runs as u64) as usize,
        };

        Self {
            model,
            run,
            runtime,
        }
    }

    /// Directory for per-run JSONL log files.
    pub fn run_log_dir(&self) -> PathBuf {
        self.runtime.data_dir.join("runs")
    }

    /// Directory for per-session JSONL files.
    pub fn session_dir(&self) -> PathBuf {
        self.runtime.data_dir.join("sessions")
    }
}

fn expand_path(raw: String) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quorum")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_spec() {
        let c = Config::from_vars(&HashMap::new());
        assert_eq!(c.run.max_steps, 50);
        assert_eq!(c.run.token_limit, 120_000);
        assert_eq!(c.runtime.spawn_max_depth, 3);
        assert_eq!(c.runtime.tool_timeout_secs, 60);
        assert_eq!(c.runtime.sandbox_ttl_secs, 3600);
        assert!(!c.runtime.enable_mcp);
        assert!(!c.runtime.enable_sandbox);
    }

    #[test]
    fn model_vars_are_read() {
        let c = Config::from_vars(&vars(&[
            ("LLM_MODEL", "claude-3-5-sonnet"),
            ("LLM_API_KEY", "sk-test"),
            ("LLM_API_BASE", "http://localhost:8080/v1"),
        ]));
        assert_eq!(c.model.model, "claude-3-5-sonnet");
        assert_eq!(c.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(c.model.base_url.as_deref(), Some("http://localhost:8080/v1"));
    }

    #[test]
    fn numeric_overrides_apply() {
        let c = Config::from_vars(&vars(&[
            ("AGENT_MAX_STEPS", "7"),
            ("TOKEN_LIMIT", "2048"),
            ("SPAWN_AGENT_MAX_DEPTH", "1"),
            ("SANDBOX_TTL_SECONDS", "60"),
        ]));
        assert_eq!(c.run.max_steps, 7);
        assert_eq!(c.run.token_limit, 2048);
        assert_eq!(c.runtime.spawn_max_depth, 1);
        assert_eq!(c.runtime.sandbox_ttl_secs, 60);
    }

    #[test]
    fn bad_numeric_falls_back_to_default() {
        let c = Config::from_vars(&vars(&[("TOKEN_LIMIT", "lots")]));
        assert_eq!(c.run.token_limit, 120_000);
    }

    #[test]
    fn boolean_flags_accept_common_spellings() {
        for truthy in ["1", "true", "yes", "on"] {
            let c = Config::from_vars(&vars(&[("ENABLE_MCP", truthy)]));
            assert!(c.runtime.enable_mcp, "{truthy} should enable MCP");
        }
        let c = Config::from_vars(&vars(&[("ENABLE_MCP", "0")]));
        assert!(!c.runtime.enable_mcp);
    }

    #[test]
    fn empty_values_are_treated_as_unset() {
        let c = Config::from_vars(&vars(&[("LLM_API_KEY", "")]));
        assert!(c.model.api_key.is_none());
    }

    #[test]
    fn data_dir_layout() {
        let c = Config::from_vars(&vars(&[("QUORUM_DATA_DIR", "/tmp/qdata")]));
        assert_eq!(c.run_log_dir(), PathBuf::from("/tmp/qdata/runs"));
        assert_eq!(c.session_dir(), PathBuf::from("/tmp/qdata/sessions"));
    }
}
