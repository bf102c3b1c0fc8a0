// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-run JSONL logging.
//!
//! One file per run, named by the run's start timestamp, each line a
//! `{seq, ts, type, payload}` record.  Request records carry the model id
//! and request shape only; provider credentials never reach this module.
//!
//! When an observability exporter is installed the file sink is suppressed
//! and every record is forwarded to the exporter callback instead.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// Record types in a run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunLogType {
    Step,
    Request,
    Response,
    ToolExecution,
    Completion,
}

/// One line of a run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogRecord {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub record_type: RunLogType,
    pub payload: Value,
}

/// Callback interface for observability backends (Langfuse-style).
/// Installing one replaces the per-run file sink.
pub trait RunLogExporter: Send + Sync {
    fn export(&self, record: &RunLogRecord);
}

enum Sink {
    File { path: PathBuf, file: Mutex<std::fs::File> },
    Exporter(Arc<dyn RunLogExporter>),
    Disabled,
}

/// Structured event sink for one run.
pub struct RunLogger {
    seq: AtomicU64,
    sink: Sink,
}

impl RunLogger {
    /// File-backed logger; the file is created immediately, named by the
    /// run's start timestamp.
    pub fn to_dir(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let name = format!("run_{}.jsonl", Utc::now().format("%Y%m%d_%H%M%S_%f"));
        let path = dir.join(name);
        let file = std::fs::File::create(&path)?;
        Ok(Self {
            seq: AtomicU64::new(0),
            sink: Sink::File {
                path,
                file: Mutex::new(file),
            },
        })
    }

    /// Exporter-backed logger; no file is written.
    pub fn with_exporter(exporter: Arc<dyn RunLogExporter>) -> Self {
        Self {
            seq: AtomicU64::new(0),
            sink: Sink::Exporter(exporter),
        }
    }

    /// No-op logger for runs with logging disabled.
    pub fn disabled() -> Self {
        Self {
            seq: AtomicU64::new(0),
            sink: Sink::Disabled,
        }
    }

    /// Path of the backing file, when file-backed.
    pub fn path(&self) -> Option<&Path> {
        match &self.sink {
            Sink::File { path, .. } => Some(path),
            _ => None,
        }
    }

    fn record(&self, record_type: RunLogType, payload: Value) {
        let record = RunLogRecord {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            ts: Utc::now(),
            record_type,
            payload,
        };
        match &self.sink {
            Sink::File { path, file } => {
                let mut file = file.lock().expect("run log file poisoned");
                if let Ok(line) = serde_json::to_string(&record) {
                    if let Err(e) = writeln!(file, "{line}") {
                        warn!(path = %path.display(), error = %e, "run log write failed");
                    }
                }
            }
            Sink::Exporter(exporter) => exporter.export(&record),
            Sink::Disabled => {}
        }
    }

    pub fn step(&self, n: u32, token_count: usize, token_limit: usize) {
        self.record(
            RunLogType::Step,
            json!({ "n": n, "token_count": token_count, "token_limit": token_limit }),
        );
    }

    /// Log the shape of an outbound model request.  Credentials are not part
    /// of the payload by construction.
    pub fn request(&self, model: &str, message_count: usize, tool_count: usize) {
        self.record(
            RunLogType::Request,
            json!({ "model": model, "messages": message_count, "tools": tool_count }),
        );
    }

    pub fn response(&self, content: &str, tool_call_names: &[String]) {
        self.record(
            RunLogType::Response,
            json!({ "content": content, "tool_calls": tool_call_names }),
        );
    }

    pub fn tool_execution(&self, call_id: &str, tool: &str, duration_ms: u64, success: bool) {
        self.record(
            RunLogType::ToolExecution,
            json!({
                "call_id": call_id,
                "tool": tool,
                "duration_ms": duration_ms,
                "success": success,
            }),
        );
    }

    pub fn completion(&self, status: &str, steps: u32, response: &str) {
        self.record(
            RunLogType::Completion,
            json!({ "status": status, "steps": steps, "response": response }),
        );
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
