// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Workflow-level trace events for multi-agent runs.
//!
//! Where the run log records what happened *inside* one run, the trace
//! records how runs relate: delegations, fan-out, message passing.  The
//! `{trace_id, run_id, parent_run_id}` triple is sufficient to reconstruct
//! the fork/join topology of a team or graph execution.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    WorkflowStart,
    AgentStart,
    Delegation,
    TaskStart,
    MessagePass,
    TaskEnd,
    AgentEnd,
    WorkflowEnd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub event_type: TraceEventType,
    pub ts: DateTime<Utc>,
    pub payload: Value,
}

/// Destination for trace events.
pub trait TraceSink: Send + Sync {
    fn emit(&self, event: &TraceEvent);
}

/// In-memory sink; used in tests and for post-run topology inspection.
#[derive(Default)]
pub struct MemoryTraceSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().expect("trace sink poisoned").clone()
    }
}

impl TraceSink for MemoryTraceSink {
    fn emit(&self, event: &TraceEvent) {
        self.events.lock().expect("trace sink poisoned").push(event.clone());
    }
}

/// JSONL file sink, one line per event.
pub struct FileTraceSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl FileTraceSink {
    pub fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSink for FileTraceSink {
    fn emit(&self, event: &TraceEvent) {
        use std::io::Write;
        let mut file = self.file.lock().expect("trace file poisoned");
        if let Ok(line) = serde_json::to_string(event) {
            if let Err(e) = writeln!(file, "{line}") {
                warn!(path = %self.path.display(), error = %e, "trace write failed");
            }
        }
    }
}

/// Emits trace events for one workflow under a shared trace id.
pub struct TraceLogger {
    trace_id: String,
    sink: std::sync::Arc<dyn TraceSink>,
}

impl TraceLogger {
    pub fn new(sink: std::sync::Arc<dyn TraceSink>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            sink,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn emit(
        &self,
        run_id: &str,
        parent_run_id: Option<&str>,
        event_type: TraceEventType,
        payload: Value,
    ) {
        self.sink.emit(&TraceEvent {
            trace_id: self.trace_id.clone(),
            run_id: run_id.to_string(),
            parent_run_id: parent_run_id.map(str::to_string),
            event_type,
            ts: Utc::now(),
            payload,
        });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
