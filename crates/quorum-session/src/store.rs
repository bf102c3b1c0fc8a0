// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::record::RunRecord;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown session: {0}")]
    Unknown(String),
    #[error("run {run_id} violates parent linkage (runner_type vs parent_run_id)")]
    BadLinkage { run_id: String },
    #[error("session io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// An append-only container of runs bound to a caller identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Name of the team or agent this session belongs to.
    pub name: String,
    pub runs: Vec<RunRecord>,
    /// Free-form cross-run state for agents and coordinators.
    #[serde(default)]
    pub state: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, owner_id: Option<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            owner_id,
            name: name.into(),
            runs: Vec::new(),
            state: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Insert a committed run, keeping `runs` ordered by `started_at`.
    ///
    /// Runs commit when they *end*, so a leader that started before its
    /// members commits after them; sorted insertion keeps the ordering
    /// invariant without ever rewriting a committed record.
    pub(crate) fn insert_run(&mut self, run: RunRecord) {
        let pos = self
            .runs
            .iter()
            .rposition(|r| r.started_at <= run.started_at)
            .map(|p| p + 1)
            .unwrap_or(0);
        self.runs.insert(pos, run);
        self.updated_at = Utc::now();
    }
}

/// Format the last `num_runs` top-level runs as a history block for prompt
/// injection.  Returns `None` when there is nothing to replay.
pub fn format_history(runs: &[RunRecord], num_runs: usize) -> Option<String> {
    if num_runs == 0 {
        return None;
    }
    let top_level: Vec<&RunRecord> = runs.iter().filter(|r| r.is_top_level()).collect();
    if top_level.is_empty() {
        return None;
    }
    let start = top_level.len().saturating_sub(num_runs);
    let mut out = String::from("<history>\n");
    for run in &top_level[start..] {
        out.push_str("<run>\n<task>\n");
        out.push_str(run.task.trim());
        out.push_str("\n</task>\n<response>\n");
        out.push_str(run.response.trim());
        out.push_str("\n</response>\n</run>\n");
    }
    out.push_str("</history>");
    Some(out)
}

/// Persistence contract for sessions.
///
/// Implementations serialise concurrent `append_run` calls to the same
/// session; committed records are never rewritten.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session, creating it when absent.
    async fn get_or_create(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
        name: &str,
    ) -> Result<Session, SessionError>;

    /// Append a finished run.  The record is frozen on insertion.
    async fn append_run(&self, session_id: &str, run: RunRecord) -> Result<(), SessionError>;

    /// History block for the last `num_runs` top-level runs, or `None` when
    /// the session has none.
    async fn history_context(
        &self,
        session_id: &str,
        num_runs: usize,
    ) -> Result<Option<String>, SessionError>;

    async fn get_state(&self, session_id: &str, key: &str)
        -> Result<Option<Value>, SessionError>;

    async fn set_state(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), SessionError>;
}

/// Single-process in-memory backend.
///
/// The outer map lock is held only to fetch the per-session handle; all
/// session mutation happens under that session's own lock, so appends to
/// different sessions do not contend.
pub struct InMemorySessionStore {
    sessions: std::sync::Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn handle(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
        name: &str,
        create: bool,
    ) -> Result<Arc<Mutex<Session>>, SessionError> {
        let mut map = self.sessions.lock().expect("session map poisoned");
        if let Some(h) = map.get(session_id) {
            return Ok(Arc::clone(h));
        }
        if !create {
            return Err(SessionError::Unknown(session_id.to_string()));
        }
        let session = Session::new(session_id, owner_id.map(str::to_string), name);
        let handle = Arc::new(Mutex::new(session));
        map.insert(session_id.to_string(), Arc::clone(&handle));
        Ok(handle)
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
        name: &str,
    ) -> Result<Session, SessionError> {
        let handle = self.handle(session_id, owner_id, name, true)?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    async fn append_run(&self, session_id: &str, run: RunRecord) -> Result<(), SessionError> {
        if !run.linkage_is_valid() {
            return Err(SessionError::BadLinkage { run_id: run.run_id });
        }
        let handle = self.handle(session_id, None, "", false)?;
        let mut session = handle.lock().await;
        session.insert_run(run);
        Ok(())
    }

    async fn history_context(
        &self,
        session_id: &str,
        num_runs: usize,
    ) -> Result<Option<String>, SessionError> {
        let handle = match self.handle(session_id, None, "", false) {
            Ok(h) => h,
            Err(SessionError::Unknown(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let session = handle.lock().await;
        Ok(format_history(&session.runs, num_runs))
    }

    async fn get_state(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Option<Value>, SessionError> {
        let handle = self.handle(session_id, None, "", false)?;
        let session = handle.lock().await;
        Ok(session.state.get(key).cloned())
    }

    async fn set_state(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), SessionError> {
        let handle = self.handle(session_id, None, "", false)?;
        let mut session = handle.lock().await;
        session.state.insert(key.to_string(), value);
        session.updated_at = Utc::now();
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = InMemorySessionStore::new();
        let a = store.get_or_create("s1", Some("me"), "agent").await.unwrap();
        let b = store.get_or_create("s1", None, "other").await.unwrap();
        assert_eq!(a.session_id, b.session_id);
        assert_eq!(b.owner_id.as_deref(), Some("me"));
        assert_eq!(b.name, "agent");
    }

    #[tokio::test]
    async fn append_is_monotonic_and_never_rewrites() {
        let store = InMemorySessionStore::new();
        store.get_or_create("s1", None, "agent").await.unwrap();

        let first = RunRecord::solo("agent", "one").finish("r1", true, 1);
        let first_id = first.run_id.clone();
        store.append_run("s1", first).await.unwrap();

        let second = RunRecord::solo("agent", "two").finish("r2", true, 1);
        let second_id = second.run_id.clone();
        store.append_run("s1", second).await.unwrap();

        let session = store.get_or_create("s1", None, "agent").await.unwrap();
        assert_eq!(session.runs.len(), 2);
        assert_eq!(session.runs[0].run_id, first_id);
        assert_eq!(session.runs[1].run_id, second_id);
        assert!(session.runs[0].started_at <= session.runs[1].started_at);
    }

    #[tokio::test]
    async fn leader_committing_after_members_keeps_start_order() {
        let store = InMemorySessionStore::new();
        store.get_or_create("s1", None, "team").await.unwrap();

        // The leader starts first but commits last.
        let mut leader = RunRecord::leader("lead", "coordinate");
        leader.started_at -= chrono::Duration::seconds(1);
        let leader_id = leader.run_id.clone();
        let member = RunRecord::member("worker", "subtask", &leader_id).finish("ok", true, 1);
        store.append_run("s1", member).await.unwrap();
        store
            .append_run("s1", leader.finish("all done", true, 2))
            .await
            .unwrap();

        let session = store.get_or_create("s1", None, "team").await.unwrap();
        assert_eq!(session.runs[0].run_id, leader_id, "leader started first");
    }

    #[tokio::test]
    async fn append_rejects_bad_linkage() {
        let store = InMemorySessionStore::new();
        store.get_or_create("s1", None, "agent").await.unwrap();
        let mut bad = RunRecord::solo("agent", "t");
        bad.parent_run_id = Some("phantom".into());
        assert!(matches!(
            store.append_run("s1", bad).await,
            Err(SessionError::BadLinkage { .. })
        ));
    }

    #[tokio::test]
    async fn append_to_unknown_session_errors() {
        let store = InMemorySessionStore::new();
        let run = RunRecord::solo("agent", "t");
        assert!(matches!(
            store.append_run("missing", run).await,
            Err(SessionError::Unknown(_))
        ));
    }

    #[tokio::test]
    async fn history_replays_only_top_level_runs() {
        let store = InMemorySessionStore::new();
        store.get_or_create("s1", None, "team").await.unwrap();

        let leader = RunRecord::leader("lead", "big task");
        let leader_id = leader.run_id.clone();
        store
            .append_run(
                "s1",
                RunRecord::member("worker", "subtask", &leader_id).finish("sub out", true, 1),
            )
            .await
            .unwrap();
        store
            .append_run("s1", leader.finish("final answer", true, 2))
            .await
            .unwrap();

        let history = store.history_context("s1", 5).await.unwrap().unwrap();
        assert!(history.contains("big task"));
        assert!(history.contains("final answer"));
        assert!(!history.contains("subtask"), "member runs are not replayed");
    }

    #[tokio::test]
    async fn history_is_bounded_to_last_n() {
        let store = InMemorySessionStore::new();
        store.get_or_create("s1", None, "agent").await.unwrap();
        for i in 0..5 {
            store
                .append_run(
                    "s1",
                    RunRecord::solo("agent", format!("task {i}")).finish(format!("r{i}"), true, 1),
                )
                .await
                .unwrap();
        }
        let history = store.history_context("s1", 2).await.unwrap().unwrap();
        assert!(!history.contains("task 2"));
        assert!(history.contains("task 3"));
        assert!(history.contains("task 4"));
    }

    #[tokio::test]
    async fn history_for_empty_or_unknown_session_is_none() {
        let store = InMemorySessionStore::new();
        assert!(store.history_context("nope", 3).await.unwrap().is_none());
        store.get_or_create("s1", None, "agent").await.unwrap();
        assert!(store.history_context("s1", 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_round_trips() {
        let store = InMemorySessionStore::new();
        store.get_or_create("s1", None, "agent").await.unwrap();
        store
            .set_state("s1", "phase", serde_json::json!("research"))
            .await
            .unwrap();
        assert_eq!(
            store.get_state("s1", "phase").await.unwrap(),
            Some(serde_json::json!("research"))
        );
        assert_eq!(store.get_state("s1", "missing").await.unwrap(), None);
    }
}
