// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! JSONL file-per-session backend.
//!
//! Each session is one append-only file of line-delimited events under the
//! base directory:
//!
//! ```text
//! {"type":"session","session_id":"s1","name":"agent",...}
//! {"type":"run","record":{...}}
//! {"type":"state","key":"phase","value":"research"}
//! ```
//!
//! State is reconstructed by replaying the file, so a crash can at worst
//! lose the final partial line; committed runs are never rewritten.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::record::RunRecord;
use crate::store::{format_history, Session, SessionError, SessionStore};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SessionEvent {
    Session {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<String>,
        name: String,
        created_at: DateTime<Utc>,
    },
    Run {
        record: RunRecord,
    },
    State {
        key: String,
        value: Value,
    },
}

/// File-backed session store.  A per-session async lock serialises writers;
/// different sessions append concurrently.
pub struct FileSessionStore {
    base_dir: PathBuf,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            locks: std::sync::Mutex::new(HashMap::new()),
        })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        // Session ids are caller-supplied; keep only filesystem-safe chars.
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join(format!("{safe}.jsonl"))
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("session lock map poisoned");
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn append_event(&self, path: &Path, event: &SessionEvent) -> Result<(), SessionError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn replay(&self, path: &Path) -> Result<Option<Session>, SessionError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut session: Option<Session> = None;
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: SessionEvent = match serde_json::from_str(line) {
                Ok(e) => e,
                Err(e) => {
                    // A torn final line after a crash is expected; anything
                    // mid-file is data corruption worth surfacing in logs.
                    warn!(path = %path.display(), lineno, error = %e, "skipping undecodable session line");
                    continue;
                }
            };
            match event {
                SessionEvent::Session {
                    session_id,
                    owner_id,
                    name,
                    created_at,
                } => {
                    let mut s = Session::new(session_id, owner_id, name);
                    s.created_at = created_at;
                    s.updated_at = created_at;
                    session = Some(s);
                }
                SessionEvent::Run { record } => {
                    if let Some(s) = session.as_mut() {
                        s.insert_run(record);
                    }
                }
                SessionEvent::State { key, value } => {
                    if let Some(s) = session.as_mut() {
                        s.state.insert(key, value);
                    }
                }
            }
        }
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get_or_create(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
        name: &str,
    ) -> Result<Session, SessionError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let path = self.session_path(session_id);
        if let Some(session) = self.replay(&path)? {
            return Ok(session);
        }

        let session = Session::new(session_id, owner_id.map(str::to_string), name);
        self.append_event(
            &path,
            &SessionEvent::Session {
                session_id: session.session_id.clone(),
                owner_id: session.owner_id.clone(),
                name: session.name.clone(),
                created_at: session.created_at,
            },
        )?;
        Ok(session)
    }

    async fn append_run(&self, session_id: &str, run: RunRecord) -> Result<(), SessionError> {
        if !run.linkage_is_valid() {
            return Err(SessionError::BadLinkage { run_id: run.run_id });
        }
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let path = self.session_path(session_id);
        if self.replay(&path)?.is_none() {
            return Err(SessionError::Unknown(session_id.to_string()));
        }
        self.append_event(&path, &SessionEvent::Run { record: run })
    }

    async fn history_context(
        &self,
        session_id: &str,
        num_runs: usize,
    ) -> Result<Option<String>, SessionError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        match self.replay(&self.session_path(session_id))? {
            Some(session) => Ok(format_history(&session.runs, num_runs)),
            None => Ok(None),
        }
    }

    async fn get_state(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Option<Value>, SessionError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        match self.replay(&self.session_path(session_id))? {
            Some(session) => Ok(session.state.get(key).cloned()),
            None => Err(SessionError::Unknown(session_id.to_string())),
        }
    }

    async fn set_state(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), SessionError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let path = self.session_path(session_id);
        if self.replay(&path)?.is_none() {
            return Err(SessionError::Unknown(session_id.to_string()));
        }
        self.append_event(
            &path,
            &SessionEvent::State {
                key: key.to_string(),
                value,
            },
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn session_survives_store_recreation() {
        let tmp = TempDir::new().unwrap();

        {
            let store = FileSessionStore::new(tmp.path()).unwrap();
            store.get_or_create("s1", Some("me"), "agent").await.unwrap();
            store
                .append_run("s1", RunRecord::solo("agent", "task").finish("out", true, 1))
                .await
                .unwrap();
            store
                .set_state("s1", "phase", serde_json::json!("done"))
                .await
                .unwrap();
        }

        let store = FileSessionStore::new(tmp.path()).unwrap();
        let session = store.get_or_create("s1", None, "agent").await.unwrap();
        assert_eq!(session.owner_id.as_deref(), Some("me"));
        assert_eq!(session.runs.len(), 1);
        assert_eq!(session.runs[0].response, "out");
        assert_eq!(session.state["phase"], serde_json::json!("done"));
    }

    #[tokio::test]
    async fn one_file_per_session() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path()).unwrap();
        store.get_or_create("alpha", None, "a").await.unwrap();
        store.get_or_create("beta", None, "b").await.unwrap();
        assert!(tmp.path().join("alpha.jsonl").is_file());
        assert!(tmp.path().join("beta.jsonl").is_file());
    }

    #[tokio::test]
    async fn unsafe_session_ids_are_sanitised() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path()).unwrap();
        store.get_or_create("../evil/../id", None, "a").await.unwrap();
        // Nothing escapes the base directory.
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn history_context_reads_from_disk() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path()).unwrap();
        store.get_or_create("s1", None, "agent").await.unwrap();
        store
            .append_run(
                "s1",
                RunRecord::solo("agent", "remember me").finish("noted", true, 1),
            )
            .await
            .unwrap();

        let history = store.history_context("s1", 3).await.unwrap().unwrap();
        assert!(history.contains("remember me"));
        assert!(history.contains("noted"));
    }

    #[tokio::test]
    async fn torn_trailing_line_is_tolerated() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path()).unwrap();
        store.get_or_create("s1", None, "agent").await.unwrap();

        // Simulate a crash mid-append.
        let path = tmp.path().join("s1.jsonl");
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "{{\"type\":\"run\",\"reco").unwrap();
        drop(f);

        let session = store.get_or_create("s1", None, "agent").await.unwrap();
        assert!(session.runs.is_empty());
    }

    #[tokio::test]
    async fn append_to_unknown_session_errors() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path()).unwrap();
        assert!(matches!(
            store
                .append_run("ghost", RunRecord::solo("a", "t"))
                .await,
            Err(SessionError::Unknown(_))
        ));
    }
}
