// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What kind of runner produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerType {
    /// A team leader's coordinating run.
    Leader,
    /// A delegated member run; always carries `parent_run_id`.
    Member,
    /// A standalone agent run.
    Solo,
}

/// One completed (or failed) agent run.  Immutable once `ended_at` is set
/// and the record is committed to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    /// Set exactly when `runner_type` is [`RunnerType::Member`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub runner_type: RunnerType,
    pub runner_name: String,
    pub task: String,
    pub response: String,
    pub success: bool,
    pub steps: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl RunRecord {
    /// A standalone run.
    pub fn solo(runner_name: impl Into<String>, task: impl Into<String>) -> Self {
        Self::new(RunnerType::Solo, None, runner_name, task)
    }

    /// A team leader's run.
    pub fn leader(runner_name: impl Into<String>, task: impl Into<String>) -> Self {
        Self::new(RunnerType::Leader, None, runner_name, task)
    }

    /// A delegated member run linked to its leader.
    pub fn member(
        runner_name: impl Into<String>,
        task: impl Into<String>,
        parent_run_id: impl Into<String>,
    ) -> Self {
        Self::new(
            RunnerType::Member,
            Some(parent_run_id.into()),
            runner_name,
            task,
        )
    }

    fn new(
        runner_type: RunnerType,
        parent_run_id: Option<String>,
        runner_name: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            parent_run_id,
            runner_type,
            runner_name: runner_name.into(),
            task: task.into(),
            response: String::new(),
            success: false,
            steps: 0,
            started_at: now,
            ended_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Close the record with its outcome.
    pub fn finish(mut self, response: impl Into<String>, success: bool, steps: u32) -> Self {
        self.response = response.into();
        self.success = success;
        self.steps = steps;
        self.ended_at = Utc::now();
        self
    }

    /// A run is top-level when it has no parent; only these are replayed
    /// into future prompts.
    pub fn is_top_level(&self) -> bool {
        self.parent_run_id.is_none()
    }

    /// Check the parent-linkage invariant: `parent_run_id` is present
    /// exactly when the runner is a member.
    pub fn linkage_is_valid(&self) -> bool {
        match self.runner_type {
            RunnerType::Member => self.parent_run_id.is_some(),
            RunnerType::Leader | RunnerType::Solo => self.parent_run_id.is_none(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
