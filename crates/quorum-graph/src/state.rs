// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Graph state and per-field reducers.
//!
//! The state is a flat record of named JSON fields.  Nodes return *partial*
//! states; each field's declared reducer merges a node's write into the
//! live value.  Parallel writes to a `Replace` field are rejected rather
//! than silently ordered: that is the difference between a race and a
//! merge.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// The state record flowing through a graph.
pub type State = serde_json::Map<String, Value>;

/// Build a [`State`] from key/value pairs.
pub fn state_from(pairs: &[(&str, Value)]) -> State {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// How concurrent writes to one field merge.
#[derive(Clone)]
pub enum Reducer {
    /// Last write wins.  The default, and therefore illegal for fields
    /// written by concurrent branches.
    Replace,
    /// Array concatenation; scalars are appended as single elements.
    Append,
    /// User-supplied `merge(old, new) → new`.  Must be associative and
    /// commutative for deterministic results under parallel execution.
    Custom(Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>),
}

impl std::fmt::Debug for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "Replace"),
            Self::Append => write!(f, "Append"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Reducer {
    /// Merge one write into the current value.
    pub fn apply(&self, old: Option<&Value>, new: Value) -> Value {
        match self {
            Self::Replace => new,
            Self::Append => {
                let mut items = match old {
                    Some(Value::Array(existing)) => existing.clone(),
                    Some(other) => vec![other.clone()],
                    None => Vec::new(),
                };
                match new {
                    Value::Array(extra) => items.extend(extra),
                    scalar => items.push(scalar),
                }
                Value::Array(items)
            }
            Self::Custom(merge) => {
                let old = old.cloned().unwrap_or(Value::Null);
                merge(&old, &new)
            }
        }
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, Self::Replace)
    }
}

/// Per-field reducer declarations; undeclared fields default to `Replace`.
#[derive(Debug, Clone, Default)]
pub struct Reducers {
    fields: HashMap<String, Reducer>,
}

impl Reducers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, field: impl Into<String>, reducer: Reducer) {
        self.fields.insert(field.into(), reducer);
    }

    pub fn for_field(&self, field: &str) -> Reducer {
        self.fields.get(field).cloned().unwrap_or(Reducer::Replace)
    }

    /// Fold one node's partial output into the live state.
    pub fn merge(&self, state: &mut State, update: State) {
        for (field, value) in update {
            let merged = self.for_field(&field).apply(state.get(&field), value);
            state.insert(field, merged);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
