// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Graph definition, validation, and layering.
//!
//! A graph is built from named nodes and edges, then compiled: compilation
//! validates the invariants (reachability, termination, reducer conflicts)
//! and computes the longest-path layering that drives parallel execution.
//! Conditional edges contribute all their candidates to validation and
//! layering; at runtime the router picks a subset.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::warn;

use quorum_config::RunConfig;
use quorum_model::ModelProvider;
use quorum_tools::ToolRegistry;

use crate::state::{Reducer, Reducers, State};

pub const START: &str = "__start__";
pub const END: &str = "__end__";

/// A pure state-transform node: partial state in, partial state out.
pub type NodeFn = Arc<dyn Fn(&State) -> anyhow::Result<State> + Send + Sync>;

/// A conditional router: inspects the current state and names the
/// successor(s) to fire.
pub type RouterFn = Arc<dyn Fn(&State) -> Vec<String> + Send + Sync>;

/// An agent-backed node: reads `state[input_key]` as the user message, runs
/// a fresh agent loop, writes the final text to `state[output_key]`.
#[derive(Clone)]
pub struct AgentNode {
    pub model: Arc<dyn ModelProvider>,
    pub tools: Arc<ToolRegistry>,
    pub system_prompt: String,
    pub run_config: RunConfig,
    pub input_key: String,
    pub output_key: String,
}

#[derive(Clone)]
pub enum Node {
    Function(NodeFn),
    Agent(AgentNode),
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("unknown node referenced by edge: {0}")]
    UnknownNode(String),
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),
    #[error("no edge may target START")]
    EdgeIntoStart,
    #[error("START must have at least one outgoing edge")]
    StartHasNoEdges,
    #[error("node {0} has no outgoing edge; every non-END node needs a successor")]
    DeadEnd(String),
    #[error("node {0} is unreachable from START")]
    Unreachable(String),
    #[error("unconditional self-loop on node {0}")]
    SelfLoop(String),
    #[error("graph contains a cycle involving node {0}")]
    Cycle(String),
    #[error(
        "field {field} is written by concurrent nodes {a} and {b} but has the default \
         replace reducer; declare a merge reducer for it"
    )]
    ReducerConflict {
        field: String,
        a: String,
        b: String,
    },
    #[error("node {node} failed: {message}")]
    NodeFailed { node: String, message: String },
    #[error("router on {node} returned unknown successor {target}")]
    BadRoute { node: String, target: String },
    #[error("graph run cancelled")]
    Cancelled,
}

pub(crate) struct NodeEntry {
    pub node: Node,
    /// Fields this node may write; drives static reducer-conflict checks.
    pub writes: Vec<String>,
}

pub(crate) struct ConditionalEdge {
    pub from: String,
    pub candidates: Vec<String>,
    pub router: RouterFn,
}

/// Mutable graph under construction.  `compile` turns it into an
/// executable [`StateGraph`].
#[derive(Default)]
pub struct StateGraphBuilder {
    pub(crate) nodes: HashMap<String, NodeEntry>,
    pub(crate) edges: Vec<(String, String)>,
    pub(crate) conditionals: Vec<ConditionalEdge>,
    pub(crate) reducers: Reducers,
    /// Names registered more than once; a graph is a finite set of *named*
    /// nodes, so duplicates fail compilation rather than silently replacing
    /// the earlier definition.
    duplicates: Vec<String>,
}

impl StateGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function node.  `writes` declares the state fields the node
    /// may output; the declaration is what makes concurrent-write conflicts
    /// checkable at compile time.
    pub fn add_node<F>(mut self, name: &str, writes: &[&str], f: F) -> Self
    where
        F: Fn(&State) -> anyhow::Result<State> + Send + Sync + 'static,
    {
        let writes = writes.iter().map(|w| w.to_string()).collect();
        self.insert_node(name, writes, Node::Function(Arc::new(f)));
        self
    }

    /// Add an agent-backed node.  Its declared writes are its `output_key`.
    pub fn add_agent_node(mut self, name: &str, agent: AgentNode) -> Self {
        let writes = vec![agent.output_key.clone()];
        self.insert_node(name, writes, Node::Agent(agent));
        self
    }

    fn insert_node(&mut self, name: &str, writes: Vec<String>, node: Node) {
        if self.nodes.contains_key(name) {
            warn!(node = name, "duplicate node name; graph will fail to compile");
            self.duplicates.push(name.to_string());
        }
        self.nodes.insert(name.to_string(), NodeEntry { node, writes });
    }

    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.edges.push((from.to_string(), to.to_string()));
        self
    }

    /// Add a conditional edge: at runtime `router` picks one or more of
    /// `candidates` based on the current state.
    pub fn add_conditional_edge<F>(mut self, from: &str, candidates: &[&str], router: F) -> Self
    where
        F: Fn(&State) -> Vec<String> + Send + Sync + 'static,
    {
        self.conditionals.push(ConditionalEdge {
            from: from.to_string(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
            router: Arc::new(router),
        });
        self
    }

    pub fn with_reducer(mut self, field: &str, reducer: Reducer) -> Self {
        self.reducers.declare(field, reducer);
        self
    }

    /// Validate and compute the execution schedule.
    pub fn compile(self) -> Result<StateGraph, GraphError> {
        if let Some(dup) = self.duplicates.first() {
            return Err(GraphError::DuplicateNode(dup.clone()));
        }

        let names: HashSet<&str> = self.nodes.keys().map(String::as_str).collect();
        let known = |n: &str| n == START || n == END || names.contains(n);

        // ── Edge sanity ──────────────────────────────────────────────────────
        for (from, to) in &self.edges {
            if !known(from) {
                return Err(GraphError::UnknownNode(from.clone()));
            }
            if !known(to) {
                return Err(GraphError::UnknownNode(to.clone()));
            }
            if to == START {
                return Err(GraphError::EdgeIntoStart);
            }
            if from == to {
                return Err(GraphError::SelfLoop(from.clone()));
            }
        }
        for cond in &self.conditionals {
            if !known(&cond.from) {
                return Err(GraphError::UnknownNode(cond.from.clone()));
            }
            for c in &cond.candidates {
                if !known(c) {
                    return Err(GraphError::UnknownNode(c.clone()));
                }
                if c == START {
                    return Err(GraphError::EdgeIntoStart);
                }
            }
        }

        // Potential successor map: unconditional edges plus every
        // conditional candidate.
        let mut successors: HashMap<String, Vec<String>> = HashMap::new();
        for (from, to) in &self.edges {
            successors.entry(from.clone()).or_default().push(to.clone());
        }
        for cond in &self.conditionals {
            successors
                .entry(cond.from.clone())
                .or_default()
                .extend(cond.candidates.iter().cloned());
        }

        if successors.get(START).map_or(true, Vec::is_empty) {
            return Err(GraphError::StartHasNoEdges);
        }
        for name in &names {
            if successors.get(*name).map_or(true, Vec::is_empty) {
                return Err(GraphError::DeadEnd((*name).to_string()));
            }
        }

        // ── Reachability from START ──────────────────────────────────────────
        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([START.to_string()]);
        while let Some(n) = queue.pop_front() {
            if !reachable.insert(n.clone()) {
                continue;
            }
            for next in successors.get(&n).into_iter().flatten() {
                queue.push_back(next.clone());
            }
        }
        for name in &names {
            if !reachable.contains(*name) {
                return Err(GraphError::Unreachable((*name).to_string()));
            }
        }

        // ── Longest-path layering (also detects cycles) ──────────────────────
        // Kahn's algorithm over potential edges; nodes left unprocessed sit
        // on a cycle.
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        indegree.insert(START, 0);
        indegree.insert(END, 0);
        for n in &names {
            indegree.entry(n).or_insert(0);
        }
        for tos in successors.values() {
            for to in tos {
                *indegree.entry(to.as_str()).or_insert(0) += 1;
            }
        }

        let mut layer: HashMap<String, usize> = HashMap::new();
        let mut ready: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        layer.insert(START.to_string(), 0);
        let mut processed = 0usize;
        while let Some(n) = ready.pop_front() {
            processed += 1;
            let base = *layer.get(n).unwrap_or(&0);
            for next in successors.get(n).into_iter().flatten() {
                let entry = layer.entry(next.clone()).or_insert(0);
                *entry = (*entry).max(base + 1);
                let d = indegree.get_mut(next.as_str()).expect("known node");
                *d -= 1;
                if *d == 0 {
                    ready.push_back(next.as_str());
                }
            }
        }
        if processed < indegree.len() {
            let stuck = indegree
                .iter()
                .find(|(_, d)| **d > 0)
                .map(|(n, _)| (*n).to_string())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }

        // ── Static reducer-conflict check ────────────────────────────────────
        // Two nodes are potentially concurrent when neither reaches the
        // other; a shared Replace-field write between such nodes is a race.
        let reaches = |from: &str, to: &str| -> bool {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut queue: VecDeque<&str> = VecDeque::from([from]);
            while let Some(n) = queue.pop_front() {
                if !seen.insert(n) {
                    continue;
                }
                if n == to {
                    return true;
                }
                for next in successors.get(n).into_iter().flatten() {
                    queue.push_back(next.as_str());
                }
            }
            false
        };
        let node_list: Vec<&String> = self.nodes.keys().collect();
        for (i, a) in node_list.iter().enumerate() {
            for b in node_list.iter().skip(i + 1) {
                if reaches(a.as_str(), b.as_str()) || reaches(b.as_str(), a.as_str()) {
                    continue;
                }
                let writes_a = &self.nodes[a.as_str()].writes;
                let writes_b = &self.nodes[b.as_str()].writes;
                for field in writes_a {
                    if writes_b.contains(field) && self.reducers.for_field(field).is_replace() {
                        return Err(GraphError::ReducerConflict {
                            field: field.clone(),
                            a: (*a).clone(),
                            b: (*b).clone(),
                        });
                    }
                }
            }
        }

        // Group nodes into layers, shallow to deep.
        let max_layer = layer.values().copied().max().unwrap_or(0);
        let mut layers: Vec<Vec<String>> = vec![Vec::new(); max_layer + 1];
        for (name, l) in &layer {
            if name != START && name != END {
                layers[*l].push(name.clone());
            }
        }
        for l in &mut layers {
            l.sort();
        }

        Ok(StateGraph {
            nodes: self.nodes,
            edges: self.edges,
            conditionals: self.conditionals,
            reducers: self.reducers,
            layers,
        })
    }
}

/// A compiled, executable graph.  See the executor module for `run`.
pub struct StateGraph {
    pub(crate) nodes: HashMap<String, NodeEntry>,
    pub(crate) edges: Vec<(String, String)>,
    pub(crate) conditionals: Vec<ConditionalEdge>,
    pub(crate) reducers: Reducers,
    /// Longest-path layers over potential edges; layer 0 is START's.
    pub(crate) layers: Vec<Vec<String>>,
}

impl std::fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateGraph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("layers", &self.layers)
            .finish()
    }
}

impl StateGraph {
    /// Actually-fired successors of `from` given the current state.
    pub(crate) fn fired_successors(
        &self,
        from: &str,
        state: &State,
    ) -> Result<Vec<String>, GraphError> {
        let mut out: Vec<String> = self
            .edges
            .iter()
            .filter(|(f, _)| f == from)
            .map(|(_, t)| t.clone())
            .collect();
        for cond in self.conditionals.iter().filter(|c| c.from == from) {
            for target in (cond.router)(state) {
                if !cond.candidates.contains(&target) {
                    return Err(GraphError::BadRoute {
                        node: from.to_string(),
                        target,
                    });
                }
                out.push(target);
            }
        }
        Ok(out)
    }

    pub(crate) fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
