// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Layer-wise parallel execution of a compiled graph.
//!
//! Every node in a layer whose incoming edges actually fired runs
//! concurrently on a snapshot of the current state; their partial outputs
//! fold into the live state through the declared reducers, and conditional
//! routers pick successors on the merged state.  Within one node effects
//! are ordered; across nodes in a layer order is undefined, which is
//! exactly why concurrent `Replace` writes are rejected.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use quorum_core::{Agent, AgentEvent};

use crate::graph::{AgentNode, GraphError, Node, StateGraph, END, START};
use crate::state::State;

/// One node's completion, emitted by the streaming variant in completion
/// order.
#[derive(Debug, Clone)]
pub struct NodeCompletion {
    pub node_name: String,
    pub state_delta: State,
}

impl StateGraph {
    /// Run to completion and return the final state.
    pub async fn run(&self, initial: State) -> Result<State, GraphError> {
        self.run_inner(initial, None, None).await
    }

    /// Run with a cancellation flag, checked cooperatively between node
    /// completions and layers.
    pub async fn run_with_cancel(
        &self,
        initial: State,
        cancel: Arc<AtomicBool>,
    ) -> Result<State, GraphError> {
        self.run_inner(initial, None, Some(cancel)).await
    }

    /// Streaming variant: yields `{node_name, state_delta}` as each node
    /// completes, in completion order.
    pub async fn run_streaming(
        &self,
        initial: State,
        tx: mpsc::Sender<NodeCompletion>,
    ) -> Result<State, GraphError> {
        self.run_inner(initial, Some(tx), None).await
    }

    async fn run_inner(
        &self,
        initial: State,
        tx: Option<mpsc::Sender<NodeCompletion>>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<State, GraphError> {
        let cancelled = || {
            cancel
                .as_ref()
                .map(|c| c.load(Ordering::SeqCst))
                .unwrap_or(false)
        };

        let mut state = initial;
        // Nodes activated by an edge that actually fired.
        let mut active: HashSet<String> = HashSet::new();
        for target in self.fired_successors(START, &state)? {
            active.insert(target);
        }

        for layer in self.layers().iter().skip(1) {
            if cancelled() {
                return Err(GraphError::Cancelled);
            }

            let runnable: Vec<String> = layer
                .iter()
                .filter(|n| active.contains(*n))
                .cloned()
                .collect();
            if runnable.is_empty() {
                continue;
            }
            debug!(nodes = ?runnable, "running graph layer");

            let mut join = JoinSet::new();
            for name in &runnable {
                let node = self.nodes[name.as_str()].node.clone();
                let snapshot = state.clone();
                let name = name.clone();
                join.spawn(async move {
                    let result = execute_node(&node, &snapshot).await;
                    (name, result)
                });
            }

            // Collect the wave in completion order.  A node failure cancels
            // its in-flight siblings and propagates.
            let mut wave: Vec<(String, State)> = Vec::with_capacity(runnable.len());
            while let Some(joined) = join.join_next().await {
                if cancelled() {
                    join.abort_all();
                    return Err(GraphError::Cancelled);
                }
                match joined {
                    Ok((name, Ok(delta))) => {
                        if let Some(tx) = &tx {
                            let _ = tx
                                .send(NodeCompletion {
                                    node_name: name.clone(),
                                    state_delta: delta.clone(),
                                })
                                .await;
                        }
                        wave.push((name, delta));
                    }
                    Ok((name, Err(e))) => {
                        warn!(node = %name, error = %e, "graph node failed; cancelling siblings");
                        join.abort_all();
                        return Err(GraphError::NodeFailed {
                            node: name,
                            message: format!("{e:#}"),
                        });
                    }
                    Err(join_err) => {
                        join.abort_all();
                        return Err(GraphError::NodeFailed {
                            node: "(panicked)".to_string(),
                            message: join_err.to_string(),
                        });
                    }
                }
            }

            // Late safety net for writes that were not declared at build
            // time: two writers of one Replace field within a wave is a
            // race, not a merge.
            for (i, (name_a, delta_a)) in wave.iter().enumerate() {
                for (name_b, delta_b) in wave.iter().skip(i + 1) {
                    for field in delta_a.keys() {
                        if delta_b.contains_key(field)
                            && self.reducers.for_field(field).is_replace()
                        {
                            return Err(GraphError::ReducerConflict {
                                field: field.clone(),
                                a: name_a.clone(),
                                b: name_b.clone(),
                            });
                        }
                    }
                }
            }

            for (_, delta) in &wave {
                self.reducers.merge(&mut state, delta.clone());
            }

            // Routers see the merged state.
            for (name, _) in &wave {
                active.remove(name);
                for target in self.fired_successors(name, &state)? {
                    active.insert(target);
                }
            }
        }

        if !active.is_empty() && !active.contains(END) {
            // Activated nodes that sit in earlier layers than the wave that
            // fired them cannot exist in a DAG; anything left over is a bug.
            warn!(leftover = ?active, "graph finished with activated but unexecuted nodes");
        }

        Ok(state)
    }
}

async fn execute_node(node: &Node, state: &State) -> anyhow::Result<State> {
    match node {
        Node::Function(f) => f(state),
        Node::Agent(agent_node) => execute_agent_node(agent_node, state).await,
    }
}

/// Run a fresh agent loop for an [`AgentNode`]: `state[input_key]` is the
/// user message, the final text lands in `output_key`.
async fn execute_agent_node(node: &AgentNode, state: &State) -> anyhow::Result<State> {
    let input = match state.get(&node.input_key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => anyhow::bail!("input key {:?} missing from graph state", node.input_key),
    };

    let mut agent = Agent::new(
        format!("graph-node-{}", node.output_key),
        Arc::clone(&node.model),
        Arc::clone(&node.tools),
        node.system_prompt.clone(),
        node.run_config,
    );
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let outcome = agent.run(&input, tx).await?;
    while rx.try_recv().is_ok() {}

    if !outcome.success() {
        anyhow::bail!(
            "agent node failed: {}",
            outcome.reason.unwrap_or_else(|| outcome.response)
        );
    }

    let mut delta = State::new();
    delta.insert(
        node.output_key.clone(),
        serde_json::Value::String(outcome.response),
    );
    Ok(delta)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StateGraphBuilder;
    use crate::state::{state_from, Reducer};
    use quorum_config::RunConfig;
    use quorum_model::ScriptedMockProvider;
    use quorum_tools::ToolRegistry;
    use serde_json::json;

    fn set(field: &'static str, value: serde_json::Value) -> impl Fn(&State) -> anyhow::Result<State> + Send + Sync {
        move |_s: &State| {
            let mut delta = State::new();
            delta.insert(field.to_string(), value.clone());
            Ok(delta)
        }
    }

    /// The S6 graph: analyzer routes to urgent or normal; both append to
    /// `results`.
    fn triage_graph() -> crate::graph::StateGraph {
        StateGraphBuilder::new()
            .add_node("analyzer", &["status"], |s: &State| {
                let task = s.get("task").and_then(|t| t.as_str()).unwrap_or("");
                let mut delta = State::new();
                let status = if task.contains("urgent") { "urgent" } else { "normal" };
                delta.insert("status".into(), json!(status));
                Ok(delta)
            })
            .add_node("urgent", &["results"], set("results", json!(["handled urgently"])))
            .add_node("normal", &["results"], set("results", json!(["handled normally"])))
            .add_edge(START, "analyzer")
            .add_conditional_edge("analyzer", &["urgent", "normal"], |s: &State| {
                if s.get("status") == Some(&json!("urgent")) {
                    vec!["urgent".into()]
                } else {
                    vec!["normal".into()]
                }
            })
            .add_edge("urgent", END)
            .add_edge("normal", END)
            .with_reducer("results", Reducer::Append)
            .compile()
            .unwrap()
    }

    #[tokio::test]
    async fn conditional_routes_urgent_branch() {
        let graph = triage_graph();
        let initial = state_from(&[
            ("task", json!("urgent X")),
            ("status", json!("")),
            ("results", json!([])),
        ]);
        let state = graph.run(initial).await.unwrap();
        assert_eq!(state["task"], json!("urgent X"));
        assert_eq!(state["status"], json!("urgent"));
        assert_eq!(state["results"], json!(["handled urgently"]));
    }

    #[tokio::test]
    async fn conditional_routes_normal_branch() {
        let graph = triage_graph();
        let initial = state_from(&[
            ("task", json!("routine cleanup")),
            ("status", json!("")),
            ("results", json!([])),
        ]);
        let state = graph.run(initial).await.unwrap();
        assert_eq!(state["status"], json!("normal"));
        assert_eq!(state["results"], json!(["handled normally"]));
    }

    #[tokio::test]
    async fn unchosen_branch_is_skipped_entirely() {
        let graph = triage_graph();
        let initial = state_from(&[("task", json!("urgent X")), ("results", json!([]))]);
        let state = graph.run(initial).await.unwrap();
        let results = state["results"].as_array().unwrap();
        assert_eq!(results.len(), 1, "only the routed branch ran");
    }

    #[tokio::test]
    async fn parallel_logger_branch_appends_alongside_triage() {
        // S6 extension: a parallel START→logger edge appends to `results`;
        // the final array contains both entries in unspecified order.
        let graph = StateGraphBuilder::new()
            .add_node("analyzer", &["status"], |s: &State| {
                let task = s.get("task").and_then(|t| t.as_str()).unwrap_or("");
                let mut delta = State::new();
                let status = if task.contains("urgent") { "urgent" } else { "normal" };
                delta.insert("status".into(), json!(status));
                Ok(delta)
            })
            .add_node("urgent", &["results"], set("results", json!(["urgent path"])))
            .add_node("normal", &["results"], set("results", json!(["normal path"])))
            .add_node("logger", &["results"], set("results", json!(["logged"])))
            .add_edge(START, "analyzer")
            .add_edge(START, "logger")
            .add_conditional_edge("analyzer", &["urgent", "normal"], |s: &State| {
                if s.get("status") == Some(&json!("urgent")) {
                    vec!["urgent".into()]
                } else {
                    vec!["normal".into()]
                }
            })
            .add_edge("urgent", END)
            .add_edge("normal", END)
            .add_edge("logger", END)
            .with_reducer("results", Reducer::Append)
            .compile()
            .unwrap();

        let initial = state_from(&[("task", json!("urgent X")), ("results", json!([]))]);
        let state = graph.run(initial).await.unwrap();
        let results: Vec<&str> = state["results"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results.contains(&"logged"));
        assert!(results.contains(&"urgent path"));
    }

    #[tokio::test]
    async fn streaming_yields_completions_in_completion_order() {
        let graph = triage_graph();
        let (tx, mut rx) = mpsc::channel(64);
        let initial = state_from(&[("task", json!("urgent X")), ("results", json!([]))]);
        graph.run_streaming(initial, tx).await.unwrap();

        let mut names = Vec::new();
        while let Ok(c) = rx.try_recv() {
            names.push(c.node_name);
        }
        assert_eq!(names, vec!["analyzer", "urgent"]);
    }

    #[tokio::test]
    async fn node_failure_cancels_the_run() {
        let graph = StateGraphBuilder::new()
            .add_node("boom", &["x"], |_s: &State| anyhow::bail!("kaput"))
            .add_edge(START, "boom")
            .add_edge("boom", END)
            .compile()
            .unwrap();
        let err = graph.run(State::new()).await.unwrap_err();
        assert!(matches!(err, GraphError::NodeFailed { node, .. } if node == "boom"));
    }

    #[tokio::test]
    async fn pre_set_cancel_flag_stops_the_run() {
        let graph = triage_graph();
        let cancel = Arc::new(AtomicBool::new(true));
        let initial = state_from(&[("task", json!("urgent X")), ("results", json!([]))]);
        let err = graph.run_with_cancel(initial, cancel).await.unwrap_err();
        assert!(matches!(err, GraphError::Cancelled));
    }

    #[tokio::test]
    async fn undeclared_concurrent_replace_writes_fail_at_runtime() {
        // Both nodes declare different fields but actually write the same
        // one; the runtime net catches what the static check could not.
        let graph = StateGraphBuilder::new()
            .add_node("left", &["a"], set("sneaky", json!("L")))
            .add_node("right", &["b"], set("sneaky", json!("R")))
            .add_edge(START, "left")
            .add_edge(START, "right")
            .add_edge("left", END)
            .add_edge("right", END)
            .compile()
            .unwrap();
        let err = graph.run(State::new()).await.unwrap_err();
        assert!(matches!(err, GraphError::ReducerConflict { field, .. } if field == "sneaky"));
    }

    #[tokio::test]
    async fn agent_node_reads_input_key_and_writes_output_key() {
        let model = Arc::new(ScriptedMockProvider::always_text("analysis: fine"));
        let graph = StateGraphBuilder::new()
            .add_agent_node(
                "analyst",
                AgentNode {
                    model,
                    tools: Arc::new(ToolRegistry::new()),
                    system_prompt: "You analyse.".into(),
                    run_config: RunConfig::default(),
                    input_key: "task".into(),
                    output_key: "analysis".into(),
                },
            )
            .add_edge(START, "analyst")
            .add_edge("analyst", END)
            .compile()
            .unwrap();

        let state = graph
            .run(state_from(&[("task", json!("look at this"))]))
            .await
            .unwrap();
        assert_eq!(state["analysis"], json!("analysis: fine"));
        assert_eq!(state["task"], json!("look at this"));
    }

    #[tokio::test]
    async fn agent_node_missing_input_key_fails() {
        let model = Arc::new(ScriptedMockProvider::always_text("unused"));
        let graph = StateGraphBuilder::new()
            .add_agent_node(
                "analyst",
                AgentNode {
                    model,
                    tools: Arc::new(ToolRegistry::new()),
                    system_prompt: String::new(),
                    run_config: RunConfig::default(),
                    input_key: "missing".into(),
                    output_key: "out".into(),
                },
            )
            .add_edge(START, "analyst")
            .add_edge("analyst", END)
            .compile()
            .unwrap();
        let err = graph.run(State::new()).await.unwrap_err();
        assert!(matches!(err, GraphError::NodeFailed { .. }));
    }
}
