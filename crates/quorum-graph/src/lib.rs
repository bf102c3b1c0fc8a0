// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod executor;
mod graph;
mod state;

pub use executor::NodeCompletion;
pub use graph::{
    AgentNode, GraphError, Node, NodeFn, RouterFn, StateGraph, StateGraphBuilder, END, START,
};
pub use state::{state_from, Reducer, Reducers, State};
