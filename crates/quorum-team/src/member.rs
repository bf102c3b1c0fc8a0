// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
/// Configuration for one team member.
///
/// Members are blueprints, not live agents: each delegation instantiates a
/// fresh agent from this config over the named subset of the team's tool
/// pool.
#[derive(Debug, Clone)]
pub struct MemberConfig {
    /// Unique name the leader delegates to.
    pub name: String,
    /// The member's `<your_role>` text.
    pub role: String,
    /// Extra instruction bullets for the member's prompt.
    pub instructions: Vec<String>,
    /// Tool names the member may use, drawn from the team's pool.
    pub tool_names: Vec<String>,
    /// Step ceiling for member runs; `0` inherits the team default.
    pub max_steps: u32,
}

impl MemberConfig {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            instructions: Vec::new(),
            tool_names: Vec::new(),
            max_steps: 0,
        }
    }

    pub fn with_instructions(mut self, instructions: Vec<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_tools(mut self, tool_names: Vec<String>) -> Self {
        self.tool_names = tool_names;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }
}
