// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod input;
pub mod registry;
pub mod sandbox;
pub mod tool;

pub use builtin::{EchoTool, GetSkillTool};
pub use input::{
    format_answer_message, parse_input_request, FieldType, GetUserInputTool, InputField,
    InputRequest, INPUT_REQUEST_KIND,
};
pub use registry::{missing_required_fields, ToolRegistry, ToolSchema};
pub use sandbox::{
    substitute_sandbox_tools, SandboxBackend, SandboxExec, SandboxManager, SandboxTool,
};
pub use tool::{Tool, ToolCall, ToolOutput, ToolSource};
