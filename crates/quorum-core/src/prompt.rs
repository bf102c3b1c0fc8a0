// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Deterministic system-prompt assembly.
//!
//! [`build`] is a pure function of its inputs: the same config, tool
//! guidance, skill index, and environment produce byte-identical output.
//! The only exception is the datetime section, which reads the clock when
//! `add_datetime` is set.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::warn;

use quorum_skills::SkillMeta;

/// Typed configuration for one agent's system prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptConfig {
    /// Rendered as a `# <name>` heading.
    pub name: Option<String>,
    /// Free paragraph following the heading.
    pub description: Option<String>,
    /// `<your_role>` section.
    pub role: Option<String>,
    /// `<instructions>` bullet list.
    pub instructions: Vec<String>,
    /// `<expected_output>` section.
    pub expected_output: Option<String>,
    /// Emit markdown-formatting guidance.
    pub markdown: bool,
    /// Emit the current datetime.
    pub add_datetime: bool,
    /// Emit the workspace directory.
    pub add_workspace_info: bool,
    /// IANA timezone name for the datetime section; invalid names fall back
    /// to UTC with a warning.
    pub timezone: String,
    /// Verbatim trailing context (e.g. session history replay).
    pub additional_context: Option<String>,
    /// `<additional_information>` bullet list.
    pub additional_information: Vec<String>,
    /// Extra markdown sections, rendered in insertion order.
    pub custom_sections: Vec<(String, String)>,
}

/// Environment facts the assembler may embed.
#[derive(Debug, Clone, Default)]
pub struct PromptEnv {
    /// Absolute current working directory for `<workspace_info>`.
    pub workspace_dir: PathBuf,
}

impl PromptEnv {
    pub fn current() -> Self {
        Self {
            workspace_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }
}

/// Assemble the system message.  Sections appear in a fixed order and are
/// joined by blank lines; absent inputs produce no section at all.
pub fn build(
    config: &PromptConfig,
    tool_instructions: &[String],
    skills: &[&SkillMeta],
    env: &PromptEnv,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(name) = trimmed(&config.name) {
        sections.push(format!("# {name}"));
    }
    if let Some(description) = trimmed(&config.description) {
        sections.push(description.to_string());
    }
    if let Some(role) = trimmed(&config.role) {
        sections.push(format!("<your_role>\n{role}\n</your_role>"));
    }
    if !config.instructions.is_empty() {
        sections.push(format!(
            "<instructions>\n{}\n</instructions>",
            bullets(&config.instructions)
        ));
    }
    if config.markdown {
        sections.push(
            "<output_format>\nFormat your response as markdown: headings for \
             structure, fenced code blocks for code, lists where they aid \
             scanning.\n</output_format>"
                .to_string(),
        );
    }
    if !tool_instructions.is_empty() {
        sections.push(format!(
            "<tool_usage_guidelines>\n{}\n</tool_usage_guidelines>",
            tool_instructions.join("\n")
        ));
    }
    if !skills.is_empty() {
        let mut block = String::from("## Available Skills\n\n");
        for skill in skills {
            block.push_str(&format!("- {}: {}\n", skill.name, one_line(&skill.description)));
        }
        block.push_str(
            "\nWhen a task matches one of these skills, call `get_skill` with its \
             name to load the full content before proceeding.",
        );
        sections.push(block);
    }
    if let Some(expected) = trimmed(&config.expected_output) {
        sections.push(format!("<expected_output>\n{expected}\n</expected_output>"));
    }
    if config.add_workspace_info {
        sections.push(format!(
            "<workspace_info>\nCurrent working directory: {}\n</workspace_info>",
            env.workspace_dir.display()
        ));
    }
    if config.add_datetime {
        let tz = Tz::from_str(&config.timezone).unwrap_or_else(|_| {
            if !config.timezone.is_empty() {
                warn!(timezone = %config.timezone, "unknown timezone; using UTC");
            }
            Tz::UTC
        });
        let now = Utc::now().with_timezone(&tz);
        sections.push(format!(
            "<current_datetime>\n{}\n</current_datetime>",
            now.format("%Y-%m-%d %H:%M:%S %Z")
        ));
    }
    if !config.additional_information.is_empty() {
        sections.push(format!(
            "<additional_information>\n{}\n</additional_information>",
            bullets(&config.additional_information)
        ));
    }
    for (title, body) in &config.custom_sections {
        sections.push(format!("## {title}\n\n{}", body.trim()));
    }
    if let Some(context) = config.additional_context.as_deref() {
        if !context.is_empty() {
            sections.push(context.to_string());
        }
    }

    sections.join("\n\n")
}

fn trimmed(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("- {}", i.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
