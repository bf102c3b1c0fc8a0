// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use clap::Parser;

/// Run one agent task from the command line.
///
/// The HTTP surface lives elsewhere; this binary is the minimal front for
/// local use and smoke testing: one task in, streamed events out.
#[derive(Debug, Parser)]
#[command(name = "quorum", version, about = "LLM agent execution runtime")]
pub struct Cli {
    /// The task for the agent.  Reads stdin when omitted.
    pub task: Option<String>,

    /// Session id to continue; a fresh session is created when omitted.
    #[arg(long)]
    pub session: Option<String>,

    /// Model id override (else LLM_MODEL).
    #[arg(long)]
    pub model: Option<String>,

    /// Step ceiling override (else AGENT_MAX_STEPS).
    #[arg(long)]
    pub max_steps: Option<u32>,

    /// Disable streaming output; print only the final answer.
    #[arg(long)]
    pub no_stream: bool,

    /// Emit tracing output to stderr (RUST_LOG still applies).
    #[arg(short, long)]
    pub verbose: bool,
}
