// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod run_log;
mod trace;

pub use run_log::{RunLogExporter, RunLogRecord, RunLogType, RunLogger};
pub use trace::{
    FileTraceSink, MemoryTraceSink, TraceEvent, TraceEventType, TraceLogger, TraceSink,
};
