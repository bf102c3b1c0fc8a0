// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Token accounting for context-budget decisions.
//!
//! No byte-pair-encoding vocabulary ships with this crate, so counting uses
//! the documented fallback: `ceil(utf8_chars / 2.5)` per text field, plus a
//! fixed per-message overhead that approximates role framing.  The estimate
//! deliberately errs high for code-heavy content; the compactor treats the
//! budget as a soft ceiling, so overestimating is the safe direction.

use crate::{Message, MessageContent};

/// Fixed per-message token overhead approximating role framing.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Approximate token count of a text fragment: `ceil(chars / 2.5)`.
pub fn text_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    (chars * 2 + 4) / 5
}

/// Approximate token count of one message, including tool-call argument
/// serialization and any attached thinking text.
pub fn message_tokens(msg: &Message) -> usize {
    let content = match &msg.content {
        MessageContent::Text(t) => text_tokens(t),
        MessageContent::ToolCall { function, .. } => {
            text_tokens(&function.name) + text_tokens(&function.arguments)
        }
        MessageContent::ToolResult { content, .. } => text_tokens(content),
    };
    let thinking = msg.thinking.as_deref().map(text_tokens).unwrap_or(0);
    MESSAGE_OVERHEAD + content + thinking
}

/// Approximate token count of a full message list.  Pure; no I/O.
pub fn count(messages: &[Message]) -> usize {
    messages.iter().map(message_tokens).sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
