// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model identifier canonicalisation.
//!
//! User-facing model ids may or may not carry a provider prefix.  Every id is
//! canonicalised to `provider/model` before driver selection: an explicit
//! prefix wins, otherwise the provider is inferred from well-known substrings,
//! and anything unrecognised defaults to `openai/`.

/// A canonicalised `provider/model` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelId {
    pub provider: String,
    pub model: String,
}

impl ModelId {
    /// Render back to the canonical `provider/model` string.
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Substring → provider heuristics, consulted left-to-right when no explicit
/// prefix is present.
const HEURISTICS: &[(&str, &str)] = &[
    ("claude", "anthropic"),
    ("gpt", "openai"),
    ("o1", "openai"),
    ("o3", "openai"),
    ("gemini", "gemini"),
    ("mistral", "mistral"),
    ("llama", "together"),
];

/// Canonicalise a raw model id to `provider/model`.
pub fn normalize(raw: &str) -> ModelId {
    let raw = raw.trim();

    // Explicit prefix wins: the first `/` separates provider from model.
    if let Some((provider, model)) = raw.split_once('/') {
        if !provider.is_empty() && !model.is_empty() {
            return ModelId {
                provider: provider.to_string(),
                model: model.to_string(),
            };
        }
    }

    let lower = raw.to_lowercase();
    for (needle, provider) in HEURISTICS {
        if lower.contains(needle) {
            return ModelId {
                provider: (*provider).to_string(),
                model: raw.to_string(),
            };
        }
    }

    ModelId {
        provider: "openai".to_string(),
        model: raw.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
