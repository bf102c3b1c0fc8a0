// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Static model catalog: context windows and output ceilings for well-known
//! models.  This is the lookup table behind `max_tokens` capping and default
//! context budgets; unknown models fall back to conservative per-provider
//! defaults.

use tracing::warn;

/// Metadata for one known model.
#[derive(Debug, Clone)]
pub struct ModelCatalogEntry {
    /// Model id prefix; matched with `starts_with` so dated releases
    /// (`claude-3-5-sonnet-20241022`) resolve to their family entry.
    pub id: &'static str,
    pub provider: &'static str,
    pub context_window: u32,
    pub max_output_tokens: u32,
}

pub static CATALOG: &[ModelCatalogEntry] = &[
    // ── Anthropic ─────────────────────────────────────────────────────────────
    ModelCatalogEntry { id: "claude-3-5-haiku", provider: "anthropic", context_window: 200_000, max_output_tokens: 8_192 },
    ModelCatalogEntry { id: "claude-3-5-sonnet", provider: "anthropic", context_window: 200_000, max_output_tokens: 8_192 },
    ModelCatalogEntry { id: "claude-3-7-sonnet", provider: "anthropic", context_window: 200_000, max_output_tokens: 64_000 },
    ModelCatalogEntry { id: "claude-sonnet-4", provider: "anthropic", context_window: 200_000, max_output_tokens: 64_000 },
    ModelCatalogEntry { id: "claude-opus-4", provider: "anthropic", context_window: 200_000, max_output_tokens: 32_000 },
    // ── OpenAI ────────────────────────────────────────────────────────────────
    ModelCatalogEntry { id: "gpt-4o-mini", provider: "openai", context_window: 128_000, max_output_tokens: 16_384 },
    ModelCatalogEntry { id: "gpt-4o", provider: "openai", context_window: 128_000, max_output_tokens: 16_384 },
    ModelCatalogEntry { id: "gpt-4.1", provider: "openai", context_window: 1_047_576, max_output_tokens: 32_768 },
    ModelCatalogEntry { id: "o1", provider: "openai", context_window: 200_000, max_output_tokens: 100_000 },
    ModelCatalogEntry { id: "o3", provider: "openai", context_window: 200_000, max_output_tokens: 100_000 },
    // ── Google ────────────────────────────────────────────────────────────────
    ModelCatalogEntry { id: "gemini-2.0-flash", provider: "gemini", context_window: 1_048_576, max_output_tokens: 8_192 },
    ModelCatalogEntry { id: "gemini-2.5-pro", provider: "gemini", context_window: 1_048_576, max_output_tokens: 65_536 },
    // ── Mistral ───────────────────────────────────────────────────────────────
    ModelCatalogEntry { id: "mistral-large", provider: "mistral", context_window: 131_072, max_output_tokens: 8_192 },
    ModelCatalogEntry { id: "codestral", provider: "mistral", context_window: 262_144, max_output_tokens: 8_192 },
    // ── Together-hosted open models ───────────────────────────────────────────
    ModelCatalogEntry { id: "llama-3.1-70b", provider: "together", context_window: 131_072, max_output_tokens: 8_192 },
    ModelCatalogEntry { id: "llama-3.3-70b", provider: "together", context_window: 131_072, max_output_tokens: 8_192 },
];

/// Output ceiling used when a model is not in the catalog.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4_096;

/// Context window used when a model is not in the catalog.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;

/// Look up a catalog entry by provider and model-id prefix.
pub fn lookup(provider: &str, model: &str) -> Option<&'static ModelCatalogEntry> {
    // Model ids sometimes carry a path prefix from gateways
    // (`meta-llama/Llama-3.1-70B`); match case-insensitively on the last
    // path segment as well as the full id.
    let lower = model.to_lowercase();
    let tail = lower.rsplit('/').next().unwrap_or(&lower);
    CATALOG
        .iter()
        .filter(|e| e.provider == provider)
        .find(|e| lower.starts_with(e.id) || tail.starts_with(e.id))
}

/// Cap a requested output budget to the model's known ceiling.
///
/// The cap is logged once per call so an oversized configuration is visible
/// without flooding the logs.
pub fn cap_max_tokens(provider: &str, model: &str, requested: u32) -> u32 {
    let ceiling = lookup(provider, model)
        .map(|e| e.max_output_tokens)
        .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);
    if requested > ceiling {
        warn!(
            provider,
            model, requested, ceiling, "max_tokens exceeds provider ceiling; capping"
        );
        ceiling
    } else {
        requested
    }
}

/// Context window for a model, falling back to the conservative default.
pub fn context_window(provider: &str, model: &str) -> u32 {
    lookup(provider, model)
        .map(|e| e.context_window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
