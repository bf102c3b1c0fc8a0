// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod assemble;
pub mod catalog;
pub mod normalize;
pub mod registry;
pub mod retry;
pub mod tokens;
mod anthropic;
mod mock;
mod openai_compat;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use mock::{FailingMockProvider, MockProvider, ScriptedMockProvider};
pub use normalize::{normalize, ModelId};
pub use openai_compat::OpenAICompatProvider;
pub use provider::{ModelProvider, ResponseStream};
pub use registry::{get_driver, list_drivers, DriverMeta};
pub use types::*;

use anyhow::bail;
use quorum_config::ModelConfig;

/// Construct a shared [`ModelProvider`] from configuration.
///
/// The raw model id is canonicalised to `provider/model` first; the provider
/// half selects the driver.  The API key falls back to the driver's default
/// environment variable when `LLM_API_KEY` is unset.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<std::sync::Arc<dyn ModelProvider>> {
    let id = normalize(&cfg.model);
    let Some(driver) = get_driver(&id.provider) else {
        bail!(
            "unknown model provider {:?} (from model id {:?})",
            id.provider,
            cfg.model
        );
    };

    let api_key = cfg.api_key.clone().or_else(|| {
        driver
            .default_api_key_env
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.is_empty())
    });
    if driver.requires_api_key && api_key.is_none() && cfg.base_url.is_none() {
        bail!(
            "provider {:?} requires an API key; set LLM_API_KEY or {}",
            driver.id,
            driver.default_api_key_env.unwrap_or("the provider key env")
        );
    }

    let provider: std::sync::Arc<dyn ModelProvider> = match id.provider.as_str() {
        "anthropic" => std::sync::Arc::new(AnthropicProvider::new(
            id.model.clone(),
            api_key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
        )),
        "mock" => std::sync::Arc::new(MockProvider),
        other => {
            let base_url = cfg
                .base_url
                .clone()
                .or_else(|| driver.default_base_url.map(str::to_string));
            let Some(base_url) = base_url else {
                bail!("provider {other:?} requires LLM_API_BASE");
            };
            std::sync::Arc::new(OpenAICompatProvider::new(
                id.provider.clone(),
                id.model.clone(),
                api_key,
                &base_url,
                cfg.max_tokens,
                cfg.temperature,
            ))
        }
    };
    Ok(provider)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
