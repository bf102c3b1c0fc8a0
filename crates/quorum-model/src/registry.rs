// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Driver registry: static metadata for every supported model provider.
//!
//! This module is the single source of truth for which provider ids exist and
//! what their defaults are.  Construction logic lives in [`crate::from_config`].

/// Metadata describing a registered model driver.
#[derive(Debug, Clone)]
pub struct DriverMeta {
    /// Canonical provider id (the prefix in `provider/model`).
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// Environment variable holding the API key when `LLM_API_KEY` is unset.
    /// `None` for providers that need no key (local servers, mock).
    pub default_api_key_env: Option<&'static str>,
    /// Default base URL when `LLM_API_BASE` is unset.
    pub default_base_url: Option<&'static str>,
    /// Whether an API key is required to make requests.
    pub requires_api_key: bool,
}

/// Complete registry of supported drivers.
pub static DRIVERS: &[DriverMeta] = &[
    DriverMeta {
        id: "openai",
        name: "OpenAI",
        default_api_key_env: Some("OPENAI_API_KEY"),
        default_base_url: Some("https://api.openai.com/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "anthropic",
        name: "Anthropic",
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
        default_base_url: Some("https://api.anthropic.com"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "gemini",
        name: "Google Gemini",
        default_api_key_env: Some("GEMINI_API_KEY"),
        default_base_url: Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "mistral",
        name: "Mistral AI",
        default_api_key_env: Some("MISTRAL_API_KEY"),
        default_base_url: Some("https://api.mistral.ai/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "together",
        name: "Together AI",
        default_api_key_env: Some("TOGETHER_API_KEY"),
        default_base_url: Some("https://api.together.xyz/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "openrouter",
        name: "OpenRouter",
        default_api_key_env: Some("OPENROUTER_API_KEY"),
        default_base_url: Some("https://openrouter.ai/api/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "ollama",
        name: "Ollama",
        default_api_key_env: None,
        default_base_url: Some("http://localhost:11434/v1"),
        requires_api_key: false,
    },
    DriverMeta {
        id: "mock",
        name: "Mock",
        default_api_key_env: None,
        default_base_url: None,
        requires_api_key: false,
    },
];

/// Look up a driver by its id.  Returns `None` for unknown ids.
pub fn get_driver(id: &str) -> Option<&'static DriverMeta> {
    DRIVERS.iter().find(|d| d.id == id)
}

/// Returns all registered drivers in declaration order.
pub fn list_drivers() -> &'static [DriverMeta] {
    DRIVERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for d in DRIVERS {
            assert!(seen.insert(d.id), "duplicate driver id: {}", d.id);
        }
    }

    #[test]
    fn heuristic_targets_are_registered() {
        // Every provider reachable from model-id normalisation must exist here.
        for id in ["anthropic", "openai", "gemini", "mistral", "together"] {
            assert!(get_driver(id).is_some(), "missing driver: {id}");
        }
    }

    #[test]
    fn get_driver_returns_none_for_unknown() {
        assert!(get_driver("not-a-provider").is_none());
    }

    #[test]
    fn keyless_drivers_do_not_require_keys() {
        for d in DRIVERS.iter().filter(|d| d.default_api_key_env.is_none()) {
            assert!(!d.requires_api_key, "{} has no key env but requires one", d.id);
        }
    }
}
