//! Global configuration types for Stepchain.
//!
//! [`GlobalConfig`] represents the top-level `config.toml` that controls the
//! model gateway endpoint, the model registry with its pricing table, and
//! retry backoff. The registry and rate table are loaded once at startup and
//! passed by reference into the engine; no mutation path exists afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration for Stepchain.
///
/// Loaded from `{data_dir}/config.toml`. All fields have defaults, so a
/// missing file yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Base URL of the OpenAI-compatible model gateway.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Environment variable holding the gateway API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum tokens requested per completion.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Per-call timeout for gateway requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Model entries merged over the built-in table.
    #[serde(default)]
    pub models: Vec<ModelPricing>,

    /// Backoff between transport-failure retries.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_gateway_url() -> String {
    "https://api.getunbound.ai/v1/chat/completions".to_string()
}

fn default_api_key_env() -> String {
    "STEPCHAIN_API_KEY".to_string()
}

fn default_max_output_tokens() -> u32 {
    4_000
}

fn default_request_timeout_secs() -> u64 {
    180
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            api_key_env: default_api_key_env(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            models: Vec::new(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Rates and limits for a single model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Model identifier as sent to the gateway.
    pub id: String,
    /// Cost per million prompt tokens in USD.
    pub prompt_cost_per_million: f64,
    /// Cost per million completion tokens in USD.
    pub completion_cost_per_million: f64,
    /// Context window limit, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_limit: Option<u32>,
}

/// Exponential backoff settings for transport-failure retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds. Doubles each subsequent attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on a single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Model registry
// ---------------------------------------------------------------------------

/// Read-only lookup table of known models and their rates.
///
/// Built once at startup from the default table plus `config.toml` overrides
/// (an override with an existing `id` replaces the default entry). A model id
/// absent from the registry is a configuration error wherever it is used.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    entries: HashMap<String, ModelPricing>,
}

/// Built-in rate table. Prices in USD per million tokens.
fn default_model_table() -> Vec<ModelPricing> {
    vec![
        ModelPricing {
            id: "kimi-k2p5".to_string(),
            prompt_cost_per_million: 0.15,
            completion_cost_per_million: 0.60,
            context_limit: Some(262_000),
        },
        ModelPricing {
            id: "kimi-k2-instruct-0905".to_string(),
            prompt_cost_per_million: 0.15,
            completion_cost_per_million: 0.60,
            context_limit: Some(256_000),
        },
    ]
}

impl ModelRegistry {
    /// Build the registry from the default table plus overrides.
    pub fn with_overrides(overrides: &[ModelPricing]) -> Self {
        let mut entries: HashMap<String, ModelPricing> = default_model_table()
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        for model in overrides {
            entries.insert(model.id.clone(), model.clone());
        }
        Self { entries }
    }

    /// Look up a model's pricing entry.
    pub fn get(&self, model_id: &str) -> Option<&ModelPricing> {
        self.entries.get(model_id)
    }

    /// Whether the registry knows this model.
    pub fn contains(&self, model_id: &str) -> bool {
        self.entries.contains_key(model_id)
    }

    /// All known model ids, sorted for stable display.
    pub fn model_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_overrides(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_config_defaults() {
        let config = GlobalConfig::default();
        assert!(config.gateway_url.contains("chat/completions"));
        assert_eq!(config.api_key_env, "STEPCHAIN_API_KEY");
        assert_eq!(config.max_output_tokens, 4_000);
        assert_eq!(config.backoff.base_delay_ms, 1_000);
        assert!(config.models.is_empty());
    }

    #[test]
    fn global_config_deserialize_empty_toml() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.request_timeout_secs, 180);
        assert_eq!(config.backoff.max_delay_ms, 30_000);
    }

    #[test]
    fn global_config_deserialize_with_values() {
        let toml_str = r#"
gateway_url = "http://localhost:9000/v1/chat/completions"
max_output_tokens = 2048

[backoff]
base_delay_ms = 500

[[models]]
id = "local-test"
prompt_cost_per_million = 0.0
completion_cost_per_million = 0.0
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.gateway_url, "http://localhost:9000/v1/chat/completions");
        assert_eq!(config.max_output_tokens, 2048);
        assert_eq!(config.backoff.base_delay_ms, 500);
        // Partial backoff table keeps the other default
        assert_eq!(config.backoff.max_delay_ms, 30_000);
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].id, "local-test");
    }

    #[test]
    fn registry_contains_default_models() {
        let registry = ModelRegistry::default();
        assert!(registry.contains("kimi-k2p5"));
        assert!(registry.contains("kimi-k2-instruct-0905"));
        assert!(!registry.contains("gpt-unknown"));
    }

    #[test]
    fn registry_override_replaces_default_entry() {
        let registry = ModelRegistry::with_overrides(&[ModelPricing {
            id: "kimi-k2p5".to_string(),
            prompt_cost_per_million: 1.0,
            completion_cost_per_million: 2.0,
            context_limit: None,
        }]);
        let entry = registry.get("kimi-k2p5").unwrap();
        assert!((entry.prompt_cost_per_million - 1.0).abs() < f64::EPSILON);
        assert!((entry.completion_cost_per_million - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn registry_override_adds_new_entry() {
        let registry = ModelRegistry::with_overrides(&[ModelPricing {
            id: "local-test".to_string(),
            prompt_cost_per_million: 0.0,
            completion_cost_per_million: 0.0,
            context_limit: Some(8_192),
        }]);
        assert!(registry.contains("local-test"));
        assert!(registry.contains("kimi-k2p5"));
    }

    #[test]
    fn registry_model_ids_sorted() {
        let registry = ModelRegistry::default();
        let ids = registry.model_ids();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }
}
