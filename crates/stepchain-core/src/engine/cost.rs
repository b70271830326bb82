//! Token-to-USD accounting against the model registry.
//!
//! Pure lookups and arithmetic. The registry is immutable, injected at
//! startup; an unknown model id is a configuration error rather than a
//! fallback rate, so misconfigured steps fail loudly instead of billing
//! against a guess.

use stepchain_types::config::ModelRegistry;
use stepchain_types::llm::TokenUsage;

/// Errors from cost accounting.
#[derive(Debug, thiserror::Error)]
pub enum CostError {
    #[error("unknown model '{0}' in rate table")]
    UnknownModel(String),
}

/// Compute the cost of one model call in USD.
pub fn compute_cost(
    registry: &ModelRegistry,
    model: &str,
    usage: TokenUsage,
) -> Result<f64, CostError> {
    let entry = registry
        .get(model)
        .ok_or_else(|| CostError::UnknownModel(model.to_string()))?;

    let prompt_cost =
        (usage.prompt_tokens as f64 / 1_000_000.0) * entry.prompt_cost_per_million;
    let completion_cost =
        (usage.completion_tokens as f64 / 1_000_000.0) * entry.completion_cost_per_million;
    Ok(prompt_cost + completion_cost)
}

/// Format a cost for display.
///
/// Sub-cent values keep more precision so small runs don't render as $0.00.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("${cost:.6}")
    } else {
        format!("${cost:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepchain_types::config::ModelPricing;

    #[test]
    fn known_model_cost() {
        let registry = ModelRegistry::default();
        // kimi-k2p5: $0.15 prompt, $0.60 completion per million
        let cost = compute_cost(&registry, "kimi-k2p5", TokenUsage::new(1_000_000, 100_000))
            .unwrap();
        // $0.15 + $0.06 = $0.21
        assert!((cost - 0.21).abs() < 1e-9, "expected ~$0.21, got ${cost}");
    }

    #[test]
    fn unknown_model_is_configuration_error() {
        let registry = ModelRegistry::default();
        let err = compute_cost(&registry, "gpt-unknown", TokenUsage::new(100, 100)).unwrap_err();
        assert!(matches!(err, CostError::UnknownModel(_)));
        assert!(err.to_string().contains("gpt-unknown"));
    }

    #[test]
    fn zero_usage_is_free() {
        let registry = ModelRegistry::default();
        let cost = compute_cost(&registry, "kimi-k2p5", TokenUsage::default()).unwrap();
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn override_rate_is_used() {
        let registry = ModelRegistry::with_overrides(&[ModelPricing {
            id: "pricey".to_string(),
            prompt_cost_per_million: 10.0,
            completion_cost_per_million: 30.0,
            context_limit: None,
        }]);
        let cost = compute_cost(&registry, "pricey", TokenUsage::new(500_000, 100_000)).unwrap();
        // $5.00 + $3.00 = $8.00
        assert!((cost - 8.0).abs() < 1e-9);
    }

    #[test]
    fn format_cost_small_amounts_keep_precision() {
        assert_eq!(format_cost(0.000123), "$0.000123");
        assert_eq!(format_cost(0.0), "$0.000000");
    }

    #[test]
    fn format_cost_normal_amounts_two_decimal_places() {
        assert_eq!(format_cost(0.21), "$0.21");
        assert_eq!(format_cost(12.5), "$12.50");
    }
}
