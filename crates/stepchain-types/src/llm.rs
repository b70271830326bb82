//! Model request/response types for Stepchain.
//!
//! These shapes model the boundary with the model gateway: a prompt goes out,
//! text plus token counts come back, or the call fails with an [`LlmError`].

use serde::{Deserialize, Serialize};

/// Request to the model gateway for a single completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Model identifier.
    pub model: String,
    /// Fully assembled user prompt.
    pub prompt: String,
    /// Optional system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Maximum tokens in the response.
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ModelRequest {
    /// A plain user-prompt request with default sampling.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            max_tokens,
            temperature: None,
        }
    }

    /// Override the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Response from the model gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Raw response text.
    pub text: String,
    /// Token accounting for this call.
    pub usage: TokenUsage,
}

/// Token usage for one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Prompt plus completion tokens.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Errors from model gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The request did not complete within the client timeout.
    #[error("request timed out")]
    Timeout,

    /// The gateway rejected the request due to rate limiting.
    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    /// The gateway returned a non-success HTTP status.
    #[error("gateway error {status}: {message}")]
    Api { status: u16, message: String },

    /// The request never reached the gateway.
    #[error("network error: {0}")]
    Network(String),

    /// The gateway responded with a body the client could not interpret.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),

    /// Authentication with the gateway failed.
    #[error("authentication failed")]
    Authentication,
}

impl LlmError {
    /// Whether this failure is transient and worth retrying with backoff.
    ///
    /// Timeouts, rate limits, connection failures, and 5xx responses are
    /// transport errors; everything else is treated as a static
    /// misconfiguration that retrying cannot fix.
    pub fn is_transport(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::RateLimited { .. } | LlmError::Network(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::InvalidResponse(_) | LlmError::Authentication => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_total() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total(), 150);
        assert_eq!(TokenUsage::default().total(), 0);
    }

    #[test]
    fn request_builder_sets_temperature() {
        let req = ModelRequest::new("kimi-k2p5", "hello", 4000).with_temperature(0.1);
        assert_eq!(req.model, "kimi-k2p5");
        assert_eq!(req.max_tokens, 4000);
        assert_eq!(req.temperature, Some(0.1));
        assert!(req.system.is_none());
    }

    #[test]
    fn transport_classification() {
        assert!(LlmError::Timeout.is_transport());
        assert!(
            LlmError::RateLimited {
                retry_after_ms: Some(500)
            }
            .is_transport()
        );
        assert!(LlmError::Network("connection refused".to_string()).is_transport());
        assert!(
            LlmError::Api {
                status: 503,
                message: "overloaded".to_string()
            }
            .is_transport()
        );

        assert!(
            !LlmError::Api {
                status: 400,
                message: "bad request".to_string()
            }
            .is_transport()
        );
        assert!(!LlmError::Authentication.is_transport());
        assert!(!LlmError::InvalidResponse("no choices".to_string()).is_transport());
    }

    #[test]
    fn llm_error_display() {
        let err = LlmError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("bad gateway"));
    }

    #[test]
    fn model_response_json_roundtrip() {
        let resp = ModelResponse {
            text: "Result: 42".to_string(),
            usage: TokenUsage::new(10, 5),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: ModelResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.text, "Result: 42");
        assert_eq!(parsed.usage.total(), 15);
    }
}
