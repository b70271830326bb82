//! ModelInvoker trait definition.
//!
//! This is the boundary to the model gateway: given a prompt and a model
//! identifier, return text plus token counts, or fail with a transport or
//! configuration error. The engine never talks HTTP directly.

use stepchain_types::llm::{LlmError, ModelRequest, ModelResponse};

/// Trait for model gateway backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). The concrete
/// implementation lives in stepchain-infra (`OpenAiCompatInvoker`); tests use
/// scripted mocks.
///
/// Timeouts are the implementation's responsibility; the engine treats a
/// timeout like any other transport failure.
pub trait ModelInvoker: Send + Sync {
    /// Send a completion request and receive the full response.
    fn invoke(
        &self,
        request: &ModelRequest,
    ) -> impl std::future::Future<Output = Result<ModelResponse, LlmError>> + Send;
}
