//! OpenAiCompatInvoker -- concrete [`ModelInvoker`] implementation for an
//! OpenAI-compatible chat completions gateway.
//!
//! Sends a single-message chat request with bearer authentication and maps
//! HTTP failure modes onto the engine's error taxonomy: timeouts, connection
//! failures, 429s and 5xx responses are transport errors (retryable with
//! backoff); auth and client errors are not.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use stepchain_core::llm::ModelInvoker;
use stepchain_observe::genai_attrs as genai;
use stepchain_types::llm::{LlmError, ModelRequest, ModelResponse, TokenUsage};

/// Model gateway client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiCompatInvoker {
    client: reqwest::Client,
    api_key: SecretString,
    url: String,
}

impl OpenAiCompatInvoker {
    /// Create a new gateway client.
    ///
    /// # Arguments
    ///
    /// * `url` - Full chat-completions endpoint URL
    /// * `api_key` - Gateway API key wrapped in SecretString
    /// * `timeout` - Per-request timeout; a timed-out call surfaces as a
    ///   transport error
    pub fn new(url: String, api_key: SecretString, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            url,
        })
    }

    async fn send(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        let payload = ChatRequest {
            model: &request.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response).await);
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        let usage = body
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(ModelResponse { text, usage })
    }
}

impl ModelInvoker for OpenAiCompatInvoker {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let span = tracing::info_span!(
            "chat",
            { genai::GEN_AI_OPERATION_NAME } = genai::OP_CHAT,
            { genai::GEN_AI_PROVIDER_NAME } = genai::PROVIDER_GATEWAY,
            { genai::GEN_AI_REQUEST_MODEL } = request.model.as_str(),
            { genai::GEN_AI_REQUEST_MAX_TOKENS } = request.max_tokens,
            { genai::GEN_AI_REQUEST_TEMPERATURE } = request.temperature,
            { genai::GEN_AI_USAGE_INPUT_TOKENS } = tracing::field::Empty,
            { genai::GEN_AI_USAGE_OUTPUT_TOKENS } = tracing::field::Empty,
        );

        async {
            let result = self.send(request).await;
            if let Ok(response) = &result {
                let span = tracing::Span::current();
                span.record(
                    genai::GEN_AI_USAGE_INPUT_TOKENS,
                    response.usage.prompt_tokens,
                );
                span.record(
                    genai::GEN_AI_USAGE_OUTPUT_TOKENS,
                    response.usage.completion_tokens,
                );
            }
            result
        }
        .instrument(span)
        .await
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

fn classify_reqwest_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Network(err.to_string())
    }
}

async fn classify_status(status: reqwest::StatusCode, response: reqwest::Response) -> LlmError {
    let retry_after_ms = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| secs * 1_000);

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > 200 {
        body.truncate(200);
    }

    match status.as_u16() {
        429 => LlmError::RateLimited { retry_after_ms },
        401 | 403 => LlmError::Authentication,
        code => LlmError::Api {
            status: code,
            message: body,
        },
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
