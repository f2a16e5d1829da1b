//! Streaming model provider adapters for Toolbox.
//!
//! All providers implement `toolbox_core::ModelProvider`: they open one
//! streaming call and translate the provider's wire events into normalized
//! `StreamEvent`s. [`build_from_config`] selects the adapter from configuration.

pub mod anthropic;
pub mod bedrock;
pub mod event_stream;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use bedrock::BedrockProvider;
pub use router::build_from_config;

use toolbox_core::ProviderError;
use tracing::warn;

/// Map a non-success HTTP response to a typed error, keeping the provider's message.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    warn!(provider, status, message = %message, "Provider rejected request");

    Err(match status {
        429 => ProviderError::RateLimited(message),
        401 | 403 => ProviderError::AuthenticationFailed(message),
        _ => ProviderError::ApiError {
            status_code: status,
            message,
        },
    })
}

/// Pull a human message out of a JSON error body (`{"message": ..}` or
/// `{"error": {"message": ..}}`), falling back to the raw body.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    value
        .get("message")
        .or_else(|| value.get("Message"))
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}
