//! Provider selection from configuration.

use std::sync::Arc;

use toolbox_config::{AppConfig, ProviderKind};
use toolbox_core::{ModelProvider, ProviderError};
use tracing::info;

use crate::anthropic::AnthropicProvider;
use crate::bedrock::BedrockProvider;

/// Build the configured provider. A missing API key is a configuration error.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn ModelProvider>, ProviderError> {
    let provider = &config.provider;
    let api_key = provider.api_key.clone().ok_or_else(|| {
        let hint = match provider.kind {
            ProviderKind::Bedrock => "AWS_BEARER_TOKEN_BEDROCK",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        };
        ProviderError::NotConfigured(format!(
            "no API key for {} (set provider.api_key, TOOLBOX_API_KEY or {hint})",
            provider.kind
        ))
    })?;

    info!(provider = %provider.kind, model = %provider.model_id, "Building model provider");

    Ok(match provider.kind {
        ProviderKind::Bedrock => {
            let mut p = BedrockProvider::new(&provider.region, api_key)?;
            if let Some(url) = &provider.base_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
        ProviderKind::Anthropic => {
            let mut p = AnthropicProvider::new(api_key)?;
            if let Some(url) = &provider.base_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
    })
}
