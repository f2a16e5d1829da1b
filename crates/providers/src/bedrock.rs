//! Amazon Bedrock Converse-stream provider.
//!
//! Sends the conversation to `POST /model/{modelId}/converse-stream`,
//! authenticated with a Bedrock API key as a bearer token. The response body
//! is binary event-stream framing; each frame's `:event-type` header names a
//! Converse event whose JSON payload is translated by [`translate`].

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use toolbox_core::provider::{ConverseRequest, EventStream, ModelProvider, StopReason, StreamEvent};
use toolbox_core::{ProviderError, TokenUsage};
use tracing::{debug, trace, warn};

use crate::check_status;
use crate::event_stream::{Frame, FrameDecoder};

/// Bedrock Converse-stream provider.
pub struct BedrockProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl BedrockProvider {
    /// Create a provider for the runtime endpoint of `region`.
    pub fn new(region: &str, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "bedrock".into(),
            base_url: format!("https://bedrock-runtime.{region}.amazonaws.com"),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create with a custom base URL (e.g., for testing or a VPC endpoint).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model_id: &str) -> Result<reqwest::Url, ProviderError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ProviderError::NotConfigured(format!("invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::NotConfigured("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["model", model_id, "converse-stream"]);
        Ok(url)
    }

    /// The Converse request body. History is already in wire shape.
    fn request_body(request: &ConverseRequest) -> Value {
        let mut body = json!({
            "messages": request.messages,
            "system": request.system,
            "inferenceConfig": request.inference_config,
        });
        if !request.additional_model_request_fields.is_null() {
            body["additionalModelRequestFields"] = request.additional_model_request_fields.clone();
        }
        if let Some(config) = &request.tool_config {
            body["toolConfig"] = config.to_converse_json();
        }
        body
    }
}

#[async_trait]
impl ModelProvider for BedrockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, request: ConverseRequest) -> Result<EventStream, ProviderError> {
        let url = self.endpoint(&request.model_id)?;
        let body = Self::request_body(&request);

        debug!(
            provider = "bedrock",
            model = %request.model_id,
            messages = request.messages.len(),
            "Opening converse stream"
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "application/vnd.amazon.eventstream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = check_status("bedrock", response).await?;

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = FrameDecoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };
                decoder.push(&bytes);

                loop {
                    let frame = match decoder.next_frame() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    };
                    match frame_events(&frame) {
                        Ok(events) => {
                            for event in events {
                                if tx.send(Ok(event)).await.is_err() {
                                    trace!("Converse stream consumer dropped");
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            if decoder.pending() > 0 {
                warn!(bytes = decoder.pending(), "Converse stream ended mid-frame");
            }
        });

        Ok(EventStream::new(rx))
    }
}

/// Turn one frame into normalized events, or an error for exception frames.
fn frame_events(frame: &Frame) -> Result<Vec<StreamEvent>, ProviderError> {
    let payload: Value = if frame.payload.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&frame.payload)
            .map_err(|e| ProviderError::Protocol(format!("invalid event payload: {e}")))?
    };

    match frame.message_type() {
        "exception" | "error" => {
            let kind = frame
                .header(":exception-type")
                .or_else(|| frame.header(":error-code"))
                .unwrap_or("unknown");
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| frame.header(":error-message"))
                .unwrap_or("no message")
                .to_string();
            Err(exception_error(kind, message))
        }
        _ => Ok(translate(frame.event_type().unwrap_or_default(), &payload)),
    }
}

fn exception_error(kind: &str, message: String) -> ProviderError {
    match kind {
        "throttlingException" | "serviceUnavailableException" => ProviderError::RateLimited(message),
        "accessDeniedException" => ProviderError::AuthenticationFailed(message),
        "modelStreamErrorException" | "internalServerException" => {
            ProviderError::StreamInterrupted(format!("{kind}: {message}"))
        }
        _ => ProviderError::ApiError {
            status_code: 400,
            message: format!("{kind}: {message}"),
        },
    }
}

/// Translate one Converse stream event into normalized events.
///
/// `messageStart` and `contentBlockStop` carry nothing the loop needs and
/// yield no events. Anything unrecognized is forwarded as `Unknown`.
pub fn translate(event_type: &str, payload: &Value) -> Vec<StreamEvent> {
    match event_type {
        "messageStart" | "contentBlockStop" => {
            trace!(event = event_type, "Skipping structural converse event");
            Vec::new()
        }
        "contentBlockStart" => match payload.pointer("/start/toolUse") {
            Some(tool) => vec![StreamEvent::ToolUseStart {
                id: tool["toolUseId"].as_str().unwrap_or_default().to_string(),
                name: tool["name"].as_str().unwrap_or_default().to_string(),
            }],
            None => vec![StreamEvent::Unknown(event_type.to_string())],
        },
        "contentBlockDelta" => {
            let delta = &payload["delta"];
            if let Some(text) = delta.get("text").and_then(Value::as_str) {
                vec![StreamEvent::TextDelta(text.to_string())]
            } else if let Some(input) = delta.pointer("/toolUse/input").and_then(Value::as_str) {
                vec![StreamEvent::ToolUseDelta(input.to_string())]
            } else {
                vec![StreamEvent::Unknown(format!("{event_type}.delta"))]
            }
        }
        "messageStop" => {
            let reason = payload["stopReason"].as_str().unwrap_or("end_turn");
            vec![StreamEvent::TurnEnd(StopReason::parse(reason))]
        }
        "metadata" => match payload.get("usage") {
            Some(usage) => match serde_json::from_value::<TokenUsage>(usage.clone()) {
                Ok(usage) => vec![StreamEvent::Usage(usage)],
                Err(e) => {
                    warn!(error = %e, "Unreadable converse usage metadata");
                    vec![StreamEvent::Unknown(event_type.to_string())]
                }
            },
            None => Vec::new(),
        },
        other => vec![StreamEvent::Unknown(other.to_string())],
    }
}
