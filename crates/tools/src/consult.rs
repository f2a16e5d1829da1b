//! `consult_agent`: a one-shot, tool-free question to the model.

use std::sync::Arc;

use serde_json::Value;
use toolbox_core::error::ToolError;
use toolbox_core::message::Message;
use toolbox_core::provider::{ConverseRequest, InferenceConfig, ModelProvider, StreamEvent, SystemPrompt};
use toolbox_core::usage::TokenUsage;
use tracing::debug;

const CONSULTANT_PROMPT: &str = "You are a general-purpose expert assistant consulted by another AI agent. \
Answer the question directly and completely. You cannot ask follow-up questions, so state any \
assumptions you make.";

/// The consulted model's answer and what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Consultation {
    pub answer: String,
    pub usage: TokenUsage,
}

/// Everything needed to ask the model a side question.
#[derive(Clone)]
pub struct Consultant {
    provider: Arc<dyn ModelProvider>,
    model_id: String,
    inference: InferenceConfig,
}

impl Consultant {
    pub fn new(provider: Arc<dyn ModelProvider>, model_id: impl Into<String>, inference: InferenceConfig) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            inference,
        }
    }

    /// Ask `query` and drain the whole stream. The answer may be empty.
    pub async fn ask(&self, query: &str) -> Result<Consultation, ToolError> {
        const TOOL: &str = "consult_agent";

        let request = ConverseRequest {
            model_id: self.model_id.clone(),
            messages: vec![Message::user(query)],
            system: vec![SystemPrompt::new(CONSULTANT_PROMPT)],
            inference_config: self.inference.clone(),
            additional_model_request_fields: Value::Null,
            tool_config: None,
        };

        debug!(provider = %self.provider.name(), "Consulting sub-agent");
        let mut stream = self.provider.open(request).await.map_err(|e| ToolError::failed(TOOL, e))?;

        let mut answer = String::new();
        let mut usage = TokenUsage::default();
        // Usage may follow the turn end.
        while let Some(event) = stream.next().await {
            match event.map_err(|e| ToolError::failed(TOOL, e))? {
                StreamEvent::TextDelta(text) => answer.push_str(&text),
                StreamEvent::Usage(u) => usage.add(&u),
                _ => {}
            }
        }

        debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Sub-agent answered"
        );
        Ok(Consultation { answer, usage })
    }
}

impl std::fmt::Debug for Consultant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consultant")
            .field("provider", &self.provider.name())
            .field("model_id", &self.model_id)
            .finish()
    }
}
