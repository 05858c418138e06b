use crate::anthropic::AnthropicClient;
use crate::config::{AppConfig, ProviderKind};
use crate::error::{Error, Result};
use crate::logging;
use crate::openai::OpenAIClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// A chat-completion backend. The chat loop and the cognitive service only
/// ever talk to providers through this trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        system_prompt: Option<&str>,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String>;
}

/// Build the provider selected in the config. `model_override` comes from
/// the persona and wins over the config-level model.
pub fn provider_from_config(
    config: &AppConfig,
    model_override: Option<&str>,
) -> Result<Arc<dyn LlmProvider>> {
    let model = model_override
        .map(|m| m.to_string())
        .or_else(|| config.model.clone());

    logging::log_provider(None, &format!(
        "Using {} provider (model: {})",
        config.provider.as_str(),
        model.as_deref().unwrap_or("default")
    ));

    match config.provider {
        ProviderKind::Anthropic => {
            let key = config.anthropic_key.as_deref().ok_or_else(|| {
                Error::InvalidInput("Anthropic API key not set".to_string())
            })?;
            let mut client = AnthropicClient::new(key);
            if let Some(model) = model {
                client = client.with_model(&model);
            }
            Ok(Arc::new(client))
        }
        ProviderKind::OpenAI => {
            let key = config.openai_key.as_deref().ok_or_else(|| {
                Error::InvalidInput("OpenAI API key not set".to_string())
            })?;
            let mut client = OpenAIClient::new(key)?;
            if let Some(model) = model {
                client = client.with_model(&model);
            }
            Ok(Arc::new(client))
        }
    }
}
