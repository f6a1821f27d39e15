//! Chat models used to answer questions over indexed documents.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::check_status;
use crate::config::{ChatConfig, ChatProviderKind};
use crate::error::{ClientError, ServiceError, ServiceResult};

/// One message of a chat exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Non-streaming completion; returns the assistant's reply
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ClientError>;
}

/// Build the chat client when a base URL is configured
pub fn create_chat_model(config: &ChatConfig) -> ServiceResult<Option<Arc<dyn ChatModel>>> {
    let Some(base_url) = config.base_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    else {
        info!("Chat model is not configured; question answering is disabled");
        return Ok(None);
    };

    info!(provider = ?config.provider, model = %config.model, url = %base_url, "Using chat model");
    let client = Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build HTTP client: {}", e),
        })?;

    let model: Arc<dyn ChatModel> = match config.provider {
        ChatProviderKind::Ollama => Arc::new(OllamaChat {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        }),
        ChatProviderKind::OpenAi => Arc::new(OpenAiChat {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }),
    };
    Ok(Some(model))
}

// ==================== Ollama ====================

/// Ollama `/api/chat` without streaming
pub struct OllamaChat {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ClientError> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&OllamaChatRequest {
                model: &self.model,
                messages,
                stream: false,
                options: OllamaOptions {
                    temperature: self.temperature,
                },
            })
            .send()
            .await
            .map_err(|e| ClientError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let body: OllamaChatResponse = check_status(&url, response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse {
                message: e.to_string(),
            })?;

        Ok(body.message.content)
    }
}

// ==================== OpenAI-compatible ====================

/// OpenAI-compatible `/chat/completions`
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

/// First choice's content; a reply without choices is an empty answer
fn first_choice(response: CompletionResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .unwrap_or_default()
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut request = self.client.post(&url).json(&CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| ClientError::Connection {
            url: url.clone(),
            source: e,
        })?;

        let body: CompletionResponse = check_status(&url, response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse {
                message: e.to_string(),
            })?;

        Ok(first_choice(body))
    }
}
