//! Chat model clients
//!
//! Groq and OpenAI both speak the OpenAI chat-completions protocol, so one
//! client covers them; only the base URL and key differ.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::http::{
    build_client, is_transient_send_error, is_transient_status, join_url, with_retry,
    RequestError, RequestResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat transcript or prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Per-call generation options
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

impl From<&LlmConfig> for CompletionOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Trait for chat completion
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate the assistant reply to `messages`
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Client for OpenAI-compatible chat-completions endpoints (Groq, OpenAI)
pub struct OpenAICompatibleChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

impl OpenAICompatibleChat {
    pub fn new(config: &LlmConfig, default_base: &str) -> Result<Self> {
        let api_key = config.resolve_api_key().ok_or_else(|| AppError::Configuration {
            message: format!(
                "No API key for chat provider '{}' (set llm.api_key or the provider's environment variable)",
                config.provider
            ),
        })?;
        let base = config.api_base.as_deref().unwrap_or(default_base);

        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            endpoint: join_url(base, "chat/completions"),
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn make_request(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> RequestResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let transient = is_transient_send_error(&e);
                let error = AppError::LlmError {
                    message: format!("Request failed: {}", e),
                };
                RequestError { error, transient }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = AppError::LlmError {
                message: format!("API error {}: {}", status, body),
            };
            return Err(RequestError {
                error,
                transient: is_transient_status(status),
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| AppError::LlmError {
            message: format!("Failed to parse response: {}", e),
        })?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from chat model".to_string(),
            })?;
        Ok(content)
    }
}

#[async_trait]
impl ChatModel for OpenAICompatibleChat {
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        with_retry(self.max_retries, "chat", || self.make_request(messages, options)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted chat model for development and tests.
///
/// Returns queued responses in order; once the queue is empty it echoes the
/// last user message. Every prompt it receives is recorded.
#[derive(Default)]
pub struct MockChatModel {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, messages: &[ChatMessage], _options: &CompletionOptions) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        let scripted = self
            .responses
            .lock()
            .map_err(|_| AppError::Internal {
                message: "mock chat model lock poisoned".to_string(),
            })?
            .pop_front();

        Ok(scripted.unwrap_or_else(|| {
            let question = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            format!("[mock] {}", question)
        }))
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

/// Create a chat model based on configuration
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    let model: Arc<dyn ChatModel> = match config.provider.as_str() {
        "groq" => Arc::new(OpenAICompatibleChat::new(config, GROQ_API_BASE)?),
        "openai" => Arc::new(OpenAICompatibleChat::new(config, OPENAI_API_BASE)?),
        "mock" => Arc::new(MockChatModel::new()),
        other => {
            return Err(AppError::Configuration {
                message: format!("Unknown chat provider: {}", other),
            })
        }
    };

    tracing::info!(
        provider = %config.provider,
        model = %model.model_name(),
        temperature = config.temperature,
        "Chat model initialized"
    );

    Ok(model)
}
