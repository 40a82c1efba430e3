//! LLM provider implementations.
//!
//! - **[`DisabledLlm`]** refuses every prompt.
//! - **[`AnthropicLlm`]** calls the Anthropic Messages API. Requires `ANTHROPIC_API_KEY`.
//! - **[`OllamaLlm`]** calls a local Ollama instance's `/api/chat` endpoint.
//!
//! Prior turns are sent as alternating user/assistant messages ahead of the
//! final user message.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use scriptdocs_core::llm::{LlmProvider, Prompt};

use crate::config::LlmConfig;
use crate::error::ProviderError;
use crate::http;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Retries for one generation call; the router's timeout bounds the total.
const LLM_MAX_RETRIES: u32 = 2;

pub struct DisabledLlm;

#[async_trait]
impl LlmProvider for DisabledLlm {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn invoke(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled(
            "llm provider is disabled; set [llm] provider in config".to_string(),
        ))
    }
}

/// Chat messages for the prompt's history followed by its user turn.
fn chat_messages(prompt: &Prompt) -> Vec<Value> {
    let mut messages = Vec::with_capacity(prompt.history.len() * 2 + 1);
    for turn in &prompt.history {
        messages.push(json!({"role": "user", "content": turn.question}));
        messages.push(json!({"role": "assistant", "content": turn.answer}));
    }
    messages.push(json!({"role": "user", "content": prompt.user}));
    messages
}

// ============ Anthropic ============

pub struct AnthropicLlm {
    model: String,
    api_key: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for Anthropic provider"))?;
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());

        Ok(Self {
            model,
            api_key,
            base_url,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, prompt: &Prompt) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": prompt.system,
            "messages": chat_messages(prompt),
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicLlm {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let body = self.request_body(prompt);
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let json = http::post_json_with_retry("Anthropic", LLM_MAX_RETRIES, || {
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .json(&body)
        })
        .await?;

        parse_anthropic_response(&json)
    }
}

/// Concatenate the `text` blocks of a Messages API response.
fn parse_anthropic_response(json: &Value) -> Result<String, ProviderError> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ProviderError::Other("Invalid Anthropic response: missing content".into()))?;

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(ProviderError::Other(
            "Invalid Anthropic response: no text content".into(),
        ));
    }
    Ok(text)
}

// ============ Ollama ============

pub struct OllamaLlm {
    model: String,
    url: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OllamaLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            url,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, prompt: &Prompt) -> Value {
        let mut messages = vec![json!({"role": "system", "content": prompt.system})];
        messages.extend(chat_messages(prompt));
        json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaLlm {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let body = self.request_body(prompt);
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));

        let json = http::post_json_with_retry("Ollama", LLM_MAX_RETRIES, || {
            self.client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&body)
        })
        .await?;

        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Other("Invalid Ollama response: missing message".into()))
    }
}

/// Create the [`LlmProvider`] named by `config.provider`.
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLlm)),
        "anthropic" => Ok(Arc::new(AnthropicLlm::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaLlm::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
