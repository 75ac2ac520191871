use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::errors::LlmError;

// LLM Provider enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    OpenRouter,
    Anthropic,
    Gemini,
}

impl LlmProvider {
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::OpenRouter => "openrouter",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Gemini => "gemini",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => OPENAI_API_URL,
            LlmProvider::OpenRouter => OPENROUTER_API_URL,
            LlmProvider::Anthropic => ANTHROPIC_API_URL,
            LlmProvider::Gemini => GEMINI_API_URL,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => DEFAULT_OPENAI_MODEL,
            LlmProvider::OpenRouter => DEFAULT_OPENROUTER_MODEL,
            LlmProvider::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            LlmProvider::Gemini => DEFAULT_GEMINI_MODEL,
        }
    }

    /// Provider-specific environment variable holding the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Whether the provider honours a structured-output (JSON mode) hint
    pub fn supports_json_mode(&self) -> bool {
        !matches!(self, LlmProvider::Anthropic)
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            "anthropic" => Ok(LlmProvider::Anthropic),
            "gemini" => Ok(LlmProvider::Gemini),
            other => Err(format!("unknown LLM provider '{}'", other)),
        }
    }
}

// OpenAI-compatible chat completions (OpenAI, OpenRouter)
const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_OPENROUTER_MODEL: &str = "google/gemini-2.5-flash";

// Gemini API configuration
const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

// Anthropic API configuration
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A role-tagged chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// One chat completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    /// Ask the provider for structured JSON output when it supports it
    pub json_mode: bool,
}

/// Chat completion collaborator: messages in, raw text out
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

// OpenAI-compatible response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

// Gemini response
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

// Anthropic response
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
    #[serde(rename = "type")]
    content_type: String,
}

/// reqwest-backed client for the configured provider
pub struct HttpLlmClient {
    client: Client,
    config: LlmConfig,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport {
                provider: config.provider.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { client, config })
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| LlmError::MissingApiKey(self.config.provider.to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> LlmError {
        LlmError::Transport {
            provider: self.config.provider.to_string(),
            message: e.to_string(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, LlmError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                provider: self.config.provider.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn decode<T: for<'de> Deserialize<'de>>(&self, response: reqwest::Response) -> Result<T, LlmError> {
        response.json::<T>().await.map_err(|e| LlmError::Decode {
            provider: self.config.provider.to_string(),
            message: e.to_string(),
        })
    }

    /// JSON mode only reaches providers that accept the hint
    fn wants_json_mode(&self, request: &CompletionRequest) -> bool {
        request.json_mode && self.config.provider.supports_json_mode()
    }

    async fn send_openai_compatible(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let api_key = self.api_key()?;
        let url = format!("{}/chat/completions", self.config.resolved_base_url());

        let mut payload = json!({
            "model": self.config.resolved_model(),
            "messages": request.messages,
            "max_tokens": request.max_tokens,
        });
        if self.wants_json_mode(request) {
            payload["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .send(
                self.client
                    .post(url)
                    .header("Authorization", format!("Bearer {}", api_key))
                    .header("Content-Type", "application/json")
                    .json(&payload),
            )
            .await?;

        let body: ChatCompletionResponse = self.decode(response).await?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::EmptyChoices(self.config.provider.to_string()))
    }

    async fn send_anthropic(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let api_key = self.api_key()?;
        let url = format!("{}/messages", self.config.resolved_base_url());

        // The messages API takes the system prompt as a top-level field
        let system = request
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let messages: Vec<&ChatMessage> = request.messages.iter().filter(|m| m.role != "system").collect();

        let mut payload = json!({
            "model": self.config.resolved_model(),
            "messages": messages,
            "max_tokens": request.max_tokens,
        });
        if !system.is_empty() {
            payload["system"] = Value::String(system);
        }

        let response = self
            .send(
                self.client
                    .post(url)
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("Content-Type", "application/json")
                    .json(&payload),
            )
            .await?;

        let body: AnthropicResponse = self.decode(response).await?;

        body.content
            .into_iter()
            .find(|content| content.content_type == "text")
            .map(|content| content.text)
            .ok_or_else(|| LlmError::EmptyChoices(self.config.provider.to_string()))
    }

    async fn send_gemini(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let api_key = self.api_key()?;
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.resolved_base_url(),
            self.config.resolved_model(),
            api_key
        );

        // Gemini has no system role here, so the messages are combined
        let combined_prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut generation_config = json!({ "maxOutputTokens": request.max_tokens });
        if self.wants_json_mode(request) {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let payload = json!({
            "contents": [{ "parts": [{ "text": combined_prompt }] }],
            "generationConfig": generation_config,
        });

        let response = self
            .send(
                self.client
                    .post(url)
                    .header("Content-Type", "application/json")
                    .json(&payload),
            )
            .await?;

        let body: GeminiResponse = self.decode(response).await?;

        body.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| LlmError::EmptyChoices(self.config.provider.to_string()))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!(
            provider = %self.config.provider,
            messages = request.messages.len(),
            json_mode = request.json_mode,
            "Sending completion request"
        );
        if request.json_mode && !self.config.provider.supports_json_mode() {
            debug!(provider = %self.config.provider, "Provider has no JSON mode, skipping the hint");
        }

        match self.config.provider {
            LlmProvider::OpenAi | LlmProvider::OpenRouter => self.send_openai_compatible(request).await,
            LlmProvider::Anthropic => self.send_anthropic(request).await,
            LlmProvider::Gemini => self.send_gemini(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("OpenRouter".parse::<LlmProvider>().unwrap(), LlmProvider::OpenRouter);
        assert_eq!(" gemini ".parse::<LlmProvider>().unwrap(), LlmProvider::Gemini);
        assert!("mistral".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_json_mode_support() {
        assert!(LlmProvider::OpenAi.supports_json_mode());
        assert!(LlmProvider::Gemini.supports_json_mode());
        assert!(!LlmProvider::Anthropic.supports_json_mode());
    }

    #[test]
    fn test_json_mode_hint_follows_provider() {
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hello")],
            max_tokens: 16,
            json_mode: true,
        };
        let client_for = |provider| {
            HttpLlmClient::new(LlmConfig {
                provider,
                ..LlmConfig::default()
            })
            .unwrap()
        };

        assert!(client_for(LlmProvider::OpenRouter).wants_json_mode(&request));
        assert!(client_for(LlmProvider::Gemini).wants_json_mode(&request));
        assert!(!client_for(LlmProvider::Anthropic).wants_json_mode(&request));

        let plain = CompletionRequest { json_mode: false, ..request };
        assert!(!client_for(LlmProvider::OpenAi).wants_json_mode(&plain));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_network() {
        let config = LlmConfig {
            provider: LlmProvider::Anthropic,
            api_key: None,
            ..LlmConfig::default()
        };
        let client = HttpLlmClient::new(config).unwrap();
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hello")],
            max_tokens: 16,
            json_mode: false,
        };

        assert_eq!(
            client.complete(&request).await,
            Err(LlmError::MissingApiKey("anthropic".to_string()))
        );
    }

    #[test]
    fn test_chat_message_serializes_role_and_content() {
        let value = serde_json::to_value(ChatMessage::system("rules")).unwrap();
        assert_eq!(value, json!({"role": "system", "content": "rules"}));
    }
}
