//! Generative-model provider seam.
//!
//! The engine hands a provider a batch of items for one profile and gets back
//! one outcome per item, so a single bad item never sinks its siblings.

use super::prompt::{self, ExtractionItem};
use crate::config::{AiConfig, ProfileConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider server error (HTTP {0})")]
    Server(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider rejected request (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    #[error("malformed provider output: {0}")]
    Malformed(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Server(_) | ProviderError::Transport(_)
        )
    }
}

/// Per-item outcome: the JSON object the model produced for that item
pub type ItemOutput = Result<Value, ProviderError>;

#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// One request covering every item in `items`.
    ///
    /// An `Err` means the whole call failed and applies to every item.
    async fn complete(&self, profile: &ProfileConfig, items: &[ExtractionItem]) -> Result<Vec<ItemOutput>, ProviderError>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiCompatibleProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &AiConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("ai.api_key / OPENAI_API_KEY".into()))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e| ProviderError::NotConfigured(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn build_request(profile: &ProfileConfig, items: &[ExtractionItem]) -> ChatRequest {
        let mut user_parts = vec![serde_json::json!({
            "type": "text",
            "text": prompt::batch_user_prompt(items),
        })];
        for item in items {
            for image in &item.image_urls {
                user_parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": { "url": image },
                }));
            }
        }

        ChatRequest {
            model: profile.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: Value::String(prompt::SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: Value::Array(user_parts),
                },
            ],
            temperature: profile.temperature,
            max_tokens: profile.max_output_tokens,
            response_format: serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "karaoke_schedule_batch",
                    "schema": prompt::batch_response_schema(),
                },
            }),
        }
    }
}

#[async_trait]
impl GenerativeProvider for OpenAiCompatibleProvider {
    async fn complete(&self, profile: &ProfileConfig, items: &[ExtractionItem]) -> Result<Vec<ItemOutput>, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = Self::build_request(profile, items);
        debug!(model = %request.model, items = items.len(), "Chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }
        if status >= 500 {
            return Err(ProviderError::Server(status));
        }
        if !(200..300).contains(&status) {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Client { status, message });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Malformed("no message content in response".into()))?;

        Ok(prompt::split_batch_response(&content, items.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::Server(503).is_transient());
        assert!(!ProviderError::Malformed("x".into()).is_transient());
        assert!(!ProviderError::Client {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
    }

    #[test]
    fn test_request_carries_profile_settings_and_images() {
        let profile = ProfileConfig {
            model: "vision-model".into(),
            temperature: 0.4,
            max_output_tokens: 1234,
            ..ProfileConfig::default()
        };
        let items = vec![ExtractionItem {
            source_url: "https://example.com".into(),
            content: "Karaoke Friday 9pm".into(),
            image_urls: vec!["https://example.com/flyer.jpg".into()],
        }];
        let request = OpenAiCompatibleProvider::build_request(&profile, &items);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "vision-model");
        assert_eq!(json["max_tokens"], 1234);
        assert_eq!(json["messages"][1]["content"][1]["image_url"]["url"], "https://example.com/flyer.jpg");
        assert_eq!(json["response_format"]["type"], "json_schema");
    }

    #[tokio::test]
    async fn test_missing_api_key_is_not_configured() {
        let provider = OpenAiCompatibleProvider::new(&AiConfig::default()).unwrap();
        let err = provider.headers().unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
