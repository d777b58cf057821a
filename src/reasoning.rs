//! Reasoning service used to decompose queries

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::ReasoningConfig;
use crate::error::MusterError;

/// Prompt pair sent to the reasoning service
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

/// Text-generation backend
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, MusterError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatTurn<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_content(self) -> Result<String, MusterError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| MusterError::Reasoning("response contained no message content".into()))
    }
}

/// Client for an OpenAI-compatible chat-completions endpoint
pub struct OpenAiReasoningService {
    http: reqwest::Client,
    config: ReasoningConfig,
}

impl OpenAiReasoningService {
    pub fn new(config: ReasoningConfig) -> Result<Self, MusterError> {
        if config.api_key.is_empty() {
            return Err(MusterError::Config("reasoning api_key is empty".into()));
        }

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| MusterError::Config(format!("invalid api key: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| MusterError::Config(format!("http client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Build from environment variables, see [`ReasoningConfig::from_env`]
    pub fn from_env() -> Result<Self, MusterError> {
        Self::new(ReasoningConfig::from_env()?)
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ReasoningService for OpenAiReasoningService {
    #[instrument(skip(self, request), fields(model = %self.config.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<String, MusterError> {
        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: [
                ChatTurn {
                    role: "system",
                    content: &request.system,
                },
                ChatTurn {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| MusterError::Reasoning(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MusterError::Reasoning(format!("http {}: {}", status, text)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| MusterError::Reasoning(format!("invalid response body: {}", e)))?;

        debug!("Reasoning service responded");
        parsed.into_content()
    }
}
