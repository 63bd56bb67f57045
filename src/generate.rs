//! Generation client: assembled context + question in, answer text out.
//!
//! The [`Generator`] trait is the seam to the external text-completion
//! service; [`OpenAiGenerator`] talks to an OpenAI-compatible
//! `POST /v1/chat/completions` endpoint. It shares the retry
//! classification of the embedding gateway (429/5xx/network → retry,
//! other 4xx → fail) with its own injected [`RetryPolicy`] and timeout.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::retry::{with_retry, RetryPolicy, TryFailure};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const SERVICE: &str = "generation service";

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce an answer for `question` given the assembled `system`
    /// context.
    async fn generate(&self, system: &str, question: &str) -> Result<String>;
}

/// Chat-completions client for OpenAI-compatible APIs.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    policy: RetryPolicy,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig, policy: RetryPolicy) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let base = config
            .url
            .as_deref()
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            endpoint: format!("{base}/v1/chat/completions"),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            policy,
        })
    }

    async fn request(
        &self,
        system: &str,
        question: &str,
    ) -> std::result::Result<String, TryFailure> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": question },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_output_tokens,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match resp {
            Ok(r) => r,
            Err(e) => return Err(TryFailure::retryable(e.to_string())),
        };

        let status = response.status();
        if status.is_success() {
            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| TryFailure::fatal(format!("invalid completion response: {e}")))?;
            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| TryFailure::fatal("completion response had no choices"));
        }

        let body_text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(TryFailure::retryable(format!(
                "API error {status}: {body_text}"
            )))
        } else {
            Err(TryFailure::fatal(format!("API error {status}: {body_text}")))
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, system: &str, question: &str) -> Result<String> {
        with_retry(&self.policy, SERVICE, || self.request(system, question)).await
    }
}
