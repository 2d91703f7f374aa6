//! OpenRouter chat-completions client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{LlmError, RetryConfig};
use super::{ChatMessage, InferenceClient, InferenceRequest};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Vision-capable model behind OpenRouter. Transient failures are retried
/// within a [`RetryConfig`] budget.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    model: String,
    retry: RetryConfig,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let seconds = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    seconds.trim().parse().ok().map(Duration::from_secs)
}

/// First non-blank answer of a completion.
fn first_answer(body: &str) -> Result<String, LlmError> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::Malformed(format!("{} in {}", e, body)))?;
    parsed
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.content)
        .find(|content| !content.trim().is_empty())
        .ok_or(LlmError::Empty)
}

impl OpenRouterClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_retry_config(api_key, model, RetryConfig::default())
    }

    pub fn with_retry_config(api_key: String, model: String, retry: RetryConfig) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            retry,
        }
    }

    async fn attempt(&self, body: &CompletionBody<'_>) -> Result<String, LlmError> {
        let response = self
            .client
            .post(OPENROUTER_API_URL)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Task Supervisor")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        let wait = retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::from_response(status.as_u16(), text, wait));
        }
        first_answer(&text)
    }
}

#[async_trait]
impl InferenceClient for OpenRouterClient {
    async fn complete(&self, request: &InferenceRequest) -> anyhow::Result<String> {
        let body = CompletionBody {
            model: &self.model,
            messages: request.to_messages(),
            temperature: 0.0,
        };
        tracing::debug!(model = %self.model, images = request.images.len(), "Sending inference request");

        let start = Instant::now();
        let mut attempt = 0;
        loop {
            let error = match self.attempt(&body).await {
                Ok(answer) => {
                    if attempt > 0 {
                        tracing::info!(retries = attempt, elapsed = ?start.elapsed(), "Inference recovered");
                    }
                    return Ok(answer);
                }
                Err(error) => error,
            };

            match self.retry.next_delay(&error, attempt, start.elapsed()) {
                Some(delay) => {
                    tracing::warn!(attempt = attempt + 1, ?delay, "Inference failed, retrying: {}", error);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    tracing::error!(retries = attempt, elapsed = ?start.elapsed(), "Inference failed: {}", error);
                    return Err(error.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_uses_zero_temperature_and_system_first() {
        let request = InferenceRequest::new("hi").with_system("sys");
        let body = CompletionBody {
            model: "google/gemini-2.0-flash-001",
            messages: request.to_messages(),
            temperature: 0.0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn answer_is_first_non_blank_choice() {
        let body = r#"{"choices":[{"message":{"content":"  "}},{"message":{"role":"assistant","content":"true"}}]}"#;
        assert_eq!(first_answer(body).unwrap(), "true");
    }

    #[test]
    fn empty_and_malformed_bodies_are_distinguished() {
        assert!(matches!(first_answer(r#"{"choices":[]}"#), Err(LlmError::Empty)));
        assert!(matches!(
            first_answer(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(LlmError::Empty)
        ));
        assert!(matches!(first_answer("<html>"), Err(LlmError::Malformed(_))));
    }

    #[test]
    fn reads_retry_after_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
    }
}
