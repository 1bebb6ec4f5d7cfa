//! Chat-completion client used to generate answers from retrieved policy excerpts.
//!
//! Mirrors the embedding adapter: a small trait at the seam and one reqwest-backed
//! implementation speaking the OpenAI `/chat/completions` protocol.

use crate::config::Config;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Errors surfaced while generating an answer.
#[derive(Debug, Error)]
pub enum ChatClientError {
    /// HTTP client could not be constructed.
    #[error("Failed to build chat HTTP client: {0}")]
    Client(String),
    /// Provider was unreachable or the endpoint does not exist.
    #[error("Chat provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Request passed to the chat provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Fully assembled prompt, retrieved context included.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum number of generated tokens.
    pub max_tokens: u32,
}

/// Interface implemented by answer-generation providers.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Generate a completion for the given prompt.
    async fn complete(&self, request: ChatRequest) -> Result<String, ChatClientError>;
}

/// Build a chat client based on configuration.
pub fn get_chat_client(
    config: &Config,
) -> Result<Box<dyn ChatClient + Send + Sync>, ChatClientError> {
    Ok(Box::new(OpenAiChatClient::new(
        config.openrouter_base_url.clone(),
        config.openrouter_api_key.clone(),
        config.chat_model.clone(),
    )?))
}

/// Chat client for OpenAI-compatible providers such as OpenRouter.
pub struct OpenAiChatClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChatClient {
    /// Construct a client for the given endpoint and model.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ChatClientError> {
        let http = Client::builder()
            .user_agent("policy-rag/chat")
            .build()
            .map_err(|error| ChatClientError::Client(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, ChatClientError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": request.prompt }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        });

        tracing::debug!(model = %self.model, "Requesting chat completion");

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ChatClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ChatClientError::ProviderUnavailable(format!(
                "chat endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatClientError::GenerationFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let body: CompletionResponse = response.json().await.map_err(|error| {
            ChatClientError::InvalidResponse(format!("failed to decode completion: {error}"))
        })?;

        // OpenRouter reports upstream model failures inside a 200 body.
        if let Some(error) = body.error {
            return Err(ChatClientError::GenerationFailed(error.to_string()));
        }

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ChatClientError::InvalidResponse("completion had no content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn request() -> ChatRequest {
        ChatRequest {
            prompt: "What is the retention period?".into(),
            temperature: 0.2,
            max_tokens: 300,
        }
    }

    fn client_for(server: &MockServer) -> OpenAiChatClient {
        OpenAiChatClient::new(server.base_url(), "sk-test", "deepseek/deepseek-chat-v3.1:free")
            .expect("client")
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{ "max_tokens": 300 }"#);
                then.status(200).json_body(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "  Seven years.\n" } }
                    ]
                }));
            })
            .await;

        let answer = client_for(&server).complete(request()).await.expect("answer");

        mock.assert();
        assert_eq!(answer, "Seven years.");
    }

    #[tokio::test]
    async fn handles_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(500).body("boom");
            })
            .await;

        let error = client_for(&server)
            .complete(request())
            .await
            .expect_err("error response");

        assert!(
            matches!(error, ChatClientError::GenerationFailed(message) if message.contains("500"))
        );
    }

    #[tokio::test]
    async fn treats_error_body_as_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({
                    "error": { "code": 429, "message": "rate limited" }
                }));
            })
            .await;

        let error = client_for(&server)
            .complete(request())
            .await
            .expect_err("error body");

        assert!(
            matches!(error, ChatClientError::GenerationFailed(message) if message.contains("rate limited"))
        );
    }

    #[tokio::test]
    async fn rejects_empty_choices() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let error = client_for(&server)
            .complete(request())
            .await
            .expect_err("no choices");
        assert!(matches!(error, ChatClientError::InvalidResponse(_)));
    }
}
