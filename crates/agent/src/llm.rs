use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use propbot_core::config::{LlmConfig, LlmProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
    #[error("llm response had empty content")]
    Empty,
    #[error("llm client misconfigured: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Chat-completions client for OpenAI and servers exposing the same API, such as Ollama.
pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: &str, api_key: Option<SecretString>, model: &str) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: chat_completions_endpoint(base_url),
            api_key,
            model: model.to_owned(),
        })
    }
}

fn chat_completions_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut call = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user }
            ],
            "temperature": 0.1
        }));
        if let Some(api_key) = &self.api_key {
            call = call.bearer_auth(api_key.expose_secret());
        }

        let response = call.send().await?;
        let status = response.status();
        debug!(status = %status, model = %self.model, "chat completion response received");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let payload: Value =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        non_empty(
            payload
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|choices| choices.first())
                .and_then(|choice| choice.get("message"))
                .and_then(|message| message.get("content"))
                .and_then(Value::as_str),
        )
    }
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl AnthropicClient {
    pub fn new(base_url: &str, api_key: SecretString, model: &str) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_owned(),
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": self.model,
                "max_tokens": MAX_OUTPUT_TOKENS,
                "system": request.system,
                "messages": [{ "role": "user", "content": request.user }]
            }))
            .send()
            .await?;

        let status = response.status();
        debug!(status = %status, model = %self.model, "messages response received");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let payload: Value =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        non_empty(
            payload
                .get("content")
                .and_then(Value::as_array)
                .and_then(|blocks| {
                    blocks.iter().find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                })
                .and_then(|block| block.get("text"))
                .and_then(Value::as_str),
        )
    }
}

fn non_empty(content: Option<&str>) -> Result<String, LlmError> {
    content.map(str::trim).filter(|text| !text.is_empty()).map(str::to_owned).ok_or(LlmError::Empty)
}

pub fn client_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider {
        LlmProvider::OpenAi => Ok(Arc::new(OpenAiCompatibleClient::new(
            config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL),
            config.api_key.clone(),
            &config.model,
        )?)),
        LlmProvider::Ollama => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                LlmError::Configuration("ollama requires llm.base_url".to_owned())
            })?;
            Ok(Arc::new(OpenAiCompatibleClient::new(base_url, None, &config.model)?))
        }
        LlmProvider::Anthropic => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                LlmError::Configuration("anthropic requires llm.api_key".to_owned())
            })?;
            Ok(Arc::new(AnthropicClient::new(
                config.base_url.as_deref().unwrap_or(ANTHROPIC_BASE_URL),
                api_key,
                &config.model,
            )?))
        }
    }
}

/// Replays canned completions in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    latency: Duration,
}

impl ScriptedLlmClient {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::default(),
            latency: Duration::ZERO,
        }
    }

    /// Delays every completion, for exercising overlapping deliveries.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.requests.lock().await.push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Request("script exhausted".to_owned())))
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use super::{
        chat_completions_endpoint, AnthropicClient, CompletionRequest, LlmClient, LlmError,
        OpenAiCompatibleClient,
    };

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{address}")
    }

    fn request() -> CompletionRequest {
        CompletionRequest { system: "extraia".to_owned(), user: "site por 1500".to_owned() }
    }

    #[test]
    fn endpoint_accepts_bases_with_or_without_version() {
        assert_eq!(
            chat_completions_endpoint("https://api.openai.com/v1"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_endpoint("http://localhost:11434/"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn openai_compatible_client_reads_first_choice() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(
                    headers.get("authorization").and_then(|value| value.to_str().ok()),
                    Some("Bearer sk-test")
                );
                assert_eq!(body["messages"][1]["content"], json!("site por 1500"));
                Json(json!({ "choices": [{ "message": { "content": " {\"title\":\"Site\"} " } }] }))
            }),
        );
        let base = serve(app).await;

        let client = OpenAiCompatibleClient::new(
            &base,
            Some(SecretString::from("sk-test".to_owned())),
            "gpt-4o-mini",
        )
        .expect("client");

        assert_eq!(client.complete(&request()).await, Ok("{\"title\":\"Site\"}".to_owned()));
    }

    #[tokio::test]
    async fn anthropic_client_reads_text_block_and_surfaces_errors() {
        let app = Router::new().route(
            "/v1/messages",
            post(|headers: HeaderMap| async move {
                if headers.get("x-api-key").and_then(|value| value.to_str().ok()) == Some("bad") {
                    return (
                        axum::http::StatusCode::UNAUTHORIZED,
                        Json(json!({ "error": { "message": "invalid key" } })),
                    );
                }
                (
                    axum::http::StatusCode::OK,
                    Json(json!({ "content": [{ "type": "text", "text": "{}" }] })),
                )
            }),
        );
        let base = serve(app).await;

        let client =
            AnthropicClient::new(&base, SecretString::from("good".to_owned()), "claude-test")
                .expect("client");
        assert_eq!(client.complete(&request()).await, Ok("{}".to_owned()));

        let rejected =
            AnthropicClient::new(&base, SecretString::from("bad".to_owned()), "claude-test")
                .expect("client");
        assert!(matches!(
            rejected.complete(&request()).await,
            Err(LlmError::Status { status: 401, .. })
        ));
    }
}
