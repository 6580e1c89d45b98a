use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use propbot_channels::MediaPayload;
use propbot_core::config::TranscriptionConfig;

use crate::resilience::{retry_with_timeout, AttemptError, RetryPolicy};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranscriptionError {
    #[error("transcription is disabled")]
    Disabled,
    #[error("transcription timed out")]
    Timeout,
    #[error("transcription request failed: {0}")]
    Request(String),
    #[error("transcription returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transcription was empty")]
    Empty,
}

impl From<reqwest::Error> for TranscriptionError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error.to_string())
    }
}

impl From<AttemptError<TranscriptionError>> for TranscriptionError {
    fn from(error: AttemptError<TranscriptionError>) -> Self {
        match error {
            AttemptError::Timeout(_) => Self::Timeout,
            AttemptError::Failed(inner) => inner,
        }
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &MediaPayload) -> Result<String, TranscriptionError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client.
pub struct WhisperTranscriber {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    language: String,
    policy: RetryPolicy,
}

impl WhisperTranscriber {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: &str,
        language: &str,
        policy: RetryPolicy,
    ) -> Result<Self, TranscriptionError> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_owned(),
            language: language.to_owned(),
            policy,
        })
    }

    async fn post_once(&self, audio: &MediaPayload) -> Result<String, TranscriptionError> {
        // Multipart bodies are consumed by send, so each attempt builds its own form.
        let file = Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.content_type)?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Status { status: status.as_u16(), body });
        }

        let payload: TranscriptionResponse = response.json().await?;
        let text = payload.text.trim().to_owned();
        if text.is_empty() {
            return Err(TranscriptionError::Empty);
        }
        Ok(text)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &MediaPayload) -> Result<String, TranscriptionError> {
        debug!(bytes = audio.bytes.len(), content_type = %audio.content_type, "transcribing audio");
        Ok(retry_with_timeout(&self.policy, "transcription", || self.post_once(audio)).await?)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledTranscriber;

#[async_trait]
impl Transcriber for DisabledTranscriber {
    async fn transcribe(&self, _audio: &MediaPayload) -> Result<String, TranscriptionError> {
        Err(TranscriptionError::Disabled)
    }
}

pub fn transcriber_from_config(
    config: &TranscriptionConfig,
    max_retries: u32,
) -> Result<Arc<dyn Transcriber>, TranscriptionError> {
    match (&config.api_key, config.enabled) {
        (Some(api_key), true) => Ok(Arc::new(WhisperTranscriber::new(
            &config.base_url,
            api_key.clone(),
            &config.model,
            &config.language,
            RetryPolicy::new(config.timeout_secs, max_retries),
        )?)),
        _ => Ok(Arc::new(DisabledTranscriber)),
    }
}

/// Returns a fixed transcript, or fails when constructed with `None`.
pub struct FixedTranscriber(pub Option<String>);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _audio: &MediaPayload) -> Result<String, TranscriptionError> {
        self.0.clone().ok_or(TranscriptionError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{http::HeaderMap, routing::post, Json, Router};
    use secrecy::SecretString;
    use serde_json::json;

    use propbot_channels::MediaPayload;

    use super::{Transcriber, TranscriptionError, WhisperTranscriber};
    use crate::resilience::RetryPolicy;

    fn audio() -> MediaPayload {
        MediaPayload {
            bytes: vec![1, 2, 3, 4],
            content_type: "audio/ogg".to_owned(),
            file_name: "voice.ogg".to_owned(),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{address}/v1")
    }

    fn transcriber(base: &str) -> WhisperTranscriber {
        WhisperTranscriber::new(
            base,
            SecretString::from("sk-audio".to_owned()),
            "whisper-1",
            "pt",
            RetryPolicy { timeout: Duration::from_secs(2), ..RetryPolicy::new(2, 0) },
        )
        .expect("transcriber")
    }

    #[tokio::test]
    async fn transcript_text_is_returned_trimmed() {
        let app = Router::new().route(
            "/v1/audio/transcriptions",
            post(|headers: HeaderMap| async move {
                assert_eq!(
                    headers.get("authorization").and_then(|value| value.to_str().ok()),
                    Some("Bearer sk-audio")
                );
                Json(json!({ "text": "  reforma do banheiro para o João  " }))
            }),
        );
        let base = serve(app).await;

        let text = transcriber(&base).transcribe(&audio()).await.expect("transcript");
        assert_eq!(text, "reforma do banheiro para o João");
    }

    #[tokio::test]
    async fn blank_transcript_is_an_error() {
        let app = Router::new()
            .route("/v1/audio/transcriptions", post(|| async { Json(json!({ "text": " " })) }));
        let base = serve(app).await;

        let error = transcriber(&base).transcribe(&audio()).await.expect_err("empty");
        assert_eq!(error, TranscriptionError::Empty);
    }
}
