use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use propbot_core::{Channel, InboundMessage, OutboundMessage};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(String),
    #[error("transport rejected the call with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("transport response could not be decoded: {0}")]
    Decode(String),
    #[error("media unavailable: {0}")]
    Media(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error.to_string())
    }
}

/// Provider handle for an attachment that must be downloaded before use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaRef {
    pub channel: Channel,
    /// Telegram `file_id` or Twilio media URL.
    pub locator: String,
    pub content_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

/// Parsed webhook payload: the channel-agnostic message and any media it points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub message: InboundMessage,
    pub media: Option<MediaRef>,
}

impl InboundEnvelope {
    pub fn message(message: InboundMessage) -> Self {
        Self { message, media: None }
    }

    pub fn with_media(message: InboundMessage, media: MediaRef) -> Self {
        Self { message, media: Some(media) }
    }
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(
        &self,
        external_user_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), TransportError>;

    async fn fetch_media(&self, media: &MediaRef) -> Result<MediaPayload, TransportError>;
}

/// Configured transports, at most one per channel.
#[derive(Clone, Default)]
pub struct TransportSet {
    telegram: Option<Arc<dyn ChannelTransport>>,
    whatsapp: Option<Arc<dyn ChannelTransport>>,
}

impl TransportSet {
    pub fn with(mut self, transport: Arc<dyn ChannelTransport>) -> Self {
        match transport.channel() {
            Channel::Telegram => self.telegram = Some(transport),
            Channel::Whatsapp => self.whatsapp = Some(transport),
        }
        self
    }

    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelTransport>> {
        match channel {
            Channel::Telegram => self.telegram.as_ref(),
            Channel::Whatsapp => self.whatsapp.as_ref(),
        }
    }

    pub fn channels(&self) -> Vec<Channel> {
        [Channel::Telegram, Channel::Whatsapp]
            .into_iter()
            .filter(|channel| self.get(*channel).is_some())
            .collect()
    }
}

/// Keeps every outbound message in memory instead of calling a provider.
pub struct RecordingTransport {
    channel: Channel,
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    media: Mutex<Option<MediaPayload>>,
    fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            sent: Mutex::new(Vec::new()),
            media: Mutex::new(None),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub async fn with_media(self, payload: MediaPayload) -> Self {
        *self.media.lock().await = Some(payload);
        self
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(_, message)| message.text.clone()).collect()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait]
impl ChannelTransport for RecordingTransport {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        external_user_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Request("recording transport set to fail".to_owned()));
        }
        self.sent.lock().await.push((external_user_id.to_owned(), message.clone()));
        Ok(())
    }

    async fn fetch_media(&self, media: &MediaRef) -> Result<MediaPayload, TransportError> {
        self.media
            .lock()
            .await
            .clone()
            .ok_or_else(|| TransportError::Media(format!("no media recorded for {}", media.locator)))
    }
}

#[cfg(test)]
mod tests {
    use propbot_core::{Channel, OutboundMessage};

    use std::sync::Arc;

    use super::{ChannelTransport, MediaRef, RecordingTransport, TransportError, TransportSet};

    #[tokio::test]
    async fn recording_transport_keeps_messages_in_order() {
        let transport = RecordingTransport::new(Channel::Telegram);

        transport.send("42", &OutboundMessage::new("primeira")).await.expect("send");
        transport.send("42", &OutboundMessage::new("segunda")).await.expect("send");

        assert_eq!(transport.sent_texts().await, vec!["primeira", "segunda"]);
    }

    #[tokio::test]
    async fn recording_transport_can_simulate_outages() {
        let transport = RecordingTransport::new(Channel::Whatsapp);
        transport.fail_sends(true);

        let error = transport.send("+5511", &OutboundMessage::new("oi")).await.expect_err("fails");
        assert!(matches!(error, TransportError::Request(_)));
        assert!(transport.sent().await.is_empty());

        let media = MediaRef { channel: Channel::Whatsapp, locator: "m1".into(), content_type: None };
        assert!(matches!(transport.fetch_media(&media).await, Err(TransportError::Media(_))));
    }

    #[test]
    fn transport_set_routes_by_channel() {
        let set = TransportSet::default().with(Arc::new(RecordingTransport::new(Channel::Whatsapp)));

        assert!(set.get(Channel::Telegram).is_none());
        assert_eq!(set.get(Channel::Whatsapp).map(|transport| transport.channel()), Some(Channel::Whatsapp));
        assert_eq!(set.channels(), vec![Channel::Whatsapp]);
    }
}
