use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Telegram,
    Whatsapp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Whatsapp => "whatsapp",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "telegram" => Some(Self::Telegram),
            "whatsapp" => Some(Self::Whatsapp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    VoiceTranscript,
    ContactShare,
}

/// Channel-agnostic inbound envelope produced by the transport adapters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: Channel,
    pub external_user_id: String,
    pub kind: MessageKind,
    pub text: Option<String>,
    /// Only set for contact shares.
    pub contact_phone: Option<String>,
    /// Provider message id, used to drop duplicate deliveries.
    pub message_id: Option<String>,
    /// Set by transports whose sender identity is a phone number.
    pub sender_phone: Option<String>,
    pub display_name: Option<String>,
}

impl InboundMessage {
    pub fn text(
        channel: Channel,
        external_user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            external_user_id: external_user_id.into(),
            kind: MessageKind::Text,
            text: Some(text.into()),
            contact_phone: None,
            message_id: None,
            sender_phone: None,
            display_name: None,
        }
    }

    pub fn contact(
        channel: Channel,
        external_user_id: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            external_user_id: external_user_id.into(),
            kind: MessageKind::ContactShare,
            text: None,
            contact_phone: Some(phone.into()),
            message_id: None,
            sender_phone: None,
            display_name: None,
        }
    }

    /// Voice note whose transcript, if any, is filled in after transcription.
    pub fn voice(channel: Channel, external_user_id: impl Into<String>) -> Self {
        Self {
            channel,
            external_user_id: external_user_id.into(),
            kind: MessageKind::VoiceTranscript,
            text: None,
            contact_phone: None,
            message_id: None,
            sender_phone: None,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_sender_phone(mut self, phone: impl Into<String>) -> Self {
        self.sender_phone = Some(phone.into());
        self
    }

    /// Trimmed text body, `None` when absent or blank.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|text| !text.is_empty())
    }

    /// Phone number usable for identity resolution.
    pub fn identity_phone(&self) -> Option<&str> {
        match self.kind {
            MessageKind::ContactShare => self.contact_phone.as_deref(),
            _ => self.sender_phone.as_deref(),
        }
        .filter(|phone| !phone.trim().is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    pub quick_replies: Vec<String>,
    /// Ask the client to share its contact card with the first quick reply.
    pub request_contact: bool,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), quick_replies: Vec::new(), request_contact: false }
    }

    pub fn with_quick_replies<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.quick_replies = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn requesting_contact(mut self, label: impl Into<String>) -> Self {
        self.quick_replies = vec![label.into()];
        self.request_contact = true;
        self
    }
}
