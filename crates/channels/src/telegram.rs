use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

use propbot_core::{Channel, InboundMessage, OutboundMessage};

use crate::transport::{ChannelTransport, InboundEnvelope, MediaPayload, MediaRef, TransportError};

const SEND_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_VOICE_MIME: &str = "audio/ogg";

/// Maps a Bot API update to an inbound envelope. Updates without a chat message yield `None`.
pub fn parse_update(update: &Value) -> Option<InboundEnvelope> {
    let message = update.get("message")?;
    let chat_id = message.get("chat")?.get("id").and_then(id_string)?;
    let sender = message.get("from");
    let sender_id = sender.and_then(|from| from.get("id")).and_then(id_string);
    let mut media = None;

    let mut inbound = if let Some(contact) = message.get("contact") {
        let owner = contact.get("user_id").and_then(id_string);
        match contact.get("phone_number").and_then(Value::as_str) {
            Some(phone) if owner.is_some() && owner == sender_id => {
                InboundMessage::contact(Channel::Telegram, &chat_id, phone)
            }
            _ => {
                debug!(chat_id = %chat_id, "ignoring contact that does not belong to the sender");
                InboundMessage::text(Channel::Telegram, &chat_id, "")
            }
        }
    } else if let Some(text) = message.get("text").and_then(Value::as_str) {
        InboundMessage::text(Channel::Telegram, &chat_id, text)
    } else if let Some(voice) = message.get("voice").or_else(|| message.get("audio")) {
        media = voice.get("file_id").and_then(Value::as_str).map(|file_id| MediaRef {
            channel: Channel::Telegram,
            locator: file_id.to_owned(),
            content_type: voice.get("mime_type").and_then(Value::as_str).map(str::to_owned),
        });
        InboundMessage::voice(Channel::Telegram, &chat_id)
    } else {
        InboundMessage::text(Channel::Telegram, &chat_id, "")
    };

    if let Some(message_id) = message.get("message_id").and_then(id_string) {
        inbound = inbound.with_message_id(message_id);
    }
    if let Some(name) = sender
        .and_then(|from| from.get("first_name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        inbound = inbound.with_display_name(name);
    }

    Some(InboundEnvelope { message: inbound, media })
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

/// Reply keyboard for `sendMessage`: one button per row, or a keyboard removal when there are
/// no quick replies.
pub fn reply_markup(message: &OutboundMessage) -> Value {
    if message.quick_replies.is_empty() {
        return json!({ "remove_keyboard": true });
    }

    let rows: Vec<Value> = message
        .quick_replies
        .iter()
        .enumerate()
        .map(|(index, label)| {
            if message.request_contact && index == 0 {
                json!([{ "text": label, "request_contact": true }])
            } else {
                json!([{ "text": label }])
            }
        })
        .collect();

    json!({ "keyboard": rows, "resize_keyboard": true, "one_time_keyboard": true })
}

pub fn send_message_body(chat_id: &str, message: &OutboundMessage, markdown: bool) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "text": message.text,
        "reply_markup": reply_markup(message),
    });
    if markdown {
        body["parse_mode"] = json!("Markdown");
    }
    body
}

pub struct TelegramTransport {
    client: Client,
    api_base_url: String,
    bot_token: SecretString,
}

impl TelegramTransport {
    pub fn new(api_base_url: &str, bot_token: SecretString) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self { client, api_base_url: api_base_url.trim_end_matches('/').to_owned(), bot_token })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base_url, self.bot_token.expose_secret())
    }

    async fn post_message(&self, body: &Value) -> Result<(StatusCode, String), TransportError> {
        let response = self.client.post(self.method_url("sendMessage")).json(body).send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

#[async_trait]
impl ChannelTransport for TelegramTransport {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn send(
        &self,
        external_user_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let (status, body) =
            self.post_message(&send_message_body(external_user_id, message, true)).await?;
        if status.is_success() {
            return Ok(());
        }

        // Free text from operators can break Markdown entities; resend as plain text.
        if status == StatusCode::BAD_REQUEST && body.contains("can't parse entities") {
            warn!(chat_id = %external_user_id, "markdown rejected, resending as plain text");
            let (status, body) =
                self.post_message(&send_message_body(external_user_id, message, false)).await?;
            if status.is_success() {
                return Ok(());
            }
            return Err(TransportError::Rejected { status: status.as_u16(), body });
        }

        Err(TransportError::Rejected { status: status.as_u16(), body })
    }

    async fn fetch_media(&self, media: &MediaRef) -> Result<MediaPayload, TransportError> {
        let response = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", media.locator.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(TransportError::Rejected { status, body: "getFile failed".to_owned() });
        }

        let payload: Value =
            response.json().await.map_err(|error| TransportError::Decode(error.to_string()))?;
        let file_path = payload
            .get("result")
            .and_then(|result| result.get("file_path"))
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Media("getFile returned no file_path".to_owned()))?;

        let download_url = format!(
            "{}/file/bot{}/{file_path}",
            self.api_base_url,
            self.bot_token.expose_secret()
        );
        let response = self.client.get(download_url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(TransportError::Rejected { status, body: "file download failed".to_owned() });
        }
        let bytes = response.bytes().await?.to_vec();

        let file_name = file_path.rsplit('/').next().unwrap_or("voice.ogg").to_owned();
        Ok(MediaPayload {
            bytes,
            content_type: media.content_type.clone().unwrap_or_else(|| DEFAULT_VOICE_MIME.to_owned()),
            file_name,
        })
    }
}
