use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use propbot_core::{Channel, InboundMessage, OutboundMessage};

use crate::transport::{ChannelTransport, InboundEnvelope, MediaPayload, MediaRef, TransportError};

const SEND_TIMEOUT: Duration = Duration::from_secs(15);
const ADDRESS_PREFIX: &str = "whatsapp:";

/// Maps a Twilio inbound-message form to an envelope. Forms without a sender yield `None`.
pub fn parse_inbound(form: &HashMap<String, String>) -> Option<InboundEnvelope> {
    let from = form.get("From").map(|raw| strip_address(raw)).filter(|from| !from.is_empty())?;
    let mut media = None;

    let media_count =
        form.get("NumMedia").and_then(|count| count.trim().parse::<u32>().ok()).unwrap_or(0);
    let audio_type = form.get("MediaContentType0").filter(|kind| kind.starts_with("audio/"));

    let mut inbound = match (media_count, audio_type, form.get("MediaUrl0")) {
        (count, Some(content_type), Some(url)) if count > 0 => {
            media = Some(MediaRef {
                channel: Channel::Whatsapp,
                locator: url.clone(),
                content_type: Some(content_type.clone()),
            });
            InboundMessage::voice(Channel::Whatsapp, &from)
        }
        _ => InboundMessage::text(
            Channel::Whatsapp,
            &from,
            form.get("Body").map(String::as_str).unwrap_or_default(),
        ),
    };

    inbound = inbound.with_sender_phone(&from);
    if let Some(sid) = form.get("MessageSid").filter(|sid| !sid.is_empty()) {
        inbound = inbound.with_message_id(sid);
    }
    if let Some(name) = form.get("ProfileName").map(|name| name.trim()).filter(|n| !n.is_empty()) {
        inbound = inbound.with_display_name(name);
    }

    debug!(from = %from, media_count, "parsed whatsapp inbound form");
    Some(InboundEnvelope { message: inbound, media })
}

fn strip_address(raw: &str) -> String {
    raw.trim().trim_start_matches(ADDRESS_PREFIX).trim().to_owned()
}

fn to_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with(ADDRESS_PREFIX) {
        number.to_owned()
    } else {
        format!("{ADDRESS_PREFIX}{number}")
    }
}

/// WhatsApp has no reply keyboard; quick replies become a numbered list under the text.
pub fn render_body(message: &OutboundMessage) -> String {
    if message.quick_replies.is_empty() || message.request_contact {
        return message.text.clone();
    }

    let options: Vec<String> = message
        .quick_replies
        .iter()
        .enumerate()
        .map(|(index, label)| format!("{}. {label}", index + 1))
        .collect();
    format!("{}\n\n{}", message.text, options.join("\n"))
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    message: Option<String>,
}

pub struct WhatsappTransport {
    client: Client,
    api_base_url: String,
    account_sid: String,
    auth_token: SecretString,
    from_number: String,
}

impl WhatsappTransport {
    pub fn new(
        api_base_url: &str,
        account_sid: &str,
        auth_token: SecretString,
        from_number: &str,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_owned(),
            account_sid: account_sid.to_owned(),
            auth_token,
            from_number: to_address(from_number),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/2010-04-01/Accounts/{}/Messages.json", self.api_base_url, self.account_sid)
    }
}

#[async_trait]
impl ChannelTransport for WhatsappTransport {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    async fn send(
        &self,
        external_user_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let to = to_address(external_user_id);
        let body = render_body(message);
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&[
                ("From", self.from_number.as_str()),
                ("To", to.as_str()),
                ("Body", body.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<TwilioError>(&text)
            .ok()
            .and_then(|error| error.message)
            .unwrap_or(text);
        Err(TransportError::Rejected { status: status.as_u16(), body: detail })
    }

    async fn fetch_media(&self, media: &MediaRef) -> Result<MediaPayload, TransportError> {
        let response = self
            .client
            .get(&media.locator)
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(TransportError::Rejected { status, body: "media download failed".into() });
        }

        let content_type = media
            .content_type
            .clone()
            .or_else(|| {
                response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| "audio/ogg".to_owned());
        let bytes = response.bytes().await?.to_vec();
        let extension = content_type.rsplit('/').next().unwrap_or("ogg");

        Ok(MediaPayload { bytes, file_name: format!("audio.{extension}"), content_type })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use propbot_core::{Channel, MessageKind, OutboundMessage};

    use super::{parse_inbound, render_body, to_address};

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
    }

    #[test]
    fn text_form_carries_sender_phone() {
        let envelope = parse_inbound(&form(&[
            ("From", "whatsapp:+5511999990001"),
            ("Body", "Criar proposta"),
            ("MessageSid", "SM123"),
            ("ProfileName", "Ana"),
            ("NumMedia", "0"),
        ]))
        .expect("inbound");

        let message = envelope.message;
        assert_eq!(message.channel, Channel::Whatsapp);
        assert_eq!(message.external_user_id, "+5511999990001");
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.body(), Some("Criar proposta"));
        assert_eq!(message.identity_phone(), Some("+5511999990001"));
        assert_eq!(message.message_id.as_deref(), Some("SM123"));
        assert_eq!(message.display_name.as_deref(), Some("Ana"));
        assert!(envelope.media.is_none());
    }

    #[test]
    fn audio_form_becomes_voice_with_media() {
        let envelope = parse_inbound(&form(&[
            ("From", "whatsapp:+5511999990001"),
            ("NumMedia", "1"),
            ("MediaContentType0", "audio/ogg"),
            ("MediaUrl0", "https://api.twilio.com/media/ME1"),
        ]))
        .expect("inbound");

        assert_eq!(envelope.message.kind, MessageKind::VoiceTranscript);
        let media = envelope.media.expect("media");
        assert_eq!(media.locator, "https://api.twilio.com/media/ME1");
        assert_eq!(media.content_type.as_deref(), Some("audio/ogg"));
    }

    #[test]
    fn image_media_is_treated_as_text() {
        let envelope = parse_inbound(&form(&[
            ("From", "whatsapp:+5511999990001"),
            ("NumMedia", "1"),
            ("MediaContentType0", "image/jpeg"),
            ("MediaUrl0", "https://api.twilio.com/media/ME2"),
            ("Body", ""),
        ]))
        .expect("inbound");

        assert_eq!(envelope.message.kind, MessageKind::Text);
        assert_eq!(envelope.message.body(), None);
    }

    #[test]
    fn form_without_sender_is_ignored() {
        assert!(parse_inbound(&form(&[("Body", "oi")])).is_none());
        assert!(parse_inbound(&form(&[("From", "whatsapp:"), ("Body", "oi")])).is_none());
    }

    #[test]
    fn quick_replies_render_as_numbered_menu() {
        let message = OutboundMessage::new("O que deseja fazer?")
            .with_quick_replies(["Criar proposta", "Ver status"]);

        assert_eq!(render_body(&message), "O que deseja fazer?\n\n1. Criar proposta\n2. Ver status");
        assert_eq!(render_body(&OutboundMessage::new("ok")), "ok");
    }

    #[test]
    fn addresses_get_channel_prefix_once() {
        assert_eq!(to_address("+5511999990001"), "whatsapp:+5511999990001");
        assert_eq!(to_address("whatsapp:+5511999990001"), "whatsapp:+5511999990001");
    }
}
