//! Chat channel transports for propbot.
//!
//! - **Telegram** (`telegram`) - Bot API update parsing, `sendMessage` with reply keyboards,
//!   voice download through `getFile`
//! - **WhatsApp** (`whatsapp`) - Twilio form-encoded webhooks and `Messages.json` delivery,
//!   quick replies rendered as a numbered menu
//! - **Transport** (`transport`) - the `ChannelTransport` seam shared by both, plus a recording
//!   double for tests
//!
//! ```text
//! Webhook → parse → InboundEnvelope → ConversationRuntime → OutboundMessage → ChannelTransport
//! ```

pub mod telegram;
pub mod transport;
pub mod whatsapp;

pub use telegram::TelegramTransport;
pub use transport::{
    ChannelTransport, InboundEnvelope, MediaPayload, MediaRef, RecordingTransport, TransportError,
    TransportSet,
};
pub use whatsapp::WhatsappTransport;
