use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use propbot_channels::{TransportError, TransportSet};
use propbot_core::{Channel, OperatorId, OutboundMessage};
use propbot_db::{OperatorDirectory, RepositoryError};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("operator `{0}` has no reachable chat address")]
    Unreachable(String),
    #[error("every channel failed, last error: {0}")]
    Delivery(#[from] TransportError),
}

/// Pushes out-of-band messages to operators through the chat ids stored when they first
/// identified themselves. Telegram is tried before WhatsApp.
pub struct OperatorNotifier {
    directory: Arc<dyn OperatorDirectory>,
    transports: TransportSet,
}

impl OperatorNotifier {
    pub fn new(directory: Arc<dyn OperatorDirectory>, transports: TransportSet) -> Self {
        Self { directory, transports }
    }

    pub async fn notify(&self, operator_id: &OperatorId, text: &str) -> Result<Channel, NotifyError> {
        let address = self.directory.transport_address(operator_id).await?.unwrap_or_default();
        let routes = [
            (Channel::Telegram, address.telegram_chat_id),
            (Channel::Whatsapp, address.whatsapp_id),
        ];

        let message = OutboundMessage::new(text);
        let mut last_error = None;
        for (channel, recipient) in routes {
            let (Some(recipient), Some(transport)) = (recipient, self.transports.get(channel))
            else {
                continue;
            };
            match transport.send(&recipient, &message).await {
                Ok(()) => {
                    info!(operator_id = %operator_id.0, channel = %channel, "operator notified");
                    return Ok(channel);
                }
                Err(error) => {
                    warn!(operator_id = %operator_id.0, channel = %channel, error = %error, "operator notification failed");
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) => Err(NotifyError::Delivery(error)),
            None => Err(NotifyError::Unreachable(operator_id.0.clone())),
        }
    }
}
