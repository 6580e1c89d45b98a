use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::draft::ProposalDraft;
use crate::domain::identity::OperatorId;
use crate::domain::message::Channel;
use crate::domain::proposal::ProposalId;
use crate::flows::states::Step;

/// Upper bound of provider message ids remembered per session.
pub const RECENT_MESSAGE_WINDOW: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub channel: Channel,
    pub external_user_id: String,
}

impl SessionKey {
    pub fn new(channel: Channel, external_user_id: impl Into<String>) -> Self {
        Self { channel, external_user_id: external_user_id.into() }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel, self.external_user_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub channel: Channel,
    pub external_user_id: String,
    pub step: Step,
    pub draft: ProposalDraft,
    pub resolved_operator_id: Option<OperatorId>,
    pub last_proposal_id: Option<ProposalId>,
    pub extraction_failures: u32,
    /// Set when the last commit attempt failed; the next message retries it.
    pub commit_pending: bool,
    pub recent_message_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            channel: key.channel,
            external_user_id: key.external_user_id,
            step: Step::Start,
            draft: ProposalDraft::default(),
            resolved_operator_id: None,
            last_proposal_id: None,
            extraction_failures: 0,
            commit_pending: false,
            recent_message_ids: Vec::new(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.channel, self.external_user_id.clone())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Binds the session to an operator. The first binding wins.
    pub fn bind_operator(&mut self, operator_id: OperatorId) {
        if self.resolved_operator_id.is_none() {
            self.resolved_operator_id = Some(operator_id);
        }
    }

    pub fn has_seen(&self, message_id: &str) -> bool {
        self.recent_message_ids.iter().any(|seen| seen == message_id)
    }

    pub fn remember_message(&mut self, message_id: &str) {
        if self.has_seen(message_id) {
            return;
        }
        self.recent_message_ids.push(message_id.to_owned());
        if self.recent_message_ids.len() > RECENT_MESSAGE_WINDOW {
            let overflow = self.recent_message_ids.len() - RECENT_MESSAGE_WINDOW;
            self.recent_message_ids.drain(..overflow);
        }
    }

    /// Drops everything scoped to the proposal being built, keeping identity.
    pub fn reset_proposal(&mut self) {
        self.draft = ProposalDraft::default();
        self.last_proposal_id = None;
        self.extraction_failures = 0;
        self.commit_pending = false;
    }

    /// Replaces the conversation with a fresh one under the same key. Identity must be
    /// resolved again.
    pub fn restart(&mut self) {
        self.reset_proposal();
        self.step = Step::Start;
        self.resolved_operator_id = None;
    }
}
