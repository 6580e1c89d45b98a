use serde::{Deserialize, Serialize};

use crate::domain::draft::{DraftField, ProposalDraft};
use crate::domain::message::{Channel, OutboundMessage};
use crate::domain::proposal::{ProposalId, ProposalSummary};
use crate::domain::session::Session;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Start,
    MainMenu,
    DescribeProject,
    CollectClientName,
    CollectClientEmail,
    CollectClientPhone,
    CollectTitle,
    CollectServiceDescription,
    CollectDetailedDescription,
    CollectValue,
    CollectDeliveryTime,
    CollectValidityDate,
    CollectObservations,
    OfferEmailSend,
    AskClientEmail,
    GetClientEmail,
}

impl Step {
    pub const ALL: [Step; 16] = [
        Step::Start,
        Step::MainMenu,
        Step::DescribeProject,
        Step::CollectClientName,
        Step::CollectClientEmail,
        Step::CollectClientPhone,
        Step::CollectTitle,
        Step::CollectServiceDescription,
        Step::CollectDetailedDescription,
        Step::CollectValue,
        Step::CollectDeliveryTime,
        Step::CollectValidityDate,
        Step::CollectObservations,
        Step::OfferEmailSend,
        Step::AskClientEmail,
        Step::GetClientEmail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::MainMenu => "main_menu",
            Self::DescribeProject => "describe_project",
            Self::CollectClientName => "collect_client_name",
            Self::CollectClientEmail => "collect_client_email",
            Self::CollectClientPhone => "collect_client_phone",
            Self::CollectTitle => "collect_title",
            Self::CollectServiceDescription => "collect_service_description",
            Self::CollectDetailedDescription => "collect_detailed_description",
            Self::CollectValue => "collect_value",
            Self::CollectDeliveryTime => "collect_delivery_time",
            Self::CollectValidityDate => "collect_validity_date",
            Self::CollectObservations => "collect_observations",
            Self::OfferEmailSend => "offer_email_send",
            Self::AskClientEmail => "ask_client_email",
            Self::GetClientEmail => "get_client_email",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.as_str() == raw)
    }

    /// Draft field written by a structured-flow step.
    pub fn collected_field(&self) -> Option<DraftField> {
        match self {
            Self::CollectClientName => Some(DraftField::ClientName),
            Self::CollectClientEmail => Some(DraftField::ClientEmail),
            Self::CollectClientPhone => Some(DraftField::ClientPhone),
            Self::CollectTitle => Some(DraftField::Title),
            Self::CollectServiceDescription => Some(DraftField::ServiceDescription),
            Self::CollectDetailedDescription => Some(DraftField::DetailedDescription),
            Self::CollectValue => Some(DraftField::Value),
            Self::CollectDeliveryTime => Some(DraftField::DeliveryTime),
            Self::CollectValidityDate => Some(DraftField::ValidityDate),
            Self::CollectObservations => Some(DraftField::Observations),
            _ => None,
        }
    }

    /// Next step of the structured chain. `None` after the last field.
    pub fn next_collect(&self) -> Option<Step> {
        match self {
            Self::CollectClientName => Some(Self::CollectClientEmail),
            Self::CollectClientEmail => Some(Self::CollectClientPhone),
            Self::CollectClientPhone => Some(Self::CollectTitle),
            Self::CollectTitle => Some(Self::CollectServiceDescription),
            Self::CollectServiceDescription => Some(Self::CollectDetailedDescription),
            Self::CollectDetailedDescription => Some(Self::CollectValue),
            Self::CollectValue => Some(Self::CollectDeliveryTime),
            Self::CollectDeliveryTime => Some(Self::CollectValidityDate),
            Self::CollectValidityDate => Some(Self::CollectObservations),
            _ => None,
        }
    }

    pub fn is_optional_collect(&self) -> bool {
        matches!(
            self,
            Self::CollectClientEmail
                | Self::CollectClientPhone
                | Self::CollectDetailedDescription
                | Self::CollectObservations
        )
    }

    pub fn is_post_commit(&self) -> bool {
        matches!(self, Self::OfferEmailSend | Self::AskClientEmail | Self::GetClientEmail)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which step chain fills the draft.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    AiAssisted,
    Structured,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiAssisted => "ai_assisted",
            Self::Structured => "structured",
        }
    }
}

impl std::str::FromStr for FlowKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ai" | "ai_assisted" => Ok(Self::AiAssisted),
            "structured" | "manual" => Ok(Self::Structured),
            other => Err(format!("unsupported flow `{other}` (expected ai|structured)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelFlows {
    pub telegram: FlowKind,
    pub whatsapp: FlowKind,
}

impl Default for ChannelFlows {
    fn default() -> Self {
        Self { telegram: FlowKind::AiAssisted, whatsapp: FlowKind::Structured }
    }
}

impl ChannelFlows {
    pub fn for_channel(&self, channel: Channel) -> FlowKind {
        match channel {
            Channel::Telegram => self.telegram,
            Channel::Whatsapp => self.whatsapp,
        }
    }
}

/// Side effect requested by the machine. The runtime executes it and feeds the
/// outcome back through the matching `on_*` entry point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Extract { text: String },
    Commit,
    SendEmail { proposal_id: ProposalId, recipient: String },
    ListRecent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionUpdate {
    Persist,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub session: Session,
    pub update: SessionUpdate,
    pub outbound: Vec<OutboundMessage>,
    pub effect: Option<Effect>,
}

impl Transition {
    pub fn persist(session: Session, outbound: Vec<OutboundMessage>) -> Self {
        Self { session, update: SessionUpdate::Persist, outbound, effect: None }
    }

    pub fn delete(session: Session, outbound: Vec<OutboundMessage>) -> Self {
        Self { session, update: SessionUpdate::Delete, outbound, effect: None }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectError(pub String);

impl std::fmt::Display for EffectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub type ExtractionOutcome = Result<ProposalDraft, EffectError>;
pub type CommitOutcome = Result<ProposalId, EffectError>;
pub type EmailOutcome = Result<String, EffectError>;
pub type StatusOutcome = Result<Vec<ProposalSummary>, EffectError>;

#[cfg(test)]
mod tests {
    use super::{FlowKind, Step};

    #[test]
    fn step_tokens_round_trip_through_their_names() {
        for step in Step::ALL {
            assert_eq!(Step::parse(step.as_str()), Some(step));
        }
        assert_eq!(Step::parse("unknown_step"), None);
    }

    #[test]
    fn structured_chain_ends_at_observations() {
        let mut step = Step::CollectClientName;
        let mut visited = vec![step];
        while let Some(next) = step.next_collect() {
            visited.push(next);
            step = next;
        }

        assert_eq!(step, Step::CollectObservations);
        assert_eq!(visited.len(), 10);
        assert!(visited.iter().all(|step| step.collected_field().is_some()));
    }

    #[test]
    fn flow_kind_parses_aliases() {
        assert_eq!("ai".parse::<FlowKind>(), Ok(FlowKind::AiAssisted));
        assert_eq!("Manual".parse::<FlowKind>(), Ok(FlowKind::Structured));
        assert!("voice".parse::<FlowKind>().is_err());
    }
}
