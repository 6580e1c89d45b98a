use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::identity::OperatorId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Sent,
    Viewed,
    Accepted,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "viewed" => Some(Self::Viewed),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "Rascunho",
            Self::Sent => "Enviada",
            Self::Viewed => "Visualizada",
            Self::Accepted => "Aceita",
            Self::Rejected => "Recusada",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub operator_id: OperatorId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewClient {
    pub operator_id: OperatorId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewProposal {
    pub operator_id: OperatorId,
    pub client_id: Option<ClientId>,
    pub title: String,
    pub service_description: Option<String>,
    pub detailed_description: Option<String>,
    pub value: Decimal,
    pub delivery_time: String,
    pub validity_date: Option<NaiveDate>,
    pub observations: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub operator_id: OperatorId,
    pub client_id: Option<ClientId>,
    pub title: String,
    pub value: Decimal,
    pub delivery_time: String,
    pub validity_date: Option<NaiveDate>,
    pub status: ProposalStatus,
    pub public_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One line of the operator's recent-proposal listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSummary {
    pub id: ProposalId,
    pub title: String,
    pub client_name: Option<String>,
    pub value: Decimal,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
}
