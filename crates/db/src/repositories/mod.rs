use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use thiserror::Error;

use propbot_core::domain::identity::{NewOperator, OperatorProfile, TransportAddress};
use propbot_core::domain::proposal::{Client, NewClient, NewProposal, Proposal};
use propbot_core::{Channel, OperatorId, ProposalId, ProposalSummary, Session, SessionKey};

pub mod memory;
pub mod operator;
pub mod proposal;
pub mod session;

pub use memory::{InMemoryOperatorDirectory, InMemoryProposalRepository, InMemorySessionStore};
pub use operator::SqlOperatorDirectory;
pub use proposal::SqlProposalRepository;
pub use session::SqlSessionStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
}

/// Durable conversation state, one row per (channel, external user).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the live session for `key`. Expired rows are deleted and reported as absent.
    async fn load(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError>;

    /// Upserts the whole session and slides its expiry to `now + ttl`.
    async fn save(&self, session: Session, now: DateTime<Utc>) -> Result<Session, RepositoryError>;

    async fn delete(&self, key: &SessionKey) -> Result<(), RepositoryError>;

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait OperatorDirectory: Send + Sync {
    /// Operators whose profile or company phone digits equal `digits`.
    async fn find_by_phone_digits(
        &self,
        digits: &str,
    ) -> Result<Vec<OperatorProfile>, RepositoryError>;

    /// Operators whose stored digits contain `digits` or are contained by it.
    async fn find_by_phone_containing(
        &self,
        digits: &str,
        limit: u32,
    ) -> Result<Vec<OperatorProfile>, RepositoryError>;

    async fn link_transport(
        &self,
        operator_id: &OperatorId,
        channel: Channel,
        transport_id: &str,
    ) -> Result<(), RepositoryError>;

    async fn transport_address(
        &self,
        operator_id: &OperatorId,
    ) -> Result<Option<TransportAddress>, RepositoryError>;

    async fn register_operator(&self, operator: NewOperator)
        -> Result<OperatorId, RepositoryError>;
}

#[async_trait]
pub trait ProposalRepository: Send + Sync {
    /// Case-insensitive lookup among the operator's own clients.
    async fn find_client_by_name(
        &self,
        operator_id: &OperatorId,
        name: &str,
    ) -> Result<Option<Client>, RepositoryError>;

    async fn create_client(&self, client: NewClient) -> Result<Client, RepositoryError>;

    async fn create_proposal(&self, proposal: NewProposal) -> Result<ProposalId, RepositoryError>;

    async fn list_recent(
        &self,
        operator_id: &OperatorId,
        limit: u32,
    ) -> Result<Vec<ProposalSummary>, RepositoryError>;

    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError>;

    /// Flags the proposal as sent and records its public link.
    async fn mark_sent(&self, id: &ProposalId, public_url: &str) -> Result<(), RepositoryError>;
}

pub(crate) fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fixed-width RFC 3339 so that text comparison in SQL orders like time.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_date(
    column: &str,
    value: Option<String>,
) -> Result<Option<NaiveDate>, RepositoryError> {
    value
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|error| {
                RepositoryError::Decode(format!("invalid date in `{column}`: `{raw}` ({error})"))
            })
        })
        .transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}
