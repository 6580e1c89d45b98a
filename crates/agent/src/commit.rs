use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use propbot_core::config::EmailConfig;
use propbot_core::domain::proposal::{NewClient, NewProposal};
use propbot_core::errors::DomainError;
use propbot_core::{ClientId, OperatorId, ProposalDraft, ProposalId, ProposalSummary};
use propbot_db::{ProposalRepository, RepositoryError};

use crate::resilience::{retry_with_timeout, AttemptError, RetryPolicy};

#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("client could not be created: {0}")]
    ClientCreation(#[source] RepositoryError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("proposal `{0}` not found")]
    UnknownProposal(String),
    #[error("email dispatch failed: {0}")]
    Dispatch(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmailRequest {
    pub proposal_id: String,
    pub recipient_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailResponse {
    #[serde(default)]
    public_url: String,
}

/// External service that emails the proposal and returns its public link.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    async fn dispatch(&self, request: &EmailRequest) -> Result<String, CommitError>;
}

pub struct HttpEmailDispatcher {
    client: HttpClient,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpEmailDispatcher {
    pub fn new(endpoint: &str, api_key: Option<SecretString>) -> Result<Self, CommitError> {
        let client =
            HttpClient::builder().build().map_err(|error| CommitError::Dispatch(error.to_string()))?;
        Ok(Self { client, endpoint: endpoint.to_owned(), api_key })
    }
}

#[async_trait]
impl EmailDispatcher for HttpEmailDispatcher {
    async fn dispatch(&self, request: &EmailRequest) -> Result<String, CommitError> {
        let mut call = self.client.post(&self.endpoint).json(request);
        if let Some(api_key) = &self.api_key {
            call = call.bearer_auth(api_key.expose_secret());
        }

        let response =
            call.send().await.map_err(|error| CommitError::Dispatch(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CommitError::Dispatch(format!("status {}: {body}", status.as_u16())));
        }

        let payload: EmailResponse =
            response.json().await.map_err(|error| CommitError::Dispatch(error.to_string()))?;
        Ok(payload.public_url)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledEmailDispatcher;

#[async_trait]
impl EmailDispatcher for DisabledEmailDispatcher {
    async fn dispatch(&self, _request: &EmailRequest) -> Result<String, CommitError> {
        Err(CommitError::Dispatch("email dispatch is not configured".to_owned()))
    }
}

pub fn email_dispatcher_from_config(
    config: &EmailConfig,
) -> Result<Arc<dyn EmailDispatcher>, CommitError> {
    match config.endpoint.as_deref() {
        Some(endpoint) => Ok(Arc::new(HttpEmailDispatcher::new(endpoint, config.api_key.clone())?)),
        None => Ok(Arc::new(DisabledEmailDispatcher)),
    }
}

/// Captures dispatched emails and answers with a link derived from the proposal id.
#[derive(Default)]
pub struct RecordingEmailDispatcher {
    sent: Mutex<Vec<EmailRequest>>,
    fail: AtomicBool,
}

impl RecordingEmailDispatcher {
    pub fn failing() -> Self {
        Self { sent: Mutex::default(), fail: AtomicBool::new(true) }
    }

    pub async fn sent(&self) -> Vec<EmailRequest> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailDispatcher for RecordingEmailDispatcher {
    async fn dispatch(&self, request: &EmailRequest) -> Result<String, CommitError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CommitError::Dispatch("recording dispatcher set to fail".to_owned()));
        }
        self.sent.lock().await.push(request.clone());
        Ok(format!("https://propostas.example/p/{}", request.proposal_id))
    }
}

/// Persists completed drafts and performs the follow-up actions on them.
pub struct ProposalCommitService {
    proposals: Arc<dyn ProposalRepository>,
    email: Arc<dyn EmailDispatcher>,
    policy: RetryPolicy,
    recent_limit: u32,
}

impl ProposalCommitService {
    pub fn new(
        proposals: Arc<dyn ProposalRepository>,
        email: Arc<dyn EmailDispatcher>,
        policy: RetryPolicy,
        recent_limit: u32,
    ) -> Self {
        Self { proposals, email, policy, recent_limit }
    }

    /// Creates the client when needed, then the proposal. The proposal is never written when
    /// client creation was attempted and failed.
    pub async fn commit(
        &self,
        operator_id: &OperatorId,
        draft: &ProposalDraft,
    ) -> Result<ProposalId, CommitError> {
        let missing = draft.missing_required();
        if !missing.is_empty() {
            return Err(DomainError::IncompleteDraft { missing }.into());
        }
        let (Some(title), Some(value), Some(delivery_time)) =
            (draft.title.as_deref(), draft.value, draft.delivery_time.as_deref())
        else {
            return Err(DomainError::InvariantViolation("complete draft without fields".into()).into());
        };

        let client_id = match draft.client_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(self.ensure_client(operator_id, name, draft).await?),
            _ => None,
        };

        let proposal_id = self
            .proposals
            .create_proposal(NewProposal {
                operator_id: operator_id.clone(),
                client_id,
                title: title.trim().to_owned(),
                service_description: draft.service_description.clone(),
                detailed_description: draft.detailed_description.clone(),
                value,
                delivery_time: delivery_time.trim().to_owned(),
                validity_date: draft.validity_date,
                observations: draft.observations.clone(),
            })
            .await?;

        info!(operator_id = %operator_id.0, proposal_id = %proposal_id.0, "proposal committed");
        Ok(proposal_id)
    }

    async fn ensure_client(
        &self,
        operator_id: &OperatorId,
        name: &str,
        draft: &ProposalDraft,
    ) -> Result<ClientId, CommitError> {
        if let Some(existing) = self.proposals.find_client_by_name(operator_id, name).await? {
            return Ok(existing.id);
        }

        let created = self
            .proposals
            .create_client(NewClient {
                operator_id: operator_id.clone(),
                name: name.to_owned(),
                email: draft.client_email.clone(),
                phone: draft.client_phone.clone(),
            })
            .await
            .map_err(CommitError::ClientCreation)?;
        info!(operator_id = %operator_id.0, client_id = %created.id.0, "client created");
        Ok(created.id)
    }

    /// Emails the proposal and returns its public link. A failed dispatch leaves the proposal
    /// untouched.
    pub async fn send_by_email(
        &self,
        proposal_id: &ProposalId,
        recipient: &str,
    ) -> Result<String, CommitError> {
        let proposal = self
            .proposals
            .find_proposal(proposal_id)
            .await?
            .ok_or_else(|| CommitError::UnknownProposal(proposal_id.0.clone()))?;

        let request = EmailRequest {
            proposal_id: proposal_id.0.clone(),
            recipient_email: recipient.trim().to_owned(),
            subject: Some(format!("Proposta: {}", proposal.title)),
            message: None,
        };
        let public_url = retry_with_timeout(&self.policy, "email.dispatch", || {
            self.email.dispatch(&request)
        })
        .await
        .map_err(|error| match error {
            AttemptError::Timeout(elapsed) => {
                CommitError::Dispatch(format!("timed out after {elapsed:?}"))
            }
            AttemptError::Failed(inner) => inner,
        })?;

        if let Err(error) = self.proposals.mark_sent(proposal_id, &public_url).await {
            warn!(proposal_id = %proposal_id.0, error = %error, "email sent but status not updated");
        }
        info!(proposal_id = %proposal_id.0, "proposal emailed");
        Ok(public_url)
    }

    pub async fn recent(&self, operator_id: &OperatorId) -> Result<Vec<ProposalSummary>, CommitError> {
        Ok(self.proposals.list_recent(operator_id, self.recent_limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use propbot_core::{OperatorId, ProposalDraft, ProposalStatus};
    use propbot_db::repositories::InMemoryProposalRepository;
    use propbot_db::ProposalRepository;

    use super::{CommitError, ProposalCommitService, RecordingEmailDispatcher};
    use crate::resilience::RetryPolicy;

    fn operator() -> OperatorId {
        OperatorId("op-1".to_owned())
    }

    fn draft(client: &str) -> ProposalDraft {
        ProposalDraft {
            client_name: Some(client.to_owned()),
            client_email: Some("joao@example.com".to_owned()),
            title: Some("Reforma de banheiro".to_owned()),
            value: Some(Decimal::new(3000, 0)),
            delivery_time: Some("10 dias".to_owned()),
            ..ProposalDraft::default()
        }
    }

    fn service(
        repository: Arc<InMemoryProposalRepository>,
        email: Arc<RecordingEmailDispatcher>,
    ) -> ProposalCommitService {
        let policy =
            RetryPolicy { timeout: Duration::from_millis(200), ..RetryPolicy::new(1, 1) }
                .without_delay();
        ProposalCommitService::new(repository, email, policy, 10)
    }

    #[tokio::test]
    async fn commit_reuses_existing_client_case_insensitively() {
        let repository = Arc::new(InMemoryProposalRepository::default());
        let service = service(repository.clone(), Arc::new(RecordingEmailDispatcher::default()));

        service.commit(&operator(), &draft("João Silva")).await.expect("first");
        service.commit(&operator(), &draft("joão silva")).await.expect("second");

        assert_eq!(repository.clients().await.len(), 1);
        let proposals = repository.proposals().await;
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].client_id, proposals[1].client_id);
        assert_eq!(proposals[0].status, ProposalStatus::Draft);
    }

    #[tokio::test]
    async fn failed_client_creation_skips_proposal() {
        let repository = Arc::new(InMemoryProposalRepository::default());
        repository.fail_client_creation(true);
        let service = service(repository.clone(), Arc::new(RecordingEmailDispatcher::default()));

        let error = service.commit(&operator(), &draft("Maria")).await.expect_err("fails");

        assert!(matches!(error, CommitError::ClientCreation(_)));
        assert!(repository.proposals().await.is_empty());
    }

    #[tokio::test]
    async fn incomplete_draft_is_rejected() {
        let repository = Arc::new(InMemoryProposalRepository::default());
        let service = service(repository.clone(), Arc::new(RecordingEmailDispatcher::default()));
        let incomplete = ProposalDraft { value: None, ..draft("Maria") };

        assert!(matches!(
            service.commit(&operator(), &incomplete).await,
            Err(CommitError::Domain(_))
        ));
        assert!(repository.clients().await.is_empty());
    }

    #[tokio::test]
    async fn email_marks_proposal_sent() {
        let repository = Arc::new(InMemoryProposalRepository::default());
        let email = Arc::new(RecordingEmailDispatcher::default());
        let service = service(repository.clone(), email.clone());
        let proposal_id = service.commit(&operator(), &draft("João")).await.expect("commit");

        let url = service.send_by_email(&proposal_id, "joao@example.com").await.expect("email");

        assert!(url.ends_with(&proposal_id.0));
        let sent = email.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient_email, "joao@example.com");
        assert_eq!(sent[0].subject.as_deref(), Some("Proposta: Reforma de banheiro"));
        let stored = repository.find_proposal(&proposal_id).await.expect("query").expect("row");
        assert_eq!(stored.status, ProposalStatus::Sent);
        assert_eq!(stored.public_url.as_deref(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn email_failure_leaves_proposal_as_draft() {
        let repository = Arc::new(InMemoryProposalRepository::default());
        let service = service(repository.clone(), Arc::new(RecordingEmailDispatcher::failing()));
        let proposal_id = service.commit(&operator(), &draft("João")).await.expect("commit");

        let error = service.send_by_email(&proposal_id, "joao@example.com").await.expect_err("fails");

        assert!(matches!(error, CommitError::Dispatch(_)));
        let stored = repository.find_proposal(&proposal_id).await.expect("query").expect("row");
        assert_eq!(stored.status, ProposalStatus::Draft);
    }

    #[tokio::test]
    async fn recent_is_scoped_to_operator() {
        let repository = Arc::new(InMemoryProposalRepository::default());
        let service = service(repository.clone(), Arc::new(RecordingEmailDispatcher::default()));
        service.commit(&operator(), &draft("João")).await.expect("commit");
        service.commit(&OperatorId("op-2".to_owned()), &draft("Ana")).await.expect("commit");

        let recent = service.recent(&operator()).await.expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].client_name.as_deref(), Some("João"));
    }
}
