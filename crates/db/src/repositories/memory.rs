use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use propbot_core::domain::identity::{
    normalize_phone, NewOperator, OperatorProfile, TransportAddress,
};
use propbot_core::domain::proposal::{Client, ClientId, NewClient, NewProposal, Proposal};
use propbot_core::{
    Channel, OperatorId, ProposalId, ProposalStatus, ProposalSummary, Session, SessionKey,
};

use super::proposal::fold_name;
use super::{
    new_record_id, OperatorDirectory, ProposalRepository, RepositoryError, SessionStore,
};

const MIN_CONTAINMENT_DIGITS: usize = 10;

pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, Session>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(key) {
            Some(session) if session.is_expired(now) => {
                sessions.remove(key);
                Ok(None)
            }
            Some(session) => Ok(Some(session.clone())),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        mut session: Session,
        now: DateTime<Utc>,
    ) -> Result<Session, RepositoryError> {
        session.expires_at = now + self.ttl;
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.key(), session.clone());
        Ok(session)
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), RepositoryError> {
        self.sessions.write().await.remove(key);
        Ok(())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[derive(Clone, Debug)]
struct OperatorRecord {
    display_name: Option<String>,
    phone_digits: Vec<String>,
    address: TransportAddress,
}

#[derive(Default)]
pub struct InMemoryOperatorDirectory {
    operators: RwLock<Vec<(OperatorId, OperatorRecord)>>,
}

impl InMemoryOperatorDirectory {
    /// Registers an operator under a fixed id with any number of phone numbers.
    pub async fn insert(&self, id: &str, display_name: Option<&str>, phones: &[&str]) {
        let record = OperatorRecord {
            display_name: display_name.map(str::to_owned),
            phone_digits: phones.iter().map(|phone| normalize_phone(phone)).collect(),
            address: TransportAddress::default(),
        };
        self.operators.write().await.push((OperatorId(id.to_owned()), record));
    }

    fn matching(
        operators: &[(OperatorId, OperatorRecord)],
        predicate: impl Fn(&str) -> bool,
    ) -> Vec<OperatorProfile> {
        operators
            .iter()
            .flat_map(|(id, record)| {
                record.phone_digits.iter().filter(|digits| predicate(digits)).map(|digits| {
                    OperatorProfile {
                        id: id.clone(),
                        display_name: record.display_name.clone(),
                        phone_digits: digits.clone(),
                    }
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl OperatorDirectory for InMemoryOperatorDirectory {
    async fn find_by_phone_digits(
        &self,
        digits: &str,
    ) -> Result<Vec<OperatorProfile>, RepositoryError> {
        if digits.is_empty() {
            return Ok(Vec::new());
        }
        let operators = self.operators.read().await;
        Ok(Self::matching(&operators, |stored| stored == digits))
    }

    async fn find_by_phone_containing(
        &self,
        digits: &str,
        limit: u32,
    ) -> Result<Vec<OperatorProfile>, RepositoryError> {
        if digits.is_empty() {
            return Ok(Vec::new());
        }
        let operators = self.operators.read().await;
        let mut found = Self::matching(&operators, |stored| {
            stored.len() >= MIN_CONTAINMENT_DIGITS
                && (stored.contains(digits) || digits.contains(stored))
        });
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn link_transport(
        &self,
        operator_id: &OperatorId,
        channel: Channel,
        transport_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut operators = self.operators.write().await;
        let (_, record) = operators.iter_mut().find(|(id, _)| id == operator_id).ok_or_else(
            || RepositoryError::NotFound { entity: "operator", id: operator_id.0.clone() },
        )?;
        match channel {
            Channel::Telegram => record.address.telegram_chat_id = Some(transport_id.to_owned()),
            Channel::Whatsapp => record.address.whatsapp_id = Some(transport_id.to_owned()),
        }
        Ok(())
    }

    async fn transport_address(
        &self,
        operator_id: &OperatorId,
    ) -> Result<Option<TransportAddress>, RepositoryError> {
        let operators = self.operators.read().await;
        Ok(operators
            .iter()
            .find(|(id, _)| id == operator_id)
            .map(|(_, record)| record.address.clone()))
    }

    async fn register_operator(
        &self,
        operator: NewOperator,
    ) -> Result<OperatorId, RepositoryError> {
        let id = OperatorId(new_record_id());
        let mut phone_digits = vec![normalize_phone(&operator.phone)];
        if let Some(company_phone) = operator.company_phone.as_deref() {
            phone_digits.push(normalize_phone(company_phone));
        }
        let record = OperatorRecord {
            display_name: operator.display_name,
            phone_digits,
            address: TransportAddress::default(),
        };
        self.operators.write().await.push((id.clone(), record));
        Ok(id)
    }
}

/// Proposal store with switches to make client or proposal creation fail.
#[derive(Default)]
pub struct InMemoryProposalRepository {
    clients: RwLock<Vec<Client>>,
    proposals: RwLock<Vec<Proposal>>,
    fail_client_creation: AtomicBool,
    fail_proposal_creation: AtomicBool,
}

impl InMemoryProposalRepository {
    pub fn fail_client_creation(&self, fail: bool) {
        self.fail_client_creation.store(fail, Ordering::SeqCst);
    }

    pub fn fail_proposal_creation(&self, fail: bool) {
        self.fail_proposal_creation.store(fail, Ordering::SeqCst);
    }

    pub async fn clients(&self) -> Vec<Client> {
        self.clients.read().await.clone()
    }

    pub async fn proposals(&self) -> Vec<Proposal> {
        self.proposals.read().await.clone()
    }
}

#[async_trait::async_trait]
impl ProposalRepository for InMemoryProposalRepository {
    async fn find_client_by_name(
        &self,
        operator_id: &OperatorId,
        name: &str,
    ) -> Result<Option<Client>, RepositoryError> {
        let wanted = fold_name(name);
        let clients = self.clients.read().await;
        Ok(clients
            .iter()
            .find(|client| &client.operator_id == operator_id && fold_name(&client.name) == wanted)
            .cloned())
    }

    async fn create_client(&self, client: NewClient) -> Result<Client, RepositoryError> {
        if self.fail_client_creation.load(Ordering::SeqCst) {
            return Err(RepositoryError::Decode("client creation disabled".to_owned()));
        }
        let created = Client {
            id: ClientId(new_record_id()),
            operator_id: client.operator_id,
            name: client.name,
            email: client.email,
            phone: client.phone,
        };
        self.clients.write().await.push(created.clone());
        Ok(created)
    }

    async fn create_proposal(&self, proposal: NewProposal) -> Result<ProposalId, RepositoryError> {
        if self.fail_proposal_creation.load(Ordering::SeqCst) {
            return Err(RepositoryError::Decode("proposal creation disabled".to_owned()));
        }
        let id = ProposalId(new_record_id());
        self.proposals.write().await.push(Proposal {
            id: id.clone(),
            operator_id: proposal.operator_id,
            client_id: proposal.client_id,
            title: proposal.title,
            value: proposal.value,
            delivery_time: proposal.delivery_time,
            validity_date: proposal.validity_date,
            status: ProposalStatus::Draft,
            public_url: None,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list_recent(
        &self,
        operator_id: &OperatorId,
        limit: u32,
    ) -> Result<Vec<ProposalSummary>, RepositoryError> {
        let clients = self.clients.read().await;
        let proposals = self.proposals.read().await;
        Ok(proposals
            .iter()
            .rev()
            .filter(|proposal| &proposal.operator_id == operator_id)
            .take(limit as usize)
            .map(|proposal| ProposalSummary {
                id: proposal.id.clone(),
                title: proposal.title.clone(),
                client_name: proposal.client_id.as_ref().and_then(|client_id| {
                    clients
                        .iter()
                        .find(|client| &client.id == client_id)
                        .map(|client| client.name.clone())
                }),
                value: proposal.value,
                status: proposal.status,
                created_at: proposal.created_at,
            })
            .collect())
    }

    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError> {
        let proposals = self.proposals.read().await;
        Ok(proposals.iter().find(|proposal| &proposal.id == id).cloned())
    }

    async fn mark_sent(&self, id: &ProposalId, public_url: &str) -> Result<(), RepositoryError> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .iter_mut()
            .find(|proposal| &proposal.id == id)
            .ok_or_else(|| RepositoryError::NotFound { entity: "proposal", id: id.0.clone() })?;
        proposal.status = ProposalStatus::Sent;
        proposal.public_url = Some(public_url.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use propbot_core::{Channel, Session, SessionKey};

    use super::{InMemoryOperatorDirectory, InMemorySessionStore};
    use crate::repositories::{OperatorDirectory, SessionStore};

    #[tokio::test]
    async fn in_memory_session_store_expires_lazily() {
        let store = InMemorySessionStore::new(Duration::hours(1));
        let now = Utc::now();
        let key = SessionKey::new(Channel::Telegram, "1");

        store.save(Session::new(key.clone(), now, Duration::hours(1)), now).await.expect("save");
        assert!(store.load(&key, now).await.expect("load").is_some());
        assert!(store.load(&key, now + Duration::hours(2)).await.expect("load").is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn in_memory_directory_mirrors_containment_rules() {
        let directory = InMemoryOperatorDirectory::default();
        directory.insert("op-1", Some("Ana"), &["(11) 99999-0001"]).await;
        directory.insert("op-2", None, &["12345"]).await;

        let found = directory.find_by_phone_containing("5511999990001", 5).await.expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.0, "op-1");

        assert!(directory.find_by_phone_containing("912345", 5).await.expect("find").is_empty());
    }
}
