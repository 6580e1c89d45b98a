use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use propbot_channels::{ChannelTransport, InboundEnvelope, MediaRef, TransportSet};
use propbot_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use propbot_core::flows::render;
use propbot_core::flows::{EffectError, SessionUpdate};
use propbot_core::{
    ApplicationError, Channel, ConversationMachine, Effect, Identity, InboundMessage, MessageKind,
    OutboundMessage, Session, SessionKey, Step, Transition,
};
use propbot_db::{OperatorDirectory, RepositoryError, SessionStore};

use crate::commit::ProposalCommitService;
use crate::extraction::ProposalExtractor;
use crate::identity::IdentityResolver;
use crate::transcription::Transcriber;

/// Extraction can request a commit, nothing else chains further.
const MAX_EFFECTS_PER_MESSAGE: usize = 4;
const ACTOR: &str = "conversation-runtime";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no transport configured for channel {0}")]
    NoTransport(Channel),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<RuntimeError> for ApplicationError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::NoTransport(channel) => {
                Self::Configuration(format!("no transport configured for channel {channel}"))
            }
            RuntimeError::Repository(inner) => Self::Persistence(inner.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Message id already processed for this session; nothing was sent or written.
    Duplicate,
    Persisted { step: Step, replies: usize },
    Deleted { replies: usize },
}

/// Collaborators of [`ConversationRuntime`].
pub struct RuntimeDeps {
    pub machine: ConversationMachine,
    pub sessions: Arc<dyn SessionStore>,
    pub directory: Arc<dyn OperatorDirectory>,
    pub extractor: Arc<dyn ProposalExtractor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub commits: Arc<ProposalCommitService>,
    pub transports: TransportSet,
    pub audit: Arc<dyn AuditSink>,
    pub session_ttl: chrono::Duration,
}

/// Handles one inbound message end to end: load, identify, step, run effects, reply, save.
pub struct ConversationRuntime {
    machine: ConversationMachine,
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn OperatorDirectory>,
    resolver: IdentityResolver,
    extractor: Arc<dyn ProposalExtractor>,
    transcriber: Arc<dyn Transcriber>,
    commits: Arc<ProposalCommitService>,
    transports: TransportSet,
    audit: Arc<dyn AuditSink>,
    session_ttl: chrono::Duration,
    turns: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl ConversationRuntime {
    pub fn new(deps: RuntimeDeps) -> Self {
        Self {
            resolver: IdentityResolver::new(deps.directory.clone()),
            machine: deps.machine,
            sessions: deps.sessions,
            directory: deps.directory,
            extractor: deps.extractor,
            transcriber: deps.transcriber,
            commits: deps.commits,
            transports: deps.transports,
            audit: deps.audit,
            session_ttl: deps.session_ttl,
            turns: Mutex::default(),
        }
    }

    pub fn transports(&self) -> &TransportSet {
        &self.transports
    }

    pub async fn handle(&self, envelope: InboundEnvelope) -> Result<HandleOutcome, RuntimeError> {
        let InboundEnvelope { mut message, media } = envelope;
        let channel = message.channel;
        let key = SessionKey::new(channel, message.external_user_id.clone());
        let transport =
            self.transports.get(channel).cloned().ok_or(RuntimeError::NoTransport(channel))?;
        let audit = AuditContext::new(Some(key.clone()), Uuid::new_v4().to_string(), ACTOR);

        // Messages of one session are handled one at a time, so a redelivery waits for the
        // first attempt and then sees its message id.
        let turn = self.turn_lock(&key).await;
        let _turn = turn.lock().await;
        let now = Utc::now();

        let session = self.load_or_start(&key, now).await?;
        if let Some(message_id) = message.message_id.as_deref() {
            if session.has_seen(message_id) {
                info!(correlation_id = %audit.correlation_id, session = %key, message_id, "duplicate delivery dropped");
                return Ok(HandleOutcome::Duplicate);
            }
        }

        if let Some(media) = media.filter(|_| message.kind == MessageKind::VoiceTranscript) {
            if session.resolved_operator_id.is_some() {
                message.text = self.transcribe(transport.as_ref(), &media, &audit).await;
            }
        }

        let identity = if self.machine.needs_identity(&session, &message) {
            match self.identify(&message, &audit).await {
                Ok(identity) => Some(identity),
                Err(error) => {
                    warn!(correlation_id = %audit.correlation_id, session = %key, error = %error, "identity lookup failed");
                    let reply = OutboundMessage::new(render::IDENTITY_UNAVAILABLE);
                    self.deliver(transport.as_ref(), &key, &[reply], &audit).await;
                    self.sessions.delete(&key).await?;
                    return Ok(HandleOutcome::Deleted { replies: 1 });
                }
            }
        } else {
            None
        };

        let transition =
            self.machine.step_with_audit(session, &message, identity.as_ref(), &*self.audit, &audit);
        if transition.effect.is_some() && transition.update == SessionUpdate::Persist {
            // Other replicas must see the message id before slow effects run.
            self.sessions.save(transition.session.clone(), now).await?;
        }
        let (session, update, outbound) = self.run_effects(transition, &audit).await;

        if identity.as_ref().is_some_and(|identity| identity.is_known_operator) {
            self.link_transport(&session, &audit).await;
        }

        self.deliver(transport.as_ref(), &key, &outbound, &audit).await;

        match update {
            SessionUpdate::Persist => {
                let saved = self.sessions.save(session, now).await?;
                debug!(correlation_id = %audit.correlation_id, session = %key, step = %saved.step, "session saved");
                Ok(HandleOutcome::Persisted { step: saved.step, replies: outbound.len() })
            }
            SessionUpdate::Delete => {
                self.sessions.delete(&key).await?;
                info!(correlation_id = %audit.correlation_id, session = %key, "session deleted");
                Ok(HandleOutcome::Deleted { replies: outbound.len() })
            }
        }
    }

    async fn turn_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut turns = self.turns.lock().await;
        turns.retain(|_, turn| Arc::strong_count(turn) > 1);
        turns.entry(key.clone()).or_default().clone()
    }

    async fn load_or_start(
        &self,
        key: &SessionKey,
        now: chrono::DateTime<Utc>,
    ) -> Result<Session, RuntimeError> {
        match self.sessions.load(key, now).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Ok(Session::new(key.clone(), now, self.session_ttl)),
            Err(RepositoryError::Decode(detail)) => {
                warn!(session = %key, detail = %detail, "unreadable session discarded");
                self.sessions.delete(key).await?;
                Ok(Session::new(key.clone(), now, self.session_ttl))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn transcribe(
        &self,
        transport: &dyn ChannelTransport,
        media: &MediaRef,
        audit: &AuditContext,
    ) -> Option<String> {
        let result = match transport.fetch_media(media).await {
            Ok(audio) => self.transcriber.transcribe(&audio).await.map_err(|error| error.to_string()),
            Err(error) => Err(error.to_string()),
        };

        match result {
            Ok(text) => {
                self.emit(audit, "voice.transcribed", AuditCategory::Ingress, AuditOutcome::Success);
                Some(text)
            }
            Err(error) => {
                warn!(correlation_id = %audit.correlation_id, error = %error, "voice transcription failed");
                self.emit(audit, "voice.transcribed", AuditCategory::Ingress, AuditOutcome::Failed);
                None
            }
        }
    }

    async fn identify(
        &self,
        message: &InboundMessage,
        audit: &AuditContext,
    ) -> Result<Identity, RepositoryError> {
        let phone = message.identity_phone().unwrap_or_default();
        let identity = self.resolver.resolve(message.channel, phone).await?;
        let outcome =
            if identity.is_known_operator { AuditOutcome::Success } else { AuditOutcome::Rejected };
        self.emit(audit, "identity.resolved", AuditCategory::Identity, outcome);
        Ok(identity)
    }

    async fn run_effects(
        &self,
        mut transition: Transition,
        audit: &AuditContext,
    ) -> (Session, SessionUpdate, Vec<OutboundMessage>) {
        let mut outbound = std::mem::take(&mut transition.outbound);
        let mut executed = 0;

        while let Some(effect) = transition.effect.take() {
            if executed == MAX_EFFECTS_PER_MESSAGE {
                warn!(correlation_id = %audit.correlation_id, "effect chain cut short");
                break;
            }
            executed += 1;
            transition = self.run_effect(transition.session, effect, audit).await;
            outbound.append(&mut transition.outbound);
        }

        (transition.session, transition.update, outbound)
    }

    async fn run_effect(&self, session: Session, effect: Effect, audit: &AuditContext) -> Transition {
        match effect {
            Effect::Extract { text } => {
                let outcome = self
                    .extractor
                    .extract(&text)
                    .await
                    .map(|result| result.draft)
                    .map_err(|error| EffectError(error.to_string()));
                self.emit_outcome(audit, "effect.extract", AuditCategory::Extraction, &outcome);
                self.machine.on_extraction(session, outcome)
            }
            Effect::Commit => {
                let outcome = match session.resolved_operator_id.as_ref() {
                    Some(operator_id) => self
                        .commits
                        .commit(operator_id, &session.draft)
                        .await
                        .map_err(|error| EffectError(error.to_string())),
                    None => Err(EffectError("session is not bound to an operator".to_owned())),
                };
                self.emit_outcome(audit, "effect.commit", AuditCategory::Persistence, &outcome);
                self.machine.on_commit(session, outcome)
            }
            Effect::SendEmail { proposal_id, recipient } => {
                let outcome = self
                    .commits
                    .send_by_email(&proposal_id, &recipient)
                    .await
                    .map_err(|error| EffectError(error.to_string()));
                self.emit_outcome(audit, "effect.send_email", AuditCategory::Delivery, &outcome);
                self.machine.on_email(session, outcome)
            }
            Effect::ListRecent => {
                let outcome = match session.resolved_operator_id.as_ref() {
                    Some(operator_id) => self
                        .commits
                        .recent(operator_id)
                        .await
                        .map_err(|error| EffectError(error.to_string())),
                    None => Err(EffectError("session is not bound to an operator".to_owned())),
                };
                self.emit_outcome(audit, "effect.list_recent", AuditCategory::Persistence, &outcome);
                self.machine.on_status(session, outcome)
            }
        }
    }

    async fn link_transport(&self, session: &Session, audit: &AuditContext) {
        let Some(operator_id) = session.resolved_operator_id.as_ref() else {
            return;
        };
        if let Err(error) = self
            .directory
            .link_transport(operator_id, session.channel, &session.external_user_id)
            .await
        {
            warn!(correlation_id = %audit.correlation_id, operator_id = %operator_id.0, error = %error, "transport id not stored");
        }
    }

    async fn deliver(
        &self,
        transport: &dyn ChannelTransport,
        key: &SessionKey,
        outbound: &[OutboundMessage],
        audit: &AuditContext,
    ) {
        for message in outbound {
            if let Err(error) = transport.send(&key.external_user_id, message).await {
                warn!(correlation_id = %audit.correlation_id, session = %key, error = %error, "reply not delivered");
                self.emit(audit, "reply.sent", AuditCategory::Delivery, AuditOutcome::Failed);
            }
        }
    }

    fn emit_outcome<T>(
        &self,
        audit: &AuditContext,
        event_type: &str,
        category: AuditCategory,
        outcome: &Result<T, EffectError>,
    ) {
        match outcome {
            Ok(_) => self.emit(audit, event_type, category, AuditOutcome::Success),
            Err(error) => {
                warn!(correlation_id = %audit.correlation_id, event_name = event_type, error = %error, "effect failed");
                self.audit.emit(
                    AuditEvent::new(audit, event_type, category, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
    }

    fn emit(&self, audit: &AuditContext, event_type: &str, category: AuditCategory, outcome: AuditOutcome) {
        self.audit.emit(AuditEvent::new(audit, event_type, category, outcome));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, Utc};
    use rust_decimal::Decimal;

    use propbot_channels::{
        InboundEnvelope, MediaPayload, MediaRef, RecordingTransport, TransportSet,
    };
    use propbot_core::audit::InMemoryAuditSink;
    use propbot_core::flows::render;
    use propbot_core::flows::ChannelFlows;
    use propbot_core::{
        Channel, ConversationMachine, InboundMessage, OperatorId, ProposalStatus, Session,
        SessionKey, Step,
    };
    use propbot_db::repositories::{
        InMemoryOperatorDirectory, InMemoryProposalRepository, InMemorySessionStore,
    };
    use propbot_db::{OperatorDirectory, SessionStore};

    use super::{ConversationRuntime, HandleOutcome, RuntimeDeps};
    use crate::commit::{ProposalCommitService, RecordingEmailDispatcher};
    use crate::extraction::LlmProposalExtractor;
    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::resilience::RetryPolicy;
    use crate::transcription::FixedTranscriber;

    const OPERATOR_PHONE: &str = "11 99999-9999";

    struct Harness {
        runtime: ConversationRuntime,
        sessions: Arc<InMemorySessionStore>,
        directory: Arc<InMemoryOperatorDirectory>,
        proposals: Arc<InMemoryProposalRepository>,
        email: Arc<RecordingEmailDispatcher>,
        telegram: Arc<RecordingTransport>,
        whatsapp: Arc<RecordingTransport>,
        audit: InMemoryAuditSink,
    }

    async fn harness(completions: Vec<Result<String, LlmError>>, transcript: Option<&str>) -> Harness {
        harness_with_llm(ScriptedLlmClient::new(completions), transcript).await
    }

    async fn harness_with_llm(llm: ScriptedLlmClient, transcript: Option<&str>) -> Harness {
        let sessions = Arc::new(InMemorySessionStore::new(Duration::hours(24)));
        let directory = Arc::new(InMemoryOperatorDirectory::default());
        directory.insert("op-1", Some("Carla"), &[OPERATOR_PHONE]).await;
        let proposals = Arc::new(InMemoryProposalRepository::default());
        let email = Arc::new(RecordingEmailDispatcher::default());
        let telegram = Arc::new(
            RecordingTransport::new(Channel::Telegram)
                .with_media(MediaPayload {
                    bytes: vec![0, 1, 2],
                    content_type: "audio/ogg".to_owned(),
                    file_name: "voice.ogg".to_owned(),
                })
                .await,
        );
        let whatsapp = Arc::new(RecordingTransport::new(Channel::Whatsapp));
        let audit = InMemoryAuditSink::default();
        let policy = RetryPolicy::new(1, 0).without_delay();

        let runtime = ConversationRuntime::new(RuntimeDeps {
            machine: ConversationMachine::new(Default::default(), ChannelFlows::default()),
            sessions: sessions.clone(),
            directory: directory.clone(),
            extractor: Arc::new(LlmProposalExtractor::new(Arc::new(llm), policy)),
            transcriber: Arc::new(FixedTranscriber(transcript.map(str::to_owned))),
            commits: Arc::new(ProposalCommitService::new(
                proposals.clone(),
                email.clone(),
                policy,
                10,
            )),
            transports: TransportSet::default().with(telegram.clone()).with(whatsapp.clone()),
            audit: Arc::new(audit.clone()),
            session_ttl: Duration::hours(24),
        });

        Harness { runtime, sessions, directory, proposals, email, telegram, whatsapp, audit }
    }

    fn telegram_text(id: &str, body: &str) -> InboundEnvelope {
        InboundEnvelope::message(InboundMessage::text(Channel::Telegram, "5001", body).with_message_id(id))
    }

    fn whatsapp_text(id: &str, body: &str) -> InboundEnvelope {
        InboundEnvelope::message(
            InboundMessage::text(Channel::Whatsapp, "+5511999999999", body)
                .with_sender_phone("+5511999999999")
                .with_message_id(id),
        )
    }

    async fn session(harness: &Harness, channel: Channel, user: &str) -> Option<Session> {
        harness.sessions.load(&SessionKey::new(channel, user), Utc::now()).await.expect("load")
    }

    async fn identified_on_telegram(harness: &Harness) {
        let contact = InboundMessage::contact(Channel::Telegram, "5001", "11999999999")
            .with_message_id("m-contact");
        harness.runtime.handle(InboundEnvelope::message(contact)).await.expect("contact");
        harness.telegram.clear().await;
    }

    #[tokio::test]
    async fn contact_share_identifies_operator_and_links_chat() {
        let harness = harness(Vec::new(), None).await;
        let contact = InboundMessage::contact(Channel::Telegram, "5001", "11999999999");

        let outcome = harness.runtime.handle(InboundEnvelope::message(contact)).await.expect("handle");

        assert_eq!(outcome, HandleOutcome::Persisted { step: Step::MainMenu, replies: 1 });
        let sent = harness.telegram.sent().await;
        assert_eq!(sent[0].1.quick_replies.len(), 2);
        assert!(sent[0].1.text.contains("Carla"));
        let address = harness
            .directory
            .transport_address(&OperatorId("op-1".to_owned()))
            .await
            .expect("address")
            .expect("known operator");
        assert_eq!(address.telegram_chat_id.as_deref(), Some("5001"));
    }

    #[tokio::test]
    async fn unknown_contact_is_rejected_and_session_removed() {
        let harness = harness(Vec::new(), None).await;
        let contact = InboundMessage::contact(Channel::Telegram, "5001", "+1 202 555 0100");

        let outcome = harness.runtime.handle(InboundEnvelope::message(contact)).await.expect("handle");

        assert_eq!(outcome, HandleOutcome::Deleted { replies: 1 });
        assert_eq!(harness.telegram.sent_texts().await, vec![render::UNKNOWN_OPERATOR]);
        assert!(session(&harness, Channel::Telegram, "5001").await.is_none());
    }

    #[tokio::test]
    async fn described_project_is_committed_and_email_offered() {
        let harness = harness(
            vec![Ok(r#"{"clientName":"João","clientEmail":"joao@cliente.com","title":"Reforma de banheiro","value":3000,"deliveryTime":"10 dias"}"#.to_owned())],
            None,
        )
        .await;
        identified_on_telegram(&harness).await;

        harness.runtime.handle(telegram_text("m-1", "📝 Criar proposta")).await.expect("menu");
        let outcome = harness
            .runtime
            .handle(telegram_text("m-2", "Reforma de banheiro para João, R$3000, prazo 10 dias"))
            .await
            .expect("describe");

        assert_eq!(outcome, HandleOutcome::Persisted { step: Step::OfferEmailSend, replies: 2 });
        let proposals = harness.proposals.proposals().await;
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].value, Decimal::new(3000, 0));
        assert_eq!(harness.proposals.clients().await[0].name, "João");

        let outcome = harness.runtime.handle(telegram_text("m-3", "✅ Enviar por e-mail")).await.expect("send");
        assert_eq!(outcome, HandleOutcome::Persisted { step: Step::MainMenu, replies: 2 });
        assert_eq!(harness.email.sent().await[0].recipient_email, "joao@cliente.com");
        assert_eq!(harness.proposals.proposals().await[0].status, ProposalStatus::Sent);

        let stored = session(&harness, Channel::Telegram, "5001").await.expect("session kept");
        assert_eq!(stored.last_proposal_id, None);
        assert_eq!(stored.resolved_operator_id, Some(OperatorId("op-1".to_owned())));
    }

    #[tokio::test]
    async fn partial_description_lists_missing_fields() {
        let harness =
            harness(vec![Ok(r#"{"serviceDescription":"Pintura da fachada"}"#.to_owned())], None).await;
        identified_on_telegram(&harness).await;

        harness.runtime.handle(telegram_text("m-1", "Criar proposta")).await.expect("menu");
        harness.telegram.clear().await;
        let outcome =
            harness.runtime.handle(telegram_text("m-2", "Pintura da fachada")).await.expect("describe");

        assert_eq!(outcome, HandleOutcome::Persisted { step: Step::DescribeProject, replies: 1 });
        let reply = &harness.telegram.sent_texts().await[0];
        assert!(reply.contains("título da proposta, nome do cliente, valor, prazo de entrega"));
        let stored = session(&harness, Channel::Telegram, "5001").await.expect("session");
        assert_eq!(stored.draft.service_description.as_deref(), Some("Pintura da fachada"));
        assert!(harness.proposals.proposals().await.is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_keeps_step_and_counts() {
        let harness = harness(vec![Ok("desculpe, não entendi".to_owned())], None).await;
        identified_on_telegram(&harness).await;

        harness.runtime.handle(telegram_text("m-1", "Criar proposta")).await.expect("menu");
        harness.telegram.clear().await;
        harness.runtime.handle(telegram_text("m-2", "???")).await.expect("describe");

        assert_eq!(harness.telegram.sent_texts().await, vec![render::EXTRACTION_FAILED]);
        let stored = session(&harness, Channel::Telegram, "5001").await.expect("session");
        assert_eq!(stored.step, Step::DescribeProject);
        assert_eq!(stored.extraction_failures, 1);
    }

    #[tokio::test]
    async fn voice_note_is_transcribed_before_extraction() {
        let harness = harness(
            vec![Ok(r#"{"clientName":"Ana","title":"Site","value":"1.500,00","deliveryTime":"15 dias"}"#.to_owned())],
            Some("site institucional para a Ana por mil e quinhentos em 15 dias"),
        )
        .await;
        identified_on_telegram(&harness).await;
        harness.runtime.handle(telegram_text("m-1", "Criar proposta")).await.expect("menu");

        let voice = InboundEnvelope::with_media(
            InboundMessage::voice(Channel::Telegram, "5001").with_message_id("m-2"),
            MediaRef { channel: Channel::Telegram, locator: "file-1".to_owned(), content_type: None },
        );
        let outcome = harness.runtime.handle(voice).await.expect("voice");

        assert_eq!(outcome, HandleOutcome::Persisted { step: Step::AskClientEmail, replies: 2 });
        assert_eq!(harness.proposals.proposals().await[0].value, Decimal::new(150_000, 2));
    }

    #[tokio::test]
    async fn failed_transcription_asks_to_type() {
        let harness = harness(Vec::new(), None).await;
        identified_on_telegram(&harness).await;
        harness.runtime.handle(telegram_text("m-1", "Criar proposta")).await.expect("menu");
        harness.telegram.clear().await;

        let voice = InboundEnvelope::with_media(
            InboundMessage::voice(Channel::Telegram, "5001").with_message_id("m-2"),
            MediaRef { channel: Channel::Telegram, locator: "file-1".to_owned(), content_type: None },
        );
        harness.runtime.handle(voice).await.expect("voice");

        assert_eq!(harness.telegram.sent_texts().await, vec![render::VOICE_UNAVAILABLE]);
    }

    #[tokio::test]
    async fn whatsapp_structured_flow_commits_once_despite_redelivery() {
        let harness = harness(Vec::new(), None).await;
        let answers = [
            ("w-0", "oi"),
            ("w-1", "1"),
            ("w-2", "Maria Souza"),
            ("w-3", "Pular"),
            ("w-4", "Pular"),
            ("w-5", "Pintura externa"),
            ("w-6", "Pintura da fachada"),
            ("w-7", "Pular"),
            ("w-8", "abc"),
            ("w-9", "1.500,00"),
            ("w-10", "15 dias"),
            ("w-11", "31/02/2025"),
            ("w-12", "20/07/2025"),
            ("w-13", "Pular"),
        ];
        for (id, body) in answers {
            harness.runtime.handle(whatsapp_text(id, body)).await.expect("answer");
        }
        let redelivered = harness.runtime.handle(whatsapp_text("w-13", "Pular")).await.expect("dup");

        assert_eq!(redelivered, HandleOutcome::Duplicate);
        let proposals = harness.proposals.proposals().await;
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].value, Decimal::new(150_000, 2));
        assert_eq!(proposals[0].validity_date, NaiveDate::from_ymd_opt(2025, 7, 20));

        let texts = harness.whatsapp.sent_texts().await;
        assert!(texts.iter().any(|text| text.starts_with(render::INVALID_VALUE)));
        assert!(texts.iter().any(|text| text.starts_with(render::INVALID_DATE)));
        let stored = session(&harness, Channel::Whatsapp, "+5511999999999").await.expect("session");
        assert_eq!(stored.step, Step::AskClientEmail);
    }

    #[tokio::test]
    async fn overlapping_redelivery_waits_and_is_dropped() {
        let llm = ScriptedLlmClient::new(vec![Ok(
            r#"{"clientName":"João","title":"Reforma de banheiro","value":3000,"deliveryTime":"10 dias"}"#.to_owned(),
        )])
        .with_latency(std::time::Duration::from_millis(300));
        let harness = harness_with_llm(llm, None).await;
        identified_on_telegram(&harness).await;
        harness.runtime.handle(telegram_text("m-1", "Criar proposta")).await.expect("menu");

        let description = "Reforma de banheiro para João, R$3000, prazo 10 dias";
        let (first, second) = tokio::join!(
            harness.runtime.handle(telegram_text("m-2", description)),
            async {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                harness.runtime.handle(telegram_text("m-2", description)).await
            }
        );

        assert_eq!(
            first.expect("first delivery"),
            HandleOutcome::Persisted { step: Step::AskClientEmail, replies: 2 }
        );
        assert_eq!(second.expect("redelivery"), HandleOutcome::Duplicate);
        assert_eq!(harness.proposals.proposals().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_commit_is_retried_without_recording_the_retry_text() {
        let harness = harness(Vec::new(), None).await;
        let answers = [
            ("w-0", "oi"),
            ("w-1", "1"),
            ("w-2", "Maria Souza"),
            ("w-3", "Pular"),
            ("w-4", "Pular"),
            ("w-5", "Pintura externa"),
            ("w-6", "Pintura da fachada"),
            ("w-7", "Pular"),
            ("w-8", "1.500,00"),
            ("w-9", "15 dias"),
            ("w-10", "20/07/2025"),
        ];
        for (id, body) in answers {
            harness.runtime.handle(whatsapp_text(id, body)).await.expect("answer");
        }

        harness.proposals.fail_proposal_creation(true);
        harness.runtime.handle(whatsapp_text("w-11", "Pular")).await.expect("commit");
        let pending = session(&harness, Channel::Whatsapp, "+5511999999999").await.expect("session");
        assert!(pending.commit_pending);
        assert_eq!(pending.step, Step::CollectObservations);
        assert!(harness.whatsapp.sent_texts().await.iter().any(|text| text == render::COMMIT_FAILED));

        harness.proposals.fail_proposal_creation(false);
        let outcome = harness.runtime.handle(whatsapp_text("w-12", "ok")).await.expect("retry");

        assert_eq!(outcome, HandleOutcome::Persisted { step: Step::AskClientEmail, replies: 2 });
        assert_eq!(harness.proposals.proposals().await.len(), 1);
        assert_eq!(harness.proposals.clients().await.len(), 1);
        let stored = session(&harness, Channel::Whatsapp, "+5511999999999").await.expect("session");
        assert!(!stored.commit_pending);
        assert_eq!(stored.draft.observations, None);
    }

    #[tokio::test]
    async fn status_lists_recent_proposals() {
        let harness = harness(Vec::new(), None).await;
        identified_on_telegram(&harness).await;

        let outcome = harness.runtime.handle(telegram_text("m-1", "📊 Ver status")).await.expect("status");

        assert_eq!(outcome, HandleOutcome::Persisted { step: Step::MainMenu, replies: 1 });
        assert_eq!(harness.telegram.sent_texts().await, vec![render::NO_PROPOSALS]);
    }

    #[tokio::test]
    async fn failed_replies_still_persist_the_session() {
        let harness = harness(Vec::new(), None).await;
        harness.telegram.fail_sends(true);
        let contact = InboundMessage::contact(Channel::Telegram, "5001", "11999999999");

        harness.runtime.handle(InboundEnvelope::message(contact)).await.expect("handle");

        let stored = session(&harness, Channel::Telegram, "5001").await.expect("session");
        assert_eq!(stored.step, Step::MainMenu);
        assert!(!harness.audit.events().is_empty());
    }
}
