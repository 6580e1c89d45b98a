use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::draft::ProposalDraft;
use crate::domain::identity::Identity;
use crate::domain::message::{InboundMessage, MessageKind, OutboundMessage};
use crate::domain::session::Session;
use crate::flows::labels::{global_intent, ChannelLabels, Intent, Menu};
use crate::flows::render;
use crate::flows::states::{
    ChannelFlows, CommitOutcome, Effect, EmailOutcome, ExtractionOutcome, FlowKind,
    SessionUpdate, StatusOutcome, Step, Transition,
};
use crate::flows::validation::{is_valid_email, parse_br_date, parse_money, parse_phone};

/// Consecutive failed extractions before the conversation falls back to the structured chain.
pub const MAX_EXTRACTION_FAILURES: u32 = 3;

/// Pure conversation state machine. Every entry point takes the current session by value and
/// returns the next one together with the replies and at most one side effect to run.
#[derive(Clone, Debug, Default)]
pub struct ConversationMachine {
    labels: ChannelLabels,
    flows: ChannelFlows,
}

impl ConversationMachine {
    pub fn new(labels: ChannelLabels, flows: ChannelFlows) -> Self {
        Self { labels, flows }
    }

    pub fn labels(&self) -> &ChannelLabels {
        &self.labels
    }

    pub fn flows(&self) -> ChannelFlows {
        self.flows
    }

    /// Whether `inbound` needs an identity lookup before [`Self::step`] runs.
    pub fn needs_identity(&self, session: &Session, inbound: &InboundMessage) -> bool {
        if inbound.identity_phone().is_none() {
            return false;
        }
        session.step == Step::Start
            || inbound.body().and_then(global_intent) == Some(Intent::Restart)
    }

    pub fn step(
        &self,
        mut session: Session,
        inbound: &InboundMessage,
        identity: Option<&Identity>,
    ) -> Transition {
        if let Some(message_id) = inbound.message_id.as_deref() {
            if session.has_seen(message_id) {
                return Transition::persist(session, Vec::new());
            }
            session.remember_message(message_id);
        }

        match inbound.body().and_then(global_intent) {
            Some(Intent::Restart) => {
                session.restart();
                return self.start(session, inbound, identity);
            }
            Some(Intent::Menu) if session.resolved_operator_id.is_some() => {
                session.reset_proposal();
                session.step = Step::MainMenu;
                let reply = self.main_menu(&session, render::MAIN_MENU);
                return Transition::persist(session, vec![reply]);
            }
            _ => {}
        }

        // Whatever arrives after a failed commit only triggers the retry.
        if session.commit_pending {
            return Transition::persist(session, Vec::new()).with_effect(Effect::Commit);
        }

        match session.step {
            Step::Start => self.start(session, inbound, identity),
            Step::MainMenu => self.main_menu_choice(session, inbound),
            Step::DescribeProject => self.describe_project(session, inbound),
            step if step.is_post_commit() => self.post_commit(session, inbound),
            step => self.collect(session, inbound, step),
        }
    }

    /// Same as [`Self::step`], emitting an audit event describing the applied transition.
    pub fn step_with_audit<S>(
        &self,
        session: Session,
        inbound: &InboundMessage,
        identity: Option<&Identity>,
        sink: &S,
        audit: &AuditContext,
    ) -> Transition
    where
        S: AuditSink + ?Sized,
    {
        let from = session.step;
        let transition = self.step(session, inbound, identity);
        sink.emit(transition_event(audit, "flow.step_applied", from, &transition));
        transition
    }

    pub fn on_extraction(&self, mut session: Session, outcome: ExtractionOutcome) -> Transition {
        if session.step != Step::DescribeProject {
            return Transition::persist(session, Vec::new());
        }

        match outcome {
            Ok(partial) => {
                session.extraction_failures = 0;
                session.draft.merge(partial);
                let missing = session.draft.missing_required();
                if missing.is_empty() {
                    Transition::persist(session, Vec::new()).with_effect(Effect::Commit)
                } else {
                    let reply = OutboundMessage::new(render::missing_fields(&missing));
                    Transition::persist(session, vec![reply])
                }
            }
            Err(_) => {
                session.extraction_failures = session.extraction_failures.saturating_add(1);
                if session.extraction_failures < MAX_EXTRACTION_FAILURES {
                    let reply = OutboundMessage::new(render::EXTRACTION_FAILED);
                    return Transition::persist(session, vec![reply]);
                }
                self.fall_back_to_structured(session)
            }
        }
    }

    /// Continues the proposal field by field, keeping whatever extraction already merged.
    fn fall_back_to_structured(&self, mut session: Session) -> Transition {
        session.extraction_failures = 0;
        match first_unfilled(&session.draft, Some(Step::CollectClientName)) {
            Some(step) => {
                session.step = step;
                let text = format!("{}\n{}", render::EXTRACTION_FALLBACK, render::collect_prompt(step));
                let prompt = self.prompt_for(&session, step, text);
                Transition::persist(session, vec![prompt])
            }
            None => Transition::persist(session, Vec::new()).with_effect(Effect::Commit),
        }
    }

    pub fn on_commit(&self, mut session: Session, outcome: CommitOutcome) -> Transition {
        match outcome {
            Ok(proposal_id) => {
                session.commit_pending = false;
                session.last_proposal_id = Some(proposal_id);
                let title = session.draft.title.clone().unwrap_or_default();
                let confirmation =
                    OutboundMessage::new(render::committed(&title, session.draft.value));

                let recipient =
                    session.draft.client_email.clone().filter(|email| is_valid_email(email));
                let offer = match recipient {
                    Some(email) => {
                        session.step = Step::OfferEmailSend;
                        self.menu(&session, Menu::EmailOffer, render::offer_email(&email))
                    }
                    None => {
                        session.step = Step::AskClientEmail;
                        self.menu(&session, Menu::AskEmail, render::ASK_CLIENT_EMAIL)
                    }
                };
                Transition::persist(session, vec![confirmation, offer])
            }
            Err(_) => {
                session.commit_pending = true;
                Transition::persist(session, vec![OutboundMessage::new(render::COMMIT_FAILED)])
            }
        }
    }

    pub fn on_email(&self, mut session: Session, outcome: EmailOutcome) -> Transition {
        let recipient = session.draft.client_email.clone().unwrap_or_default();
        let text = match outcome {
            Ok(public_url) => render::email_sent(&recipient, &public_url),
            Err(_) => render::EMAIL_FAILED.to_owned(),
        };
        let notice = OutboundMessage::new(text);
        let menu = self.finish_proposal(&mut session);
        Transition::persist(session, vec![notice, menu])
    }

    pub fn on_status(&self, mut session: Session, outcome: StatusOutcome) -> Transition {
        session.step = Step::MainMenu;
        let text = match outcome {
            Ok(proposals) => render::status_listing(&proposals),
            Err(_) => render::STATUS_FAILED.to_owned(),
        };
        let reply = self.main_menu(&session, text);
        Transition::persist(session, vec![reply])
    }

    fn start(
        &self,
        mut session: Session,
        inbound: &InboundMessage,
        identity: Option<&Identity>,
    ) -> Transition {
        match identity {
            Some(identity) if identity.is_known_operator => {
                if let Some(operator_id) = identity.operator_id.clone() {
                    session.bind_operator(operator_id);
                }
                session.step = Step::MainMenu;
                let reply =
                    self.main_menu(&session, render::greeting(identity.display_name.as_deref()));
                Transition::persist(session, vec![reply])
            }
            Some(_) => Transition::delete(
                session,
                vec![OutboundMessage::new(render::UNKNOWN_OPERATOR)],
            ),
            None if inbound.kind == MessageKind::ContactShare => Transition::delete(
                session,
                vec![OutboundMessage::new(render::UNKNOWN_OPERATOR)],
            ),
            None => {
                let share = self.labels.for_channel(session.channel).share_contact.clone();
                let reply = OutboundMessage::new(render::ONBOARDING).requesting_contact(share);
                Transition::persist(session, vec![reply])
            }
        }
    }

    fn main_menu_choice(&self, mut session: Session, inbound: &InboundMessage) -> Transition {
        let intent =
            inbound.body().and_then(|text| self.labels.resolve(session.channel, Menu::Main, text));
        match intent {
            Some(Intent::CreateProposal) => self.begin_proposal(session),
            Some(Intent::ViewStatus) => {
                session.step = Step::MainMenu;
                Transition::persist(session, Vec::new()).with_effect(Effect::ListRecent)
            }
            _ => {
                let reply = self.not_understood(&session, Menu::Main);
                Transition::persist(session, vec![reply])
            }
        }
    }

    fn begin_proposal(&self, mut session: Session) -> Transition {
        session.reset_proposal();
        match self.flows.for_channel(session.channel) {
            FlowKind::AiAssisted => {
                session.step = Step::DescribeProject;
                Transition::persist(session, vec![OutboundMessage::new(render::DESCRIBE_PROJECT)])
            }
            FlowKind::Structured => {
                session.step = Step::CollectClientName;
                let prompt = self.collect_prompt(&session, Step::CollectClientName);
                Transition::persist(session, vec![prompt])
            }
        }
    }

    fn describe_project(&self, session: Session, inbound: &InboundMessage) -> Transition {
        if inbound.body().is_none() {
            let text = match inbound.kind {
                MessageKind::VoiceTranscript => render::VOICE_UNAVAILABLE,
                _ => render::DESCRIBE_PROJECT,
            };
            return Transition::persist(session, vec![OutboundMessage::new(text)]);
        }

        let text = inbound.text.clone().unwrap_or_default();
        Transition::persist(session, Vec::new()).with_effect(Effect::Extract { text })
    }

    fn collect(&self, mut session: Session, inbound: &InboundMessage, step: Step) -> Transition {
        let Some(answer) = inbound.body() else {
            let text = match inbound.kind {
                MessageKind::VoiceTranscript => render::VOICE_UNAVAILABLE,
                _ => render::EMPTY_ANSWER,
            };
            return Transition::persist(session, vec![OutboundMessage::new(text)]);
        };

        let skipped = step.is_optional_collect()
            && self.labels.resolve(session.channel, Menu::Optional, answer) == Some(Intent::Skip);
        if !skipped {
            if let Err(reason) = write_answer(&mut session.draft, step, answer) {
                let text = format!("{reason}\n{}", render::collect_prompt(step));
                let retry = self.prompt_for(&session, step, text);
                return Transition::persist(session, vec![retry]);
            }
        }

        match first_unfilled(&session.draft, step.next_collect()) {
            Some(next) => {
                session.step = next;
                let prompt = self.collect_prompt(&session, next);
                Transition::persist(session, vec![prompt])
            }
            None => self.commit_or_recollect(session),
        }
    }

    // Required answers cannot be skipped, so this only recollects when the draft was edited
    // outside the chain.
    fn commit_or_recollect(&self, mut session: Session) -> Transition {
        let missing = session.draft.missing_required();
        let Some(first) = missing.first() else {
            return Transition::persist(session, Vec::new()).with_effect(Effect::Commit);
        };

        let Some(step) = Step::ALL.into_iter().find(|step| step.collected_field() == Some(*first))
        else {
            return Transition::persist(session, vec![OutboundMessage::new(render::NOT_UNDERSTOOD)]);
        };
        session.step = step;
        let notice = OutboundMessage::new(render::missing_fields(&missing));
        let prompt = self.collect_prompt(&session, step);
        Transition::persist(session, vec![notice, prompt])
    }

    fn post_commit(&self, mut session: Session, inbound: &InboundMessage) -> Transition {
        let menu = match session.step {
            Step::OfferEmailSend => Menu::EmailOffer,
            _ => Menu::AskEmail,
        };
        let intent = inbound.body().and_then(|text| self.labels.resolve(session.channel, menu, text));

        match (session.step, intent) {
            (_, Some(Intent::CreateProposal)) => self.begin_proposal(session),
            (_, Some(Intent::ViewStatus)) => {
                session.reset_proposal();
                session.step = Step::MainMenu;
                Transition::persist(session, Vec::new()).with_effect(Effect::ListRecent)
            }
            (_, Some(Intent::No)) => {
                let notice = OutboundMessage::new(render::EMAIL_SKIPPED);
                let menu = self.finish_proposal(&mut session);
                Transition::persist(session, vec![notice, menu])
            }
            (Step::OfferEmailSend, Some(Intent::Yes)) => {
                let recipient =
                    session.draft.client_email.clone().filter(|email| is_valid_email(email));
                match recipient {
                    Some(recipient) => self.send_email(session, recipient),
                    None => {
                        session.step = Step::GetClientEmail;
                        Transition::persist(session, vec![OutboundMessage::new(render::GET_CLIENT_EMAIL)])
                    }
                }
            }
            (Step::AskClientEmail, Some(Intent::Yes)) => {
                session.step = Step::GetClientEmail;
                Transition::persist(session, vec![OutboundMessage::new(render::GET_CLIENT_EMAIL)])
            }
            (Step::GetClientEmail, _) => match inbound.body() {
                Some(email) if is_valid_email(email) => {
                    let recipient = email.trim().to_owned();
                    session.draft.client_email = Some(recipient.clone());
                    self.send_email(session, recipient)
                }
                _ => Transition::persist(session, vec![OutboundMessage::new(render::INVALID_EMAIL)]),
            },
            _ => {
                let reply = self.not_understood(&session, menu);
                Transition::persist(session, vec![reply])
            }
        }
    }

    fn send_email(&self, session: Session, recipient: String) -> Transition {
        match session.last_proposal_id.clone() {
            Some(proposal_id) => Transition::persist(session, Vec::new())
                .with_effect(Effect::SendEmail { proposal_id, recipient }),
            None => {
                let mut session = session;
                let notice = OutboundMessage::new(render::EMAIL_FAILED);
                let menu = self.finish_proposal(&mut session);
                Transition::persist(session, vec![notice, menu])
            }
        }
    }

    /// Ends the post-commit sequence: proposal-scoped state is dropped, identity survives.
    fn finish_proposal(&self, session: &mut Session) -> OutboundMessage {
        session.reset_proposal();
        session.step = Step::MainMenu;
        self.main_menu(session, render::MAIN_MENU)
    }

    fn collect_prompt(&self, session: &Session, step: Step) -> OutboundMessage {
        self.prompt_for(session, step, render::collect_prompt(step))
    }

    /// Optional steps always carry the skip button, re-prompts included.
    fn prompt_for(&self, session: &Session, step: Step, text: impl Into<String>) -> OutboundMessage {
        if step.is_optional_collect() {
            self.menu(session, Menu::Optional, text)
        } else {
            OutboundMessage::new(text)
        }
    }

    fn main_menu(&self, session: &Session, text: impl Into<String>) -> OutboundMessage {
        self.menu(session, Menu::Main, text)
    }

    fn menu(&self, session: &Session, menu: Menu, text: impl Into<String>) -> OutboundMessage {
        OutboundMessage::new(text).with_quick_replies(self.labels.labels(session.channel, menu))
    }

    fn not_understood(&self, session: &Session, menu: Menu) -> OutboundMessage {
        self.menu(session, menu, render::NOT_UNDERSTOOD)
    }
}

/// First step of the structured chain, starting at `from`, whose field is still empty.
fn first_unfilled(draft: &ProposalDraft, from: Option<Step>) -> Option<Step> {
    let mut candidate = from;
    while let Some(step) = candidate {
        match step.collected_field() {
            Some(field) if draft.has(field) => candidate = step.next_collect(),
            _ => return Some(step),
        }
    }
    None
}

/// Writes one structured answer into the draft. Invalid answers leave the draft untouched.
fn write_answer(
    draft: &mut ProposalDraft,
    step: Step,
    answer: &str,
) -> Result<(), &'static str> {
    let text = answer.trim().to_owned();
    match step {
        Step::CollectClientName => draft.client_name = Some(text),
        Step::CollectClientEmail => {
            if !is_valid_email(&text) {
                return Err(render::INVALID_EMAIL);
            }
            draft.client_email = Some(text);
        }
        Step::CollectClientPhone => {
            draft.client_phone = Some(parse_phone(&text).ok_or(render::INVALID_PHONE)?);
        }
        Step::CollectTitle => draft.title = Some(text),
        Step::CollectServiceDescription => draft.service_description = Some(text),
        Step::CollectDetailedDescription => draft.detailed_description = Some(text),
        Step::CollectValue => draft.value = Some(parse_money(&text).ok_or(render::INVALID_VALUE)?),
        Step::CollectDeliveryTime => draft.delivery_time = Some(text),
        Step::CollectValidityDate => {
            draft.validity_date = Some(parse_br_date(&text).ok_or(render::INVALID_DATE)?);
        }
        Step::CollectObservations => draft.observations = Some(text),
        _ => return Err(render::NOT_UNDERSTOOD),
    }
    Ok(())
}

fn transition_event(
    audit: &AuditContext,
    event_type: &str,
    from: Step,
    transition: &Transition,
) -> AuditEvent {
    let outcome = match transition.update {
        SessionUpdate::Persist => AuditOutcome::Success,
        SessionUpdate::Delete => AuditOutcome::Rejected,
    };
    let effect = match &transition.effect {
        Some(Effect::Extract { .. }) => "extract",
        Some(Effect::Commit) => "commit",
        Some(Effect::SendEmail { .. }) => "send_email",
        Some(Effect::ListRecent) => "list_recent",
        None => "none",
    };

    AuditEvent::new(audit, event_type, AuditCategory::Flow, outcome)
        .with_metadata("from", from.as_str())
        .with_metadata("to", transition.session.step.as_str())
        .with_metadata("effect", effect)
        .with_metadata("replies", transition.outbound.len().to_string())
}
