use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::{prelude::FromPrimitive, Decimal, RoundingStrategy};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use propbot_core::flows::validation::{is_valid_email, parse_br_date, parse_money};
use propbot_core::{DraftField, ProposalDraft};

use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::resilience::{retry_with_timeout, AttemptError, RetryPolicy};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("extraction timed out")]
    Timeout,
    #[error("extraction call failed: {0}")]
    Transport(String),
    #[error("extraction response was malformed: {0}")]
    Malformed(String),
}

impl From<AttemptError<LlmError>> for ExtractionError {
    fn from(error: AttemptError<LlmError>) -> Self {
        match error {
            AttemptError::Timeout(_) => Self::Timeout,
            AttemptError::Failed(LlmError::Decode(detail)) => Self::Malformed(detail),
            AttemptError::Failed(LlmError::Empty) => Self::Malformed("empty completion".into()),
            AttemptError::Failed(other) => Self::Transport(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionResult {
    pub draft: ProposalDraft,
    /// Recomputed locally from `draft`; the model's own completeness claims are ignored.
    pub missing_fields: Vec<DraftField>,
}

impl ExtractionResult {
    pub fn from_draft(draft: ProposalDraft) -> Self {
        let missing_fields = draft.missing_required();
        Self { draft, missing_fields }
    }
}

#[async_trait]
pub trait ProposalExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ExtractionError>;
}

pub struct LlmProposalExtractor {
    client: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl LlmProposalExtractor {
    pub fn new(client: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl ProposalExtractor for LlmProposalExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ExtractionError> {
        let request = CompletionRequest {
            system: system_prompt(Utc::now().date_naive()),
            user: text.to_owned(),
        };

        let completion =
            retry_with_timeout(&self.policy, "llm.extract", || self.client.complete(&request))
                .await?;
        let draft = parse_draft(&completion).inspect_err(|error| {
            warn!(error = %error, "discarding malformed extraction response");
        })?;

        let result = ExtractionResult::from_draft(draft);
        debug!(missing = result.missing_fields.len(), "extraction parsed");
        Ok(result)
    }
}

pub fn system_prompt(today: NaiveDate) -> String {
    format!(
        "Você extrai dados de propostas comerciais a partir de mensagens em português do Brasil. \
         Hoje é {today}. Responda somente com um objeto JSON com as chaves: clientName, \
         clientEmail, clientPhone, title, serviceDescription, detailedDescription, value \
         (número em reais), deliveryTime (texto livre, ex.: \"15 dias\"), validityDate \
         (AAAA-MM-DD) e observations. Use null para o que não foi informado. Não invente dados.",
        today = today.format("%Y-%m-%d")
    )
}

/// Parses a model completion into a draft. Code fences and prose around the object are
/// tolerated; anything that is not a JSON object is malformed.
pub fn parse_draft(completion: &str) -> Result<ProposalDraft, ExtractionError> {
    let object = json_object_slice(completion)
        .ok_or_else(|| ExtractionError::Malformed("no JSON object in response".to_owned()))?;
    let value: Value = serde_json::from_str(object)
        .map_err(|error| ExtractionError::Malformed(error.to_string()))?;
    let fields = value
        .as_object()
        .ok_or_else(|| ExtractionError::Malformed("response is not an object".to_owned()))?;

    Ok(ProposalDraft {
        client_name: text_field(fields, DraftField::ClientName),
        client_email: text_field(fields, DraftField::ClientEmail)
            .filter(|email| is_valid_email(email)),
        client_phone: text_field(fields, DraftField::ClientPhone),
        title: text_field(fields, DraftField::Title),
        service_description: text_field(fields, DraftField::ServiceDescription),
        detailed_description: text_field(fields, DraftField::DetailedDescription),
        value: fields.get(DraftField::Value.key()).and_then(amount),
        delivery_time: text_field(fields, DraftField::DeliveryTime),
        validity_date: text_field(fields, DraftField::ValidityDate).and_then(|raw| date(&raw)),
        observations: text_field(fields, DraftField::Observations),
        ..ProposalDraft::default()
    })
}

fn json_object_slice(completion: &str) -> Option<&str> {
    let start = completion.find('{')?;
    let end = completion.rfind('}')?;
    (end > start).then(|| &completion[start..=end])
}

fn text_field(fields: &Map<String, Value>, field: DraftField) -> Option<String> {
    match fields.get(field.key())? {
        Value::String(text) => Some(text.trim().to_owned()).filter(|text| !text.is_empty()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn amount(value: &Value) -> Option<Decimal> {
    let parsed = match value {
        Value::Number(number) => number
            .as_i64()
            .map(Decimal::from)
            .or_else(|| number.as_f64().and_then(Decimal::from_f64)),
        Value::String(text) => parse_money(text),
        _ => None,
    }?;
    (parsed > Decimal::ZERO)
        .then(|| parsed.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

fn date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| parse_br_date(raw))
}

/// Used when no model is configured: every description fails extraction.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledExtractor;

#[async_trait]
impl ProposalExtractor for DisabledExtractor {
    async fn extract(&self, _text: &str) -> Result<ExtractionResult, ExtractionError> {
        Err(ExtractionError::Transport("extraction is not configured".to_owned()))
    }
}
