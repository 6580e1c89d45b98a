use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DRAFT_SCHEMA_VERSION: u32 = 1;

/// Fields a draft must carry before it can be committed.
pub const REQUIRED_FIELDS: [DraftField; 4] =
    [DraftField::Title, DraftField::ClientName, DraftField::Value, DraftField::DeliveryTime];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DraftField {
    ClientName,
    ClientEmail,
    ClientPhone,
    Title,
    ServiceDescription,
    DetailedDescription,
    Value,
    DeliveryTime,
    ValidityDate,
    Observations,
}

impl DraftField {
    pub fn key(&self) -> &'static str {
        match self {
            Self::ClientName => "clientName",
            Self::ClientEmail => "clientEmail",
            Self::ClientPhone => "clientPhone",
            Self::Title => "title",
            Self::ServiceDescription => "serviceDescription",
            Self::DetailedDescription => "detailedDescription",
            Self::Value => "value",
            Self::DeliveryTime => "deliveryTime",
            Self::ValidityDate => "validityDate",
            Self::Observations => "observations",
        }
    }

    /// Label shown to operators when the field is missing.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ClientName => "nome do cliente",
            Self::ClientEmail => "e-mail do cliente",
            Self::ClientPhone => "telefone do cliente",
            Self::Title => "título da proposta",
            Self::ServiceDescription => "descrição do serviço",
            Self::DetailedDescription => "descrição detalhada",
            Self::Value => "valor",
            Self::DeliveryTime => "prazo de entrega",
            Self::ValidityDate => "data de validade",
            Self::Observations => "observações",
        }
    }
}

/// In-progress proposal payload shared by every conversation flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalDraft {
    #[serde(default = "current_version")]
    pub version: u32,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub title: Option<String>,
    pub service_description: Option<String>,
    pub detailed_description: Option<String>,
    pub value: Option<Decimal>,
    pub delivery_time: Option<String>,
    pub validity_date: Option<NaiveDate>,
    pub observations: Option<String>,
}

fn current_version() -> u32 {
    DRAFT_SCHEMA_VERSION
}

impl Default for ProposalDraft {
    fn default() -> Self {
        Self {
            version: DRAFT_SCHEMA_VERSION,
            client_name: None,
            client_email: None,
            client_phone: None,
            title: None,
            service_description: None,
            detailed_description: None,
            value: None,
            delivery_time: None,
            validity_date: None,
            observations: None,
        }
    }
}

impl ProposalDraft {
    pub fn has(&self, field: DraftField) -> bool {
        match field {
            DraftField::ClientName => filled(&self.client_name),
            DraftField::ClientEmail => filled(&self.client_email),
            DraftField::ClientPhone => filled(&self.client_phone),
            DraftField::Title => filled(&self.title),
            DraftField::ServiceDescription => filled(&self.service_description),
            DraftField::DetailedDescription => filled(&self.detailed_description),
            DraftField::Value => self.value.is_some(),
            DraftField::DeliveryTime => filled(&self.delivery_time),
            DraftField::ValidityDate => self.validity_date.is_some(),
            DraftField::Observations => filled(&self.observations),
        }
    }

    /// Required fields still empty, in the canonical order of [`REQUIRED_FIELDS`].
    pub fn missing_required(&self) -> Vec<DraftField> {
        REQUIRED_FIELDS.into_iter().filter(|field| !self.has(*field)).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }

    /// Folds a newer partial draft into this one. Non-empty incoming values win, empty
    /// incoming values never erase what was already collected.
    pub fn merge(&mut self, incoming: ProposalDraft) {
        merge_text(&mut self.client_name, incoming.client_name);
        merge_text(&mut self.client_email, incoming.client_email);
        merge_text(&mut self.client_phone, incoming.client_phone);
        merge_text(&mut self.title, incoming.title);
        merge_text(&mut self.service_description, incoming.service_description);
        merge_text(&mut self.detailed_description, incoming.detailed_description);
        merge_text(&mut self.delivery_time, incoming.delivery_time);
        merge_text(&mut self.observations, incoming.observations);
        if incoming.value.is_some() {
            self.value = incoming.value;
        }
        if incoming.validity_date.is_some() {
            self.validity_date = incoming.validity_date;
        }
        self.version = DRAFT_SCHEMA_VERSION;
    }
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|text| !text.trim().is_empty())
}

fn merge_text(current: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = incoming.map(|text| text.trim().to_owned()).filter(|text| !text.is_empty())
    {
        *current = Some(value);
    }
}
