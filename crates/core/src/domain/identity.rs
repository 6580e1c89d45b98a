use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorId(pub String);

/// Result of resolving a sender phone against the operator directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub is_known_operator: bool,
    pub operator_id: Option<OperatorId>,
    pub display_name: Option<String>,
}

impl Identity {
    pub fn operator(id: OperatorId, display_name: Option<String>) -> Self {
        Self { is_known_operator: true, operator_id: Some(id), display_name }
    }

    pub fn unknown() -> Self {
        Self { is_known_operator: false, operator_id: None, display_name: None }
    }
}

/// Operator row as seen by the identity lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorProfile {
    pub id: OperatorId,
    pub display_name: Option<String>,
    pub phone_digits: String,
}

/// Channel-native ids stored on the operator record for out-of-band pushes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportAddress {
    pub telegram_chat_id: Option<String>,
    pub whatsapp_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOperator {
    pub display_name: Option<String>,
    pub phone: String,
    pub company_name: Option<String>,
    pub company_phone: Option<String>,
}

/// Strips every non-digit character.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}
