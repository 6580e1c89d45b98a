use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use propbot_core::domain::identity::{normalize_phone, OperatorProfile};
use propbot_core::{Channel, Identity, OperatorId};
use propbot_db::{OperatorDirectory, RepositoryError};

/// Shortest digit string allowed to match by containment.
pub const MIN_CONTAINMENT_DIGITS: usize = 10;
const CONTAINMENT_SCAN_LIMIT: u32 = 10;

/// Maps a raw phone number to an operator. An unmatched or ambiguous number is an unknown
/// identity, not an error; only directory failures are errors.
pub struct IdentityResolver {
    directory: Arc<dyn OperatorDirectory>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn OperatorDirectory>) -> Self {
        Self { directory }
    }

    pub async fn resolve(&self, channel: Channel, raw_phone: &str) -> Result<Identity, RepositoryError> {
        let digits = normalize_phone(raw_phone);
        if digits.is_empty() {
            debug!(channel = %channel, "phone has no digits");
            return Ok(Identity::unknown());
        }

        let exact = self.directory.find_by_phone_digits(&digits).await?;
        if !exact.is_empty() {
            return Ok(single_operator(channel, "exact", exact));
        }

        if digits.len() < MIN_CONTAINMENT_DIGITS {
            return Ok(Identity::unknown());
        }
        let candidates =
            self.directory.find_by_phone_containing(&digits, CONTAINMENT_SCAN_LIMIT).await?;
        Ok(single_operator(channel, "containment", candidates))
    }
}

fn single_operator(channel: Channel, strategy: &str, matches: Vec<OperatorProfile>) -> Identity {
    let distinct: BTreeSet<&str> = matches.iter().map(|profile| profile.id.0.as_str()).collect();
    if distinct.len() != 1 {
        info!(channel = %channel, strategy, candidates = distinct.len(), "identity not resolved");
        return Identity::unknown();
    }

    let Some(profile) = matches.into_iter().next() else {
        return Identity::unknown();
    };
    info!(channel = %channel, strategy, operator_id = %profile.id.0, "identity resolved");
    Identity::operator(OperatorId(profile.id.0), profile.display_name)
}
