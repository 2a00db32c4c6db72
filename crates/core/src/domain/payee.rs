use serde::{Deserialize, Serialize};

use crate::domain::party::ProviderId;

/// Where a payout lands: an account reference at the transfer processor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayoutDestination(pub String);

impl std::fmt::Display for PayoutDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider shapes differ (sole traders, companies, company employees) but
/// the payout engine only ever needs one capability: who gets paid, where.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PayeeKind {
    Individual { destination: PayoutDestination },
    Company { destination: PayoutDestination, registration: String },
    Employee { destination: PayoutDestination, company_provider_id: ProviderId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    pub provider_id: ProviderId,
    pub display_name: String,
    pub kind: PayeeKind,
}

impl Payee {
    pub fn payout_destination(&self) -> &PayoutDestination {
        match &self.kind {
            PayeeKind::Individual { destination }
            | PayeeKind::Company { destination, .. }
            | PayeeKind::Employee { destination, .. } => destination,
        }
    }
}
