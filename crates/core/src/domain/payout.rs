use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::escrow::EscrowRecordId;
use crate::domain::order::OrderId;
use crate::domain::time_entry::TimeEntryId;
use crate::errors::DomainError;
use crate::money::Money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayoutId(pub String);

impl std::fmt::Display for PayoutId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier for one payout attempt against the transfer
/// processor. Derived from the order and the exact entry set being paid,
/// so a retry of the same work produces the same key and a duplicate
/// transfer is rejected downstream instead of executed twice.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn derive(order_id: &OrderId, entry_ids: &[TimeEntryId]) -> Self {
        let mut sorted: Vec<&str> = entry_ids.iter().map(|id| id.0.as_str()).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = Sha256::new();
        hasher.update(order_id.0.as_bytes());
        for entry_id in sorted {
            hasher.update(b"|");
            hasher.update(entry_id.as_bytes());
        }
        let digest = hasher.finalize();

        let mut key = String::with_capacity(digest.len() * 2);
        for byte in digest {
            key.push_str(&format!("{byte:02x}"));
        }
        Self(key)
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Transferred,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Transferred => "transferred",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "transferred" => Some(Self::Transferred),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One transfer of held escrow funds to the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub id: PayoutId,
    pub order_id: OrderId,
    pub escrow_record_id: EscrowRecordId,
    pub time_entry_ids: Vec<TimeEntryId>,
    pub net_amount: Money,
    pub status: PayoutStatus,
    pub transfer_reference: Option<String>,
    pub idempotency_key: IdempotencyKey,
    pub created_at: DateTime<Utc>,
}

impl Payout {
    pub fn mark_transferred(&mut self, reference: impl Into<String>) -> Result<(), DomainError> {
        match self.status {
            PayoutStatus::Pending | PayoutStatus::Failed => {
                self.status = PayoutStatus::Transferred;
                self.transfer_reference = Some(reference.into());
                Ok(())
            }
            PayoutStatus::Transferred => Err(DomainError::InvalidStateTransition {
                entity: "payout",
                from: self.status.as_str(),
                to: PayoutStatus::Transferred.as_str(),
            }),
        }
    }

    pub fn mark_failed(&mut self) -> Result<(), DomainError> {
        match self.status {
            PayoutStatus::Pending => {
                self.status = PayoutStatus::Failed;
                Ok(())
            }
            PayoutStatus::Failed => Ok(()),
            PayoutStatus::Transferred => Err(DomainError::InvalidStateTransition {
                entity: "payout",
                from: self.status.as_str(),
                to: PayoutStatus::Failed.as_str(),
            }),
        }
    }
}
