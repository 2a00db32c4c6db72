use serde::{Deserialize, Serialize};

use crate::domain::order::OrderId;
use crate::errors::DomainError;
use crate::money::{Currency, Money};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscrowRecordId(pub String);

impl std::fmt::Display for EscrowRecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// External payment-processor reference for a capture. The dedup key for
/// at-least-once webhook delivery.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentReference(pub String);

impl std::fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Held,
    PartiallyReleased,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Held => "held",
            Self::PartiallyReleased => "partially_released",
            Self::Released => "released",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "held" => Some(Self::Held),
            "partially_released" => Some(Self::PartiallyReleased),
            "released" => Some(Self::Released),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// Customer funds captured by the platform and held pending approval.
///
/// Invariants: `gross == platform_fee + provider` for all time, and
/// `held_amount` only ever decreases through `release` or a refund.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub id: EscrowRecordId,
    pub order_id: OrderId,
    pub gross_amount: Money,
    pub platform_fee_amount: Money,
    pub provider_amount: Money,
    pub held_amount: Money,
    pub currency: Currency,
    pub status: EscrowStatus,
    pub payment_reference: PaymentReference,
    pub state_version: u32,
}

impl EscrowRecord {
    pub fn verify_conservation(&self) -> Result<(), DomainError> {
        let recombined = self.platform_fee_amount.checked_add(self.provider_amount)?;
        if recombined != self.gross_amount {
            return Err(DomainError::InvariantViolation(format!(
                "escrow {} fee split does not recombine: {} + {} != {}",
                self.id, self.platform_fee_amount, self.provider_amount, self.gross_amount
            )));
        }
        Ok(())
    }

    /// Marks the capture as confirmed and the funds as held. Confirming an
    /// already-held record is a no-op success so duplicate processor
    /// deliveries cannot double-apply.
    pub fn mark_held(&mut self) -> Result<bool, DomainError> {
        match self.status {
            EscrowStatus::Pending => {
                self.status = EscrowStatus::Held;
                Ok(true)
            }
            EscrowStatus::Held | EscrowStatus::PartiallyReleased | EscrowStatus::Released => {
                Ok(false)
            }
            EscrowStatus::Refunded => Err(DomainError::InvalidStateTransition {
                entity: "escrow_record",
                from: self.status.as_str(),
                to: EscrowStatus::Held.as_str(),
            }),
        }
    }

    /// Decrements the held balance. Only the payout engine calls this.
    pub fn release(&mut self, amount: Money) -> Result<(), DomainError> {
        self.held_amount.ensure_same_currency(amount)?;
        if !matches!(self.status, EscrowStatus::Held | EscrowStatus::PartiallyReleased) {
            return Err(DomainError::InvalidStateTransition {
                entity: "escrow_record",
                from: self.status.as_str(),
                to: EscrowStatus::PartiallyReleased.as_str(),
            });
        }
        if amount.amount_minor <= 0 || amount.amount_minor > self.held_amount.amount_minor {
            return Err(DomainError::InsufficientEscrowBalance {
                escrow_id: self.id.clone(),
                held_minor: self.held_amount.amount_minor,
                requested_minor: amount.amount_minor,
            });
        }
        self.held_amount = self.held_amount.checked_sub(amount)?;
        self.status = if self.held_amount.amount_minor == 0 {
            EscrowStatus::Released
        } else {
            EscrowStatus::PartiallyReleased
        };
        Ok(())
    }

    pub fn refundable(&self) -> bool {
        matches!(self.status, EscrowStatus::Pending | EscrowStatus::Held)
    }

    pub fn mark_refunded(&mut self) -> Result<(), DomainError> {
        if !self.refundable() {
            return Err(DomainError::InvalidStateTransition {
                entity: "escrow_record",
                from: self.status.as_str(),
                to: EscrowStatus::Refunded.as_str(),
            });
        }
        self.held_amount = Money::zero(self.currency);
        self.status = EscrowStatus::Refunded;
        Ok(())
    }
}
