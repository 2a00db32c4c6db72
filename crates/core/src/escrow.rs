//! Escrow capture and fund conservation.
//!
//! Pure transition logic for the money-holding half of the lifecycle: fee
//! splitting at capture, idempotent confirmation of processor events, refund
//! legality, and held-balance release. External calls and persistence happen
//! in the service layer; everything here is deterministic and synchronous.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::escrow::{EscrowRecord, EscrowRecordId, EscrowStatus, PaymentReference};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::time_entry::{TimeEntry, TimeEntryStatus};
use crate::errors::DomainError;
use crate::events::DomainEvent;
use crate::money::{split_fee, Money};

/// What the service must send to the payment processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureRequest {
    pub amount: Money,
    pub reference: PaymentReference,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaptureOutcome {
    pub record: EscrowRecord,
    pub request: CaptureRequest,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfirmationOutcome {
    pub record: EscrowRecord,
    pub order: Order,
    /// False when the confirmation was a duplicate and nothing changed.
    pub applied: bool,
    pub events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefundOutcome {
    pub record: EscrowRecord,
    pub order: Order,
    pub events: Vec<DomainEvent>,
}

#[derive(Clone, Debug)]
pub struct EscrowEngine {
    platform_fee_rate: Decimal,
}

impl EscrowEngine {
    pub fn new(platform_fee_rate: Decimal) -> Self {
        Self { platform_fee_rate }
    }

    pub fn platform_fee_rate(&self) -> Decimal {
        self.platform_fee_rate
    }

    /// Splits the order's gross amount and stages a pending escrow record.
    /// Funds count as held only after the processor confirms; the held
    /// balance available for payouts is the provider share, the platform fee
    /// being retained at capture.
    pub fn initiate_capture(
        &self,
        order: &Order,
        payment_reference: PaymentReference,
    ) -> Result<CaptureOutcome, DomainError> {
        if order.status != OrderStatus::PendingPayment {
            return Err(DomainError::InvalidStateTransition {
                entity: "order",
                from: order.status.as_str(),
                to: OrderStatus::EscrowHeld.as_str(),
            });
        }

        let split = split_fee(order.gross_amount, self.platform_fee_rate)?;
        let record = EscrowRecord {
            id: EscrowRecordId(Uuid::new_v4().to_string()),
            order_id: order.id.clone(),
            gross_amount: split.gross,
            platform_fee_amount: split.platform_fee,
            provider_amount: split.provider_amount,
            held_amount: split.provider_amount,
            currency: split.gross.currency,
            status: EscrowStatus::Pending,
            payment_reference: payment_reference.clone(),
            state_version: 1,
        };
        record.verify_conservation()?;

        let request = CaptureRequest { amount: split.gross, reference: payment_reference };
        Ok(CaptureOutcome { record, request })
    }

    /// Applies a processor capture confirmation. Safe under duplicate
    /// delivery: a record already past `Pending` absorbs the event without a
    /// second transition.
    pub fn apply_capture_confirmation(
        &self,
        mut record: EscrowRecord,
        mut order: Order,
        confirmed_amount: Money,
    ) -> Result<ConfirmationOutcome, DomainError> {
        record.gross_amount.ensure_same_currency(confirmed_amount)?;
        if confirmed_amount != record.gross_amount {
            return Err(DomainError::InvariantViolation(format!(
                "capture confirmation for {} carries {}, expected {}",
                record.payment_reference, confirmed_amount, record.gross_amount
            )));
        }

        let applied = record.mark_held()?;
        let mut events = Vec::new();
        if applied {
            order.transition_to(OrderStatus::EscrowHeld)?;
            events.push(DomainEvent::EscrowHeld {
                order_id: order.id.clone(),
                escrow_record_id: record.id.clone(),
                gross_amount: record.gross_amount,
            });
        }

        Ok(ConfirmationOutcome { record, order, applied, events })
    }

    /// Refunds the full escrow to the customer. Legal only before any entry
    /// has been billed or paid; the order is cancelled with it.
    pub fn refund(
        &self,
        mut record: EscrowRecord,
        mut order: Order,
        entries: &[TimeEntry],
    ) -> Result<RefundOutcome, DomainError> {
        let blocked = entries.iter().any(|entry| {
            matches!(
                entry.status,
                TimeEntryStatus::Billed | TimeEntryStatus::PlatformHeld | TimeEntryStatus::PaidOut
            )
        });
        if blocked {
            return Err(DomainError::InvalidStateTransition {
                entity: "escrow_record",
                from: record.status.as_str(),
                to: EscrowStatus::Refunded.as_str(),
            });
        }

        record.mark_refunded()?;
        order.transition_to(OrderStatus::Cancelled)?;

        let events = vec![DomainEvent::EscrowRefunded {
            order_id: order.id.clone(),
            escrow_record_id: record.id.clone(),
        }];
        Ok(RefundOutcome { record, order, events })
    }
}
