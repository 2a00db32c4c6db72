//! Payout computation and idempotent transfer bookkeeping.
//!
//! A payout drains billed time entries against the order's held escrow
//! balance. The engine derives a stable idempotency key from the exact entry
//! set being paid, so a retried transfer after a failure reuses the key and
//! the transfer endpoint rejects the duplicate instead of paying twice.

use chrono::Utc;
use uuid::Uuid;

use crate::domain::escrow::EscrowRecord;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::payout::{IdempotencyKey, Payout, PayoutId, PayoutStatus};
use crate::domain::time_entry::{TimeCategory, TimeEntry, TimeEntryId, TimeEntryStatus};
use crate::errors::DomainError;
use crate::events::DomainEvent;
use crate::money::Money;

/// Billed-but-unpaid work owed to the provider this cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct NetPayout {
    pub net_amount: Money,
    pub entry_ids: Vec<TimeEntryId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PayoutPreparation {
    pub payout: Payout,
    /// True when an earlier attempt with the same key is being retried.
    pub reused: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferSuccessOutcome {
    pub payout: Payout,
    pub escrow: EscrowRecord,
    pub entries: Vec<TimeEntry>,
    pub events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferFailureOutcome {
    pub payout: Payout,
    pub events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferConfirmationOutcome {
    pub payout: Payout,
    pub entries: Vec<TimeEntry>,
    pub order: Order,
    /// False when the confirmation was a duplicate delivery.
    pub applied: bool,
}

#[derive(Clone, Debug, Default)]
pub struct PayoutEngine;

impl PayoutEngine {
    pub fn new() -> Self {
        Self
    }

    /// Sums billable amounts over billed entries. Entries already swept into
    /// a successful payout are `PlatformHeld` or `PaidOut` and never counted
    /// again.
    pub fn compute_net_payout(
        &self,
        order: &Order,
        entries: &[TimeEntry],
    ) -> Result<Option<NetPayout>, DomainError> {
        let mut net_amount = Money::zero(order.hourly_rate.currency);
        let mut entry_ids = Vec::new();
        for entry in entries {
            if entry.status != TimeEntryStatus::Billed {
                continue;
            }
            let amount = entry.billable_amount.ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "billed entry {} carries no billable amount",
                    entry.id
                ))
            })?;
            net_amount = net_amount.checked_add(amount)?;
            entry_ids.push(entry.id.clone());
        }

        if entry_ids.is_empty() {
            return Ok(None);
        }
        Ok(Some(NetPayout { net_amount, entry_ids }))
    }

    /// Stages a payout for the given billed entry set. A final payout needs
    /// both completion confirmations; billed additional hours may be swept
    /// earlier as a milestone payout against the held balance. If a payout
    /// with the same idempotency key already exists it is reused verbatim;
    /// the amount was fixed when the entry set was.
    pub fn prepare_payout(
        &self,
        order: &Order,
        escrow: &EscrowRecord,
        entries: &[TimeEntry],
        existing: Option<Payout>,
    ) -> Result<PayoutPreparation, DomainError> {
        let Some(net) = self.compute_net_payout(order, entries)? else {
            return Err(DomainError::InvariantViolation(format!(
                "order {} has no billed entries to pay out",
                order.id
            )));
        };

        if order.status != OrderStatus::CustomerCompleted {
            let all_additional = entries
                .iter()
                .filter(|entry| net.entry_ids.contains(&entry.id))
                .all(|entry| entry.category == TimeCategory::Additional);
            if !all_additional {
                return Err(DomainError::InvalidStateTransition {
                    entity: "order",
                    from: order.status.as_str(),
                    to: OrderStatus::PaidOut.as_str(),
                });
            }
        }

        if net.net_amount.amount_minor > escrow.held_amount.amount_minor {
            return Err(DomainError::InsufficientEscrowBalance {
                escrow_id: escrow.id.clone(),
                held_minor: escrow.held_amount.amount_minor,
                requested_minor: net.net_amount.amount_minor,
            });
        }

        let key = IdempotencyKey::derive(&order.id, &net.entry_ids);
        if let Some(payout) = existing {
            if payout.idempotency_key != key {
                return Err(DomainError::InvariantViolation(format!(
                    "payout {} was staged under a different idempotency key",
                    payout.id
                )));
            }
            if payout.status == PayoutStatus::Transferred {
                return Err(DomainError::InvalidStateTransition {
                    entity: "payout",
                    from: payout.status.as_str(),
                    to: PayoutStatus::Pending.as_str(),
                });
            }
            return Ok(PayoutPreparation { payout, reused: true });
        }

        let payout = Payout {
            id: PayoutId(Uuid::new_v4().to_string()),
            order_id: order.id.clone(),
            escrow_record_id: escrow.id.clone(),
            time_entry_ids: net.entry_ids,
            net_amount: net.net_amount,
            status: PayoutStatus::Pending,
            transfer_reference: None,
            idempotency_key: key,
            created_at: Utc::now(),
        };
        Ok(PayoutPreparation { payout, reused: false })
    }

    /// Books a successful transfer: escrow balance drops by the net amount,
    /// the paid entries park in `PlatformHeld` pending external confirmation,
    /// and the payout is marked transferred. Only the swept entries are
    /// returned; entries outside the payout are untouched.
    pub fn apply_transfer_success(
        &self,
        mut payout: Payout,
        mut escrow: EscrowRecord,
        entries: Vec<TimeEntry>,
        transfer_reference: impl Into<String>,
    ) -> Result<TransferSuccessOutcome, DomainError> {
        escrow.release(payout.net_amount)?;
        let mut swept = Vec::new();
        for mut entry in entries {
            if payout.time_entry_ids.contains(&entry.id) {
                entry.transition_to(TimeEntryStatus::PlatformHeld)?;
                swept.push(entry);
            }
        }
        payout.mark_transferred(transfer_reference)?;

        let events = vec![DomainEvent::PayoutCompleted {
            order_id: payout.order_id.clone(),
            payout_id: payout.id.clone(),
            net_amount: payout.net_amount,
        }];
        Ok(TransferSuccessOutcome { payout, escrow, entries: swept, events })
    }

    /// Books a failed or timed-out transfer. Entries stay `Billed` so a
    /// retry recomputes the identical amount under the identical key.
    pub fn apply_transfer_failure(
        &self,
        mut payout: Payout,
    ) -> Result<TransferFailureOutcome, DomainError> {
        payout.mark_failed()?;
        let events = vec![DomainEvent::PayoutFailed {
            order_id: payout.order_id.clone(),
            payout_id: payout.id.clone(),
        }];
        Ok(TransferFailureOutcome { payout, events })
    }

    /// Applies the processor's asynchronous settlement confirmation:
    /// held entries become `PaidOut`, and once the escrow is fully drained
    /// the order itself closes as `PaidOut`. Duplicate deliveries no-op.
    pub fn apply_transfer_confirmation(
        &self,
        payout: Payout,
        entries: Vec<TimeEntry>,
        escrow: &EscrowRecord,
        mut order: Order,
    ) -> Result<TransferConfirmationOutcome, DomainError> {
        if payout.status != PayoutStatus::Transferred {
            return Err(DomainError::InvalidStateTransition {
                entity: "payout",
                from: payout.status.as_str(),
                to: "settled",
            });
        }

        let mut applied = false;
        let mut settled = Vec::new();
        for mut entry in entries {
            if payout.time_entry_ids.contains(&entry.id)
                && entry.status == TimeEntryStatus::PlatformHeld
            {
                entry.transition_to(TimeEntryStatus::PaidOut)?;
                applied = true;
                settled.push(entry);
            }
        }

        if applied
            && escrow.held_amount.amount_minor == 0
            && order.status == OrderStatus::CustomerCompleted
        {
            order.transition_to(OrderStatus::PaidOut)?;
        }

        Ok(TransferConfirmationOutcome { payout, entries: settled, order, applied })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::PayoutEngine;
    use crate::domain::escrow::{EscrowRecord, EscrowRecordId, EscrowStatus, PaymentReference};
    use crate::domain::order::{Order, OrderId, OrderStatus};
    use crate::domain::party::{CustomerId, ProviderId};
    use crate::domain::payout::PayoutStatus;
    use crate::domain::quote::{ProposalId, QuoteId};
    use crate::domain::time_entry::{TimeCategory, TimeEntry, TimeEntryId, TimeEntryStatus};
    use crate::errors::DomainError;
    use crate::money::{Currency, Money};

    fn order(status: OrderStatus) -> Order {
        Order {
            id: OrderId("o-1".to_string()),
            quote_id: QuoteId("q-1".to_string()),
            proposal_id: ProposalId("p-1".to_string()),
            customer_id: CustomerId("cust-1".to_string()),
            provider_id: ProviderId("prov-1".to_string()),
            gross_amount: Money::new(45_000, Currency::Eur),
            hourly_rate: Money::new(2_000, Currency::Eur),
            status,
            provider_completed_at: Some(Utc::now()),
            customer_completed_at: Some(Utc::now()),
            state_version: 1,
            created_at: Utc::now(),
        }
    }

    fn escrow(held_minor: i64) -> EscrowRecord {
        EscrowRecord {
            id: EscrowRecordId("esc-1".to_string()),
            order_id: OrderId("o-1".to_string()),
            gross_amount: Money::new(45_000, Currency::Eur),
            platform_fee_amount: Money::new(2_250, Currency::Eur),
            provider_amount: Money::new(42_750, Currency::Eur),
            held_amount: Money::new(held_minor, Currency::Eur),
            currency: Currency::Eur,
            status: EscrowStatus::Held,
            payment_reference: PaymentReference("pi_1".to_string()),
            state_version: 1,
        }
    }

    fn billed_entry(id: &str, amount_minor: i64) -> TimeEntry {
        TimeEntry {
            id: TimeEntryId(id.to_string()),
            order_id: OrderId("o-1".to_string()),
            provider_id: ProviderId("prov-1".to_string()),
            work_date: NaiveDate::from_ymd_opt(2026, 3, 9).expect("valid date"),
            hours: Decimal::new(30, 1),
            category: TimeCategory::Original,
            description: "work".to_string(),
            status: TimeEntryStatus::Billed,
            billable_amount: Some(Money::new(amount_minor, Currency::Eur)),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn net_payout_sums_only_billed_entries() {
        let engine = PayoutEngine::new();
        let mut paid = billed_entry("te-2", 4_000);
        paid.status = TimeEntryStatus::PaidOut;
        let entries = vec![billed_entry("te-1", 6_000), paid];

        let net = engine
            .compute_net_payout(&order(OrderStatus::CustomerCompleted), &entries)
            .expect("computable")
            .expect("something owed");
        assert_eq!(net.net_amount, Money::new(6_000, Currency::Eur));
        assert_eq!(net.entry_ids, vec![TimeEntryId("te-1".to_string())]);
    }

    #[test]
    fn net_payout_is_none_when_nothing_is_billed() {
        let engine = PayoutEngine::new();
        let net = engine
            .compute_net_payout(&order(OrderStatus::CustomerCompleted), &[])
            .expect("computable");
        assert!(net.is_none());
    }

    #[test]
    fn prepare_requires_customer_completion_for_original_work() {
        let engine = PayoutEngine::new();
        let entries = vec![billed_entry("te-1", 6_000)];

        let error = engine
            .prepare_payout(&order(OrderStatus::InProgress), &escrow(42_750), &entries, None)
            .expect_err("incomplete order");
        assert!(matches!(error, DomainError::InvalidStateTransition { entity: "order", .. }));
    }

    #[test]
    fn billed_additional_hours_may_be_swept_early() {
        let engine = PayoutEngine::new();
        let mut entry = billed_entry("te-1", 6_000);
        entry.category = TimeCategory::Additional;

        let preparation = engine
            .prepare_payout(&order(OrderStatus::InProgress), &escrow(42_750), &[entry], None)
            .expect("milestone payout");
        assert_eq!(preparation.payout.net_amount, Money::new(6_000, Currency::Eur));
    }

    #[test]
    fn prepare_rejects_amounts_beyond_held_balance() {
        let engine = PayoutEngine::new();
        let entries = vec![billed_entry("te-1", 50_000)];

        let error = engine
            .prepare_payout(&order(OrderStatus::CustomerCompleted), &escrow(42_750), &entries, None)
            .expect_err("over-drawn payout");
        assert!(matches!(error, DomainError::InsufficientEscrowBalance { .. }));
    }

    #[test]
    fn retry_reuses_the_staged_payout_and_key() {
        let engine = PayoutEngine::new();
        let entries = vec![billed_entry("te-1", 6_000)];
        let order = order(OrderStatus::CustomerCompleted);

        let first = engine
            .prepare_payout(&order, &escrow(42_750), &entries, None)
            .expect("first staging");
        let failed = engine.apply_transfer_failure(first.payout).expect("failure booked");

        let retry = engine
            .prepare_payout(&order, &escrow(42_750), &entries, Some(failed.payout.clone()))
            .expect("retry staging");
        assert!(retry.reused);
        assert_eq!(retry.payout.id, failed.payout.id);
        assert_eq!(retry.payout.idempotency_key, failed.payout.idempotency_key);
    }

    #[test]
    fn transferred_payout_cannot_be_staged_again() {
        let engine = PayoutEngine::new();
        let entries = vec![billed_entry("te-1", 6_000)];
        let order = order(OrderStatus::CustomerCompleted);

        let staged = engine
            .prepare_payout(&order, &escrow(42_750), &entries, None)
            .expect("staging");
        let success = engine
            .apply_transfer_success(staged.payout, escrow(42_750), entries.clone(), "tr_1")
            .expect("transfer booked");

        let error = engine
            .prepare_payout(&order, &success.escrow, &entries, Some(success.payout))
            .expect_err("already transferred");
        assert!(matches!(error, DomainError::InvalidStateTransition { entity: "payout", .. }));
    }

    #[test]
    fn transfer_success_releases_escrow_and_holds_entries() {
        let engine = PayoutEngine::new();
        let entries = vec![billed_entry("te-1", 6_000)];
        let order = order(OrderStatus::CustomerCompleted);

        let staged = engine
            .prepare_payout(&order, &escrow(42_750), &entries, None)
            .expect("staging");
        let success = engine
            .apply_transfer_success(staged.payout, escrow(42_750), entries, "tr_1")
            .expect("transfer booked");

        assert_eq!(success.payout.status, PayoutStatus::Transferred);
        assert_eq!(success.payout.transfer_reference.as_deref(), Some("tr_1"));
        assert_eq!(success.escrow.held_amount.amount_minor, 36_750);
        assert_eq!(success.escrow.status, EscrowStatus::PartiallyReleased);
        assert!(success.entries.iter().all(|e| e.status == TimeEntryStatus::PlatformHeld));
    }

    #[test]
    fn settlement_confirmation_pays_entries_out_once() {
        let engine = PayoutEngine::new();
        let entries = vec![billed_entry("te-1", 42_750)];
        let order = order(OrderStatus::CustomerCompleted);

        let staged = engine
            .prepare_payout(&order, &escrow(42_750), &entries, None)
            .expect("staging");
        let success = engine
            .apply_transfer_success(staged.payout, escrow(42_750), entries, "tr_1")
            .expect("transfer booked");
        assert_eq!(success.escrow.status, EscrowStatus::Released);

        let confirmed = engine
            .apply_transfer_confirmation(
                success.payout.clone(),
                success.entries.clone(),
                &success.escrow,
                order.clone(),
            )
            .expect("settlement");
        assert!(confirmed.applied);
        assert!(confirmed.entries.iter().all(|e| e.status == TimeEntryStatus::PaidOut));
        assert_eq!(confirmed.order.status, OrderStatus::PaidOut);

        let duplicate = engine
            .apply_transfer_confirmation(
                confirmed.payout,
                confirmed.entries,
                &success.escrow,
                confirmed.order,
            )
            .expect("duplicate settlement");
        assert!(!duplicate.applied);
        assert_eq!(duplicate.order.status, OrderStatus::PaidOut);
    }
}
