use std::sync::{Arc, Mutex};

use uuid::Uuid;

use taskpay_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use taskpay_core::domain::order::{Order, OrderId, OrderStatus};
use taskpay_core::domain::payout::Payout;
use taskpay_core::errors::{ApplicationError, DomainError, ErrorClass};
use taskpay_core::events::{PaymentEvent, PaymentEventKind};
use taskpay_core::ledger::{LedgerAction, OrderLedger};
use taskpay_core::payouts::{NetPayout, PayoutEngine};

use taskpay_db::repositories::{
    EscrowRepository, OrderRepository, PayeeRepository, PaymentEventRepository,
    PayoutRepository, TimeEntryRepository,
};
use taskpay_payments::{PaymentGateway, TransferRequest};

use super::escrow::ReconcileOutcome;
use super::{not_found, store_error, Repositories, Sinks};

pub struct PayoutService {
    repos: Repositories,
    sinks: Sinks,
    engine: PayoutEngine,
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<Mutex<OrderLedger>>,
}

impl PayoutService {
    pub fn new(
        repos: Repositories,
        sinks: Sinks,
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<Mutex<OrderLedger>>,
    ) -> Self {
        Self { repos, sinks, engine: PayoutEngine::new(), gateway, ledger }
    }

    /// The net amount owed to the provider this cycle: billed entries not
    /// yet swept into a successful payout.
    pub async fn compute_net_payout(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<NetPayout>, ApplicationError> {
        let order = self.load_order(order_id).await?;
        let entries = self
            .repos
            .time_entries
            .list_for_order(order_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        Ok(self.engine.compute_net_payout(&order, &entries)?)
    }

    /// Drains billed entries into a transfer to the provider. Retry-safe: a
    /// failed attempt leaves entries billed and the staged payout reusable
    /// under its idempotency key, and the payment processor rejects a
    /// duplicate execution of that key.
    pub async fn execute_payout(&self, order_id: &OrderId) -> Result<Payout, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();
        let order = self.load_order(order_id).await?;
        let escrow = self
            .repos
            .escrows
            .find_by_order(order_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("escrow_record", &order_id.0))?;
        let entries = self
            .repos
            .time_entries
            .list_for_order(order_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        let payee = self
            .repos
            .payees
            .find(&order.provider_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("payee", &order.provider_id.0))?;

        let Some(net) = self.engine.compute_net_payout(&order, &entries)? else {
            return Err(not_found("billed time entries for order", &order_id.0));
        };
        let key =
            taskpay_core::domain::payout::IdempotencyKey::derive(&order.id, &net.entry_ids);
        let existing = self
            .repos
            .payouts
            .find_by_key(&key)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        let preparation =
            match self.engine.prepare_payout(&order, &escrow, &entries, existing) {
                Ok(preparation) => preparation,
                Err(error) => return Err(self.escalate(order_id, error, &correlation_id).await),
            };
        if !preparation.reused {
            self.repos
                .payouts
                .insert(&preparation.payout)
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        }
        let payout = preparation.payout;

        let request = TransferRequest {
            amount: payout.net_amount,
            destination: payee.payout_destination().clone(),
            idempotency_key: payout.idempotency_key.clone(),
        };
        let receipt = match self.gateway.transfer(&request).await {
            Ok(receipt) => receipt,
            Err(error) => {
                let failure = self.engine.apply_transfer_failure(payout)?;
                self.repos
                    .payouts
                    .persist_transfer_failure(&failure.payout)
                    .await
                    .map_err(store_error("payout", &failure.payout.id.0))?;
                self.sinks.audit.emit(
                    AuditEvent::new(
                        Some(order_id.clone()),
                        correlation_id,
                        "payout.transfer_failed",
                        AuditCategory::Payout,
                        "payout-engine",
                        AuditOutcome::Failed,
                    )
                    .with_metadata("payout_id", failure.payout.id.0.clone())
                    .with_metadata("idempotency_key", failure.payout.idempotency_key.0.clone())
                    .with_metadata("error", error.to_string()),
                );
                for event in failure.events.clone() {
                    self.sinks.notifications.publish(event);
                }
                return Err(ApplicationError::PayoutFailed(error.to_string()));
            }
        };

        // A reused payout that already failed once re-enters as `failed`;
        // the engine accepts failed -> transferred for exactly this path.
        let success = match self.engine.apply_transfer_success(
            payout,
            escrow,
            entries,
            receipt.transfer_reference,
        ) {
            Ok(success) => success,
            Err(error) => return Err(self.escalate(order_id, error, &correlation_id).await),
        };
        self.repos
            .payouts
            .persist_transfer_success(&success.payout, &success.escrow, &success.entries)
            .await
            .map_err(store_error("payout", &success.payout.id.0))?;

        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.append_entry(
                &success.payout.order_id,
                LedgerAction::Release,
                success.payout.net_amount,
                "payout-engine",
            );
            ledger.append_entry(
                &success.payout.order_id,
                LedgerAction::Payout,
                success.payout.net_amount,
                "payout-engine",
            );
        }
        self.sinks.audit.emit(
            AuditEvent::new(
                Some(order_id.clone()),
                correlation_id,
                "payout.transferred",
                AuditCategory::Payout,
                "payout-engine",
                AuditOutcome::Success,
            )
            .with_metadata("payout_id", success.payout.id.0.clone())
            .with_metadata("net_minor", success.payout.net_amount.amount_minor.to_string())
            .with_metadata("destination", payee.payout_destination().0.clone()),
        );
        for event in success.events.clone() {
            self.sinks.notifications.publish(event);
        }
        Ok(success.payout)
    }

    /// Entry point for processor transfer notifications. Settlement flips
    /// held entries to `paid_out`; once the escrow is drained the order
    /// itself closes.
    pub async fn reconcile_transfer_event(
        &self,
        event: &PaymentEvent,
    ) -> Result<ReconcileOutcome, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();

        let fresh = self
            .repos
            .payment_events
            .record_if_new(event)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        if !fresh {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let Some(payout) = self
            .repos
            .payouts
            .find_by_transfer_reference(&event.reference.0)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
        else {
            return Ok(ReconcileOutcome::Deferred);
        };

        match event.kind {
            PaymentEventKind::TransferSucceeded => {
                let order = self.load_order(&payout.order_id).await?;
                let order_id = order.id.clone();
                let escrow = self
                    .repos
                    .escrows
                    .find_by_order(&order_id)
                    .await
                    .map_err(|error| ApplicationError::Persistence(error.to_string()))?
                    .ok_or_else(|| not_found("escrow_record", &order_id.0))?;
                let entries = self
                    .repos
                    .time_entries
                    .find_many(&payout.time_entry_ids)
                    .await
                    .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

                let outcome = match self
                    .engine
                    .apply_transfer_confirmation(payout, entries, &escrow, order)
                {
                    Ok(outcome) => outcome,
                    Err(error) => {
                        return Err(self.escalate(&order_id, error, &correlation_id).await)
                    }
                };
                if !outcome.applied {
                    return Ok(ReconcileOutcome::Duplicate);
                }

                self.repos
                    .payouts
                    .persist_settlement(&outcome.payout, &outcome.entries, &outcome.order)
                    .await
                    .map_err(store_error("payout", &outcome.payout.id.0))?;
                self.sinks.audit.emit(
                    AuditEvent::new(
                        Some(order_id.clone()),
                        correlation_id,
                        "payout.settled",
                        AuditCategory::Payout,
                        "payment-processor",
                        AuditOutcome::Success,
                    )
                    .with_metadata("transfer_reference", event.reference.0.clone())
                    .with_metadata("order_status", outcome.order.status.as_str().to_string()),
                );
                Ok(ReconcileOutcome::Applied)
            }
            PaymentEventKind::TransferFailed => {
                // The processor reversed a transfer we booked as successful.
                // Money state no longer matches the ledger; freeze the order
                // for manual resolution.
                let order_id = payout.order_id.clone();
                Err(self
                    .escalate(
                        &order_id,
                        DomainError::InvariantViolation(format!(
                            "transfer {} reported failed after acceptance",
                            event.reference
                        )),
                        &correlation_id,
                    )
                    .await)
            }
            PaymentEventKind::CaptureSucceeded | PaymentEventKind::CaptureFailed => {
                Err(ApplicationError::Domain(DomainError::InvariantViolation(
                    "capture events reconcile through the escrow engine".to_string(),
                )))
            }
        }
    }

    async fn load_order(&self, order_id: &OrderId) -> Result<Order, ApplicationError> {
        self.repos
            .orders
            .find(order_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("order", &order_id.0))
    }

    async fn escalate(
        &self,
        order_id: &OrderId,
        error: DomainError,
        correlation_id: &str,
    ) -> ApplicationError {
        if error.class() == ErrorClass::Invariant {
            self.sinks.audit.emit(
                AuditEvent::new(
                    Some(order_id.clone()),
                    correlation_id.to_string(),
                    "payout.invariant_violation",
                    AuditCategory::Payout,
                    "payout-engine",
                    AuditOutcome::Failed,
                )
                .with_metadata("error", error.to_string()),
            );
            if let Ok(Some(mut order)) = self.repos.orders.find(order_id).await {
                if order.transition_to(OrderStatus::Disputed).is_ok() {
                    let _ = self.repos.orders.update(&order).await;
                }
            }
        }
        ApplicationError::Domain(error)
    }
}
