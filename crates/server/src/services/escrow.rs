use std::sync::{Arc, Mutex};

use uuid::Uuid;

use taskpay_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use taskpay_core::domain::escrow::{EscrowRecord, EscrowRecordId, PaymentReference};
use taskpay_core::domain::order::{Order, OrderId, OrderStatus};
use taskpay_core::errors::{ApplicationError, DomainError, ErrorClass};
use taskpay_core::escrow::EscrowEngine;
use taskpay_core::events::{PaymentEvent, PaymentEventKind};
use taskpay_core::ledger::{LedgerAction, OrderLedger};

use taskpay_db::repositories::{
    EscrowRepository, OrderRepository, PaymentEventRepository, TimeEntryRepository,
};
use taskpay_payments::PaymentGateway;

use super::{not_found, store_error, Repositories, Sinks};

/// What a webhook delivery did once it reached the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The event advanced state.
    Applied,
    /// The event was seen before (or the state had already advanced).
    Duplicate,
    /// The event arrived ahead of the entity it confirms; it is stored and
    /// will be applied when the initiating call catches up.
    Deferred,
}

pub struct EscrowService {
    repos: Repositories,
    sinks: Sinks,
    engine: EscrowEngine,
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<Mutex<OrderLedger>>,
}

impl EscrowService {
    pub fn new(
        repos: Repositories,
        sinks: Sinks,
        engine: EscrowEngine,
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<Mutex<OrderLedger>>,
    ) -> Self {
        Self { repos, sinks, engine, gateway, ledger }
    }

    /// Stages the escrow record, asks the processor to capture the gross
    /// amount, and applies a confirmation that may already have arrived.
    /// Idempotent per payment reference: a repeated call returns the existing
    /// record without a second processor call.
    pub async fn capture_funds(
        &self,
        order_id: &OrderId,
        payment_reference: PaymentReference,
    ) -> Result<EscrowRecord, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();

        if let Some(existing) = self
            .repos
            .escrows
            .find_by_reference(&payment_reference)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
        {
            return Ok(existing);
        }

        let order = self.load_order(order_id).await?;
        let outcome = self.engine.initiate_capture(&order, payment_reference.clone())?;

        let inserted = self
            .repos
            .escrows
            .insert_if_absent(&outcome.record)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        if !inserted {
            // A concurrent call staged the same reference first.
            return self
                .repos
                .escrows
                .find_by_reference(&payment_reference)
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?
                .ok_or_else(|| not_found("escrow_record", &payment_reference.0));
        }

        if let Err(error) = self.gateway.capture(&outcome.request).await {
            // The record stays pending; a retry re-enters through the
            // reference check above and the processor dedupes on its side.
            self.sinks.audit.emit(
                AuditEvent::new(
                    Some(order.id.clone()),
                    correlation_id,
                    "escrow.capture_call_failed",
                    AuditCategory::Escrow,
                    "escrow-engine",
                    AuditOutcome::Failed,
                )
                .with_metadata("payment_reference", payment_reference.0.clone())
                .with_metadata("error", error.to_string()),
            );
            return Err(ApplicationError::CaptureFailed(error.to_string()));
        }

        // The confirmation may have raced ahead of us through the webhook.
        let early = self
            .repos
            .payment_events
            .find(&payment_reference, PaymentEventKind::CaptureSucceeded)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        if let Some(event) = early {
            self.apply_capture_confirmation(&event, &correlation_id).await?;
            return self
                .repos
                .escrows
                .find_by_reference(&payment_reference)
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?
                .ok_or_else(|| not_found("escrow_record", &payment_reference.0));
        }

        Ok(outcome.record)
    }

    /// Entry point for processor capture notifications. At-least-once
    /// delivered, exactly-once applied: the (reference, kind) pair is
    /// recorded first and duplicates short-circuit.
    pub async fn reconcile_webhook_event(
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

        match event.kind {
            PaymentEventKind::CaptureSucceeded => {
                self.apply_capture_confirmation(event, &correlation_id).await
            }
            PaymentEventKind::CaptureFailed => {
                self.sinks.audit.emit(
                    AuditEvent::new(
                        None,
                        correlation_id,
                        "escrow.capture_reported_failed",
                        AuditCategory::Escrow,
                        "payment-processor",
                        AuditOutcome::Failed,
                    )
                    .with_metadata("payment_reference", event.reference.0.clone()),
                );
                Ok(ReconcileOutcome::Applied)
            }
            PaymentEventKind::TransferSucceeded | PaymentEventKind::TransferFailed => {
                Err(ApplicationError::Domain(DomainError::InvariantViolation(
                    "transfer events reconcile through the payout engine".to_string(),
                )))
            }
        }
    }

    async fn apply_capture_confirmation(
        &self,
        event: &PaymentEvent,
        correlation_id: &str,
    ) -> Result<ReconcileOutcome, ApplicationError> {
        let Some(record) = self
            .repos
            .escrows
            .find_by_reference(&event.reference)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
        else {
            // Confirmation beat the initiating call; it is already recorded
            // and capture_funds applies it once the record exists.
            return Ok(ReconcileOutcome::Deferred);
        };

        let order = self.load_order(&record.order_id).await?;
        let order_id = order.id.clone();

        let outcome = match self.engine.apply_capture_confirmation(record, order, event.amount) {
            Ok(outcome) => outcome,
            Err(error) => return Err(self.escalate(&order_id, error, correlation_id).await),
        };
        if !outcome.applied {
            return Ok(ReconcileOutcome::Duplicate);
        }

        self.repos
            .escrows
            .persist_confirmation(&outcome.record, &outcome.order)
            .await
            .map_err(store_error("escrow_record", &outcome.record.id.0))?;

        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.append_entry(
                &outcome.order.id,
                LedgerAction::Capture,
                outcome.record.gross_amount,
                "escrow-engine",
            );
            ledger.append_entry(
                &outcome.order.id,
                LedgerAction::Hold,
                outcome.record.provider_amount,
                "escrow-engine",
            );
        }

        self.sinks.audit.emit(
            AuditEvent::new(
                Some(outcome.order.id.clone()),
                correlation_id.to_string(),
                "escrow.capture_confirmed",
                AuditCategory::Escrow,
                "payment-processor",
                AuditOutcome::Success,
            )
            .with_metadata("payment_reference", event.reference.0.clone())
            .with_metadata("gross_minor", outcome.record.gross_amount.amount_minor.to_string()),
        );
        for event in outcome.events.clone() {
            self.sinks.notifications.publish(event);
        }
        Ok(ReconcileOutcome::Applied)
    }

    /// Returns held funds to the customer and cancels the order. Legal only
    /// while nothing has been billed or paid.
    pub async fn refund(
        &self,
        escrow_record_id: &EscrowRecordId,
        reason: &str,
        acting_on_behalf_of: &str,
    ) -> Result<EscrowRecord, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();

        let record = self
            .repos
            .escrows
            .find(escrow_record_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("escrow_record", &escrow_record_id.0))?;
        let order = self.load_order(&record.order_id).await?;
        let entries = self
            .repos
            .time_entries
            .list_for_order(&order.id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        let outcome = self.engine.refund(record, order, &entries)?;
        self.repos
            .escrows
            .persist_refund(&outcome.record, &outcome.order)
            .await
            .map_err(store_error("escrow_record", &outcome.record.id.0))?;

        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.append_entry(
                &outcome.order.id,
                LedgerAction::Refund,
                outcome.record.gross_amount,
                acting_on_behalf_of,
            );
        }
        self.sinks.audit.emit(
            AuditEvent::new(
                Some(outcome.order.id.clone()),
                correlation_id,
                "escrow.refunded",
                AuditCategory::Escrow,
                acting_on_behalf_of,
                AuditOutcome::Success,
            )
            .with_metadata("reason", reason.to_string()),
        );
        for event in outcome.events.clone() {
            self.sinks.notifications.publish(event);
        }
        Ok(outcome.record)
    }

    async fn load_order(&self, order_id: &OrderId) -> Result<Order, ApplicationError> {
        self.repos
            .orders
            .find(order_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("order", &order_id.0))
    }

    /// Broken financial invariants are never swallowed: log with full
    /// context, park the order in `Disputed` so nothing else mutates the
    /// aggregate, and surface the original error.
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
                    "escrow.invariant_violation",
                    AuditCategory::Escrow,
                    "escrow-engine",
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
