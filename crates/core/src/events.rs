use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalRequestId, ApprovalStatus};
use crate::domain::escrow::{EscrowRecordId, PaymentReference};
use crate::domain::order::OrderId;
use crate::domain::payout::PayoutId;
use crate::domain::quote::{ProposalId, QuoteId};
use crate::money::Money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    CaptureSucceeded,
    CaptureFailed,
    TransferSucceeded,
    TransferFailed,
}

impl PaymentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaptureSucceeded => "capture_succeeded",
            Self::CaptureFailed => "capture_failed",
            Self::TransferSucceeded => "transfer_succeeded",
            Self::TransferFailed => "transfer_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "capture_succeeded" => Some(Self::CaptureSucceeded),
            "capture_failed" => Some(Self::CaptureFailed),
            "transfer_succeeded" => Some(Self::TransferSucceeded),
            "transfer_failed" => Some(Self::TransferFailed),
            _ => None,
        }
    }
}

/// An asynchronous confirmation from the payment processor. Delivery is
/// at-least-once and unordered relative to the initiating call; consumers
/// dedupe by reference and apply commutatively.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub reference: PaymentReference,
    pub kind: PaymentEventKind,
    pub amount: Money,
}

/// Facts the engine announces to notification subscribers. Delivery is
/// fire-and-forget; no engine operation blocks on a subscriber.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum DomainEvent {
    ProposalSubmitted { quote_id: QuoteId, proposal_id: ProposalId },
    ProposalAccepted { quote_id: QuoteId, proposal_id: ProposalId, order_id: OrderId },
    QuoteCancelled { quote_id: QuoteId },
    EscrowHeld { order_id: OrderId, escrow_record_id: EscrowRecordId, gross_amount: Money },
    EscrowRefunded { order_id: OrderId, escrow_record_id: EscrowRecordId },
    ApprovalRequested { order_id: OrderId, approval_request_id: ApprovalRequestId, total_amount: Money },
    ApprovalResolved { order_id: OrderId, approval_request_id: ApprovalRequestId, outcome: ApprovalStatus },
    OrderCompleted { order_id: OrderId },
    PayoutCompleted { order_id: OrderId, payout_id: PayoutId, net_amount: Money },
    PayoutFailed { order_id: OrderId, payout_id: PayoutId },
}

pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Collects events for assertions in tests and for the smoke harness.
#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl InMemoryNotificationSink {
    pub fn events(&self) -> Vec<DomainEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn publish(&self, event: DomainEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Drops every event. Stands in wherever notifications are out of scope.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotificationSink;

impl NotificationSink for NoopNotificationSink {
    fn publish(&self, _event: DomainEvent) {}
}
