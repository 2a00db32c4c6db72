use async_trait::async_trait;
use thiserror::Error;

use taskpay_core::domain::approval::{ApprovalRequest, ApprovalRequestId};
use taskpay_core::domain::escrow::{EscrowRecord, EscrowRecordId, PaymentReference};
use taskpay_core::domain::order::{Order, OrderId};
use taskpay_core::domain::party::ProviderId;
use taskpay_core::domain::payee::Payee;
use taskpay_core::domain::payout::{IdempotencyKey, Payout};
use taskpay_core::domain::quote::{Proposal, ProposalId, Quote, QuoteId};
use taskpay_core::domain::time_entry::{TimeEntry, TimeEntryId};
use taskpay_core::events::{PaymentEvent, PaymentEventKind};
use taskpay_core::matching::{AcceptanceOutcome, CancellationOutcome, QuoteAggregate};

pub mod approval;
pub mod escrow;
pub mod memory;
pub mod order;
pub mod payee;
pub mod payment_event;
pub mod payout;
pub mod quote;
pub(crate) mod row;
pub mod time_entry;

pub use approval::SqlApprovalRepository;
pub use escrow::SqlEscrowRepository;
pub use memory::{
    InMemoryApprovalRepository, InMemoryEscrowRepository, InMemoryOrderRepository,
    InMemoryPayeeRepository, InMemoryPaymentEventRepository, InMemoryPayoutRepository,
    InMemoryQuoteRepository, InMemoryState, InMemoryTimeEntryRepository,
};
pub use order::SqlOrderRepository;
pub use payee::SqlPayeeRepository;
pub use payment_event::SqlPaymentEventRepository;
pub use payout::SqlPayoutRepository;
pub use quote::SqlQuoteRepository;
pub use time_entry::SqlTimeEntryRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// A guarded write lost to a concurrent transaction. The caller must
    /// re-fetch and re-decide, never blindly retry.
    #[error("write conflict: {0}")]
    Conflict(String),
}

/// Quote + proposals aggregate. `persist_acceptance` is the serialization
/// point for the one-order-per-quote invariant: its quote update is guarded
/// on `status = 'open'`, so of two racing acceptances exactly one commits and
/// the loser gets `Conflict`.
#[async_trait]
pub trait QuoteRepository: Send + Sync {
    async fn insert_quote(&self, quote: &Quote) -> Result<(), RepositoryError>;
    async fn insert_proposal(&self, proposal: &Proposal) -> Result<(), RepositoryError>;
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError>;
    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError>;
    async fn load_aggregate(&self, id: &QuoteId)
        -> Result<Option<QuoteAggregate>, RepositoryError>;
    async fn update_proposal(&self, proposal: &Proposal) -> Result<(), RepositoryError>;
    async fn persist_acceptance(&self, outcome: &AcceptanceOutcome)
        -> Result<(), RepositoryError>;
    async fn persist_cancellation(
        &self,
        outcome: &CancellationOutcome,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    /// Version-guarded write: fails with `Conflict` when the stored row moved
    /// past the version the caller loaded.
    async fn update(&self, order: &Order) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait EscrowRepository: Send + Sync {
    /// Insert keyed by the unique payment reference. Returns false (and
    /// writes nothing) when a record with that reference already exists,
    /// which is what makes capture initiation retry-safe.
    async fn insert_if_absent(&self, record: &EscrowRecord) -> Result<bool, RepositoryError>;
    async fn find(
        &self,
        id: &EscrowRecordId,
    ) -> Result<Option<EscrowRecord>, RepositoryError>;
    async fn find_by_order(&self, order_id: &OrderId)
        -> Result<Option<EscrowRecord>, RepositoryError>;
    async fn find_by_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<EscrowRecord>, RepositoryError>;
    /// Escrow + order written in one transaction, both version-guarded.
    async fn persist_confirmation(
        &self,
        record: &EscrowRecord,
        order: &Order,
    ) -> Result<(), RepositoryError>;
    async fn persist_refund(
        &self,
        record: &EscrowRecord,
        order: &Order,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TimeEntryRepository: Send + Sync {
    /// New entry plus the order's (possibly advanced) status, atomically.
    async fn insert_with_order(
        &self,
        entry: &TimeEntry,
        order: &Order,
    ) -> Result<(), RepositoryError>;
    async fn find(&self, id: &TimeEntryId) -> Result<Option<TimeEntry>, RepositoryError>;
    async fn find_many(&self, ids: &[TimeEntryId]) -> Result<Vec<TimeEntry>, RepositoryError>;
    async fn list_for_order(&self, order_id: &OrderId)
        -> Result<Vec<TimeEntry>, RepositoryError>;
}

/// Approval aggregate. Both writes span the request and every referenced
/// entry in a single transaction; a half-applied decision would strand
/// entries in `submitted` with no owner, which is the one failure mode this
/// store must never produce.
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find(&self, id: &ApprovalRequestId)
        -> Result<Option<ApprovalRequest>, RepositoryError>;
    async fn persist_submission(
        &self,
        request: &ApprovalRequest,
        entries: &[TimeEntry],
    ) -> Result<(), RepositoryError>;
    async fn persist_resolution(
        &self,
        request: &ApprovalRequest,
        entries: &[TimeEntry],
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait PayoutRepository: Send + Sync {
    async fn insert(&self, payout: &Payout) -> Result<(), RepositoryError>;
    async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<Payout>, RepositoryError>;
    async fn find_by_transfer_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payout>, RepositoryError>;
    async fn list_for_order(&self, order_id: &OrderId) -> Result<Vec<Payout>, RepositoryError>;
    async fn persist_transfer_success(
        &self,
        payout: &Payout,
        escrow: &EscrowRecord,
        entries: &[TimeEntry],
    ) -> Result<(), RepositoryError>;
    async fn persist_transfer_failure(&self, payout: &Payout) -> Result<(), RepositoryError>;
    async fn persist_settlement(
        &self,
        payout: &Payout,
        entries: &[TimeEntry],
        order: &Order,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait PaymentEventRepository: Send + Sync {
    /// Records the event once per (reference, kind). Returns false for a
    /// duplicate delivery, which callers treat as an idempotent success.
    async fn record_if_new(&self, event: &PaymentEvent) -> Result<bool, RepositoryError>;
    async fn find(
        &self,
        reference: &PaymentReference,
        kind: PaymentEventKind,
    ) -> Result<Option<PaymentEvent>, RepositoryError>;
}

#[async_trait]
pub trait PayeeRepository: Send + Sync {
    async fn find(&self, provider_id: &ProviderId) -> Result<Option<Payee>, RepositoryError>;
    async fn save(&self, payee: &Payee) -> Result<(), RepositoryError>;
}
