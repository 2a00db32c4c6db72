//! Application services: one per engine component. Each operation loads an
//! aggregate snapshot, runs the pure engine transition, persists the outcome
//! through a single transactional repository call, then emits audit and
//! notification events. Identity is trusted as passed (the auth layer owns
//! authentication); services only enforce ownership.

use std::sync::Arc;

use taskpay_core::audit::AuditSink;
use taskpay_core::errors::ApplicationError;
use taskpay_core::events::NotificationSink;

use taskpay_db::repositories::{
    ApprovalRepository, EscrowRepository, OrderRepository, PayeeRepository,
    PaymentEventRepository, PayoutRepository, QuoteRepository, RepositoryError,
    TimeEntryRepository,
};

pub mod escrow;
pub mod matching;
pub mod payouts;
pub mod timetracking;

pub use escrow::{EscrowService, ReconcileOutcome};
pub use matching::MatchingService;
pub use payouts::PayoutService;
pub use timetracking::TimeTrackingService;

/// Every repository the services need, behind trait objects so tests can
/// swap the sql store for the in-memory one.
#[derive(Clone)]
pub struct Repositories {
    pub quotes: Arc<dyn QuoteRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub escrows: Arc<dyn EscrowRepository>,
    pub time_entries: Arc<dyn TimeEntryRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub payouts: Arc<dyn PayoutRepository>,
    pub payment_events: Arc<dyn PaymentEventRepository>,
    pub payees: Arc<dyn PayeeRepository>,
}

#[derive(Clone)]
pub struct Sinks {
    pub audit: Arc<dyn AuditSink>,
    pub notifications: Arc<dyn NotificationSink>,
}

/// Maps a repository failure for `entity`/`id`: write-write conflicts become
/// the caller-facing stale-aggregate error, everything else is persistence.
pub(crate) fn store_error<'a>(
    entity: &'static str,
    id: &'a str,
) -> impl FnOnce(RepositoryError) -> ApplicationError + 'a {
    move |error| match error {
        RepositoryError::Conflict(_) => ApplicationError::Domain(
            taskpay_core::errors::DomainError::StaleAggregate { entity, id: id.to_string() },
        ),
        other => ApplicationError::Persistence(other.to_string()),
    }
}

pub(crate) fn not_found(entity: &'static str, id: &str) -> ApplicationError {
    ApplicationError::NotFound { entity, id: id.to_string() }
}
