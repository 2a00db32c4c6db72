pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod escrow;
pub mod events;
pub mod ledger;
pub mod matching;
pub mod money;
pub mod payouts;
pub mod timetracking;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::approval::{ApprovalDecision, ApprovalRequest, ApprovalRequestId, ApprovalStatus};
pub use domain::escrow::{EscrowRecord, EscrowRecordId, EscrowStatus, PaymentReference};
pub use domain::order::{Order, OrderId, OrderStatus};
pub use domain::party::{CustomerId, ProviderId};
pub use domain::payee::{Payee, PayeeKind, PayoutDestination};
pub use domain::payout::{IdempotencyKey, Payout, PayoutId, PayoutStatus};
pub use domain::quote::{Proposal, ProposalId, ProposalStatus, Quote, QuoteId, QuoteStatus};
pub use domain::time_entry::{TimeCategory, TimeEntry, TimeEntryId, TimeEntryStatus};
pub use errors::{ApplicationError, DomainError, ErrorClass, InterfaceError};
pub use escrow::{CaptureOutcome, CaptureRequest, ConfirmationOutcome, EscrowEngine, RefundOutcome};
pub use events::{
    DomainEvent, InMemoryNotificationSink, NoopNotificationSink, NotificationSink, PaymentEvent,
    PaymentEventKind,
};
pub use ledger::{LedgerAction, LedgerEntry, OrderLedger, VerificationResult};
pub use matching::{
    AcceptanceOutcome, CancellationOutcome, ProposalDraft, ProposalMatcher, QuoteAggregate,
};
pub use money::{split_fee, Currency, FeeSplit, Money};
pub use payouts::{NetPayout, PayoutEngine, PayoutPreparation};
pub use timetracking::{TimeEntryDraft, TimeTrackingEngine};
