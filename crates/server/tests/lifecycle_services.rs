//! Service-level lifecycle tests against the in-memory store and the mock
//! payment gateway: the worked example scenario plus the idempotency and
//! conflict properties the engine guarantees.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use taskpay_core::audit::InMemoryAuditSink;
use taskpay_core::domain::approval::ApprovalDecision;
use taskpay_core::domain::escrow::{EscrowStatus, PaymentReference};
use taskpay_core::domain::order::{Order, OrderId, OrderStatus};
use taskpay_core::domain::party::{CustomerId, ProviderId};
use taskpay_core::domain::payee::{Payee, PayeeKind, PayoutDestination};
use taskpay_core::domain::payout::PayoutStatus;
use taskpay_core::domain::quote::{ProposalStatus, Quote};
use taskpay_core::domain::time_entry::{TimeCategory, TimeEntryStatus};
use taskpay_core::errors::{ApplicationError, DomainError};
use taskpay_core::escrow::EscrowEngine;
use taskpay_core::events::{
    InMemoryNotificationSink, PaymentEvent, PaymentEventKind,
};
use taskpay_core::ledger::OrderLedger;
use taskpay_core::matching::ProposalDraft;
use taskpay_core::money::{Currency, Money};
use taskpay_core::timetracking::TimeEntryDraft;

use taskpay_db::repositories::{
    EscrowRepository, InMemoryApprovalRepository, InMemoryEscrowRepository,
    InMemoryOrderRepository, InMemoryPayeeRepository, InMemoryPaymentEventRepository,
    InMemoryPayoutRepository, InMemoryQuoteRepository, InMemoryTimeEntryRepository,
    InMemoryState, OrderRepository, PayeeRepository, PayoutRepository, QuoteRepository,
    TimeEntryRepository,
};
use taskpay_payments::MockPaymentGateway;

use taskpay_server::services::{
    EscrowService, MatchingService, PayoutService, ReconcileOutcome, Repositories, Sinks,
    TimeTrackingService,
};

struct Harness {
    matching: MatchingService,
    escrow: EscrowService,
    timetracking: TimeTrackingService,
    payouts: PayoutService,
    repos: Repositories,
    gateway: MockPaymentGateway,
    notifications: InMemoryNotificationSink,
    audit: InMemoryAuditSink,
    ledger: Arc<Mutex<OrderLedger>>,
    customer: CustomerId,
    provider: ProviderId,
}

fn harness() -> Harness {
    let state = InMemoryState::shared();
    let repos = Repositories {
        quotes: Arc::new(InMemoryQuoteRepository::new(state.clone())),
        orders: Arc::new(InMemoryOrderRepository::new(state.clone())),
        escrows: Arc::new(InMemoryEscrowRepository::new(state.clone())),
        time_entries: Arc::new(InMemoryTimeEntryRepository::new(state.clone())),
        approvals: Arc::new(InMemoryApprovalRepository::new(state.clone())),
        payouts: Arc::new(InMemoryPayoutRepository::new(state.clone())),
        payment_events: Arc::new(InMemoryPaymentEventRepository::new(state.clone())),
        payees: Arc::new(InMemoryPayeeRepository::new(state.clone())),
    };
    let notifications = InMemoryNotificationSink::default();
    let audit = InMemoryAuditSink::default();
    let sinks = Sinks {
        audit: Arc::new(audit.clone()),
        notifications: Arc::new(notifications.clone()),
    };
    let gateway = MockPaymentGateway::new();
    let ledger = Arc::new(Mutex::new(OrderLedger::new("test-signing-key")));

    Harness {
        matching: MatchingService::new(repos.clone(), sinks.clone()),
        escrow: EscrowService::new(
            repos.clone(),
            sinks.clone(),
            EscrowEngine::new(Decimal::new(5, 2)),
            Arc::new(gateway.clone()),
            ledger.clone(),
        ),
        timetracking: TimeTrackingService::new(repos.clone(), sinks.clone()),
        payouts: PayoutService::new(
            repos.clone(),
            sinks,
            Arc::new(gateway.clone()),
            ledger.clone(),
        ),
        repos,
        gateway,
        notifications,
        audit,
        ledger,
        customer: CustomerId("cust-1".to_string()),
        provider: ProviderId("prov-1".to_string()),
    }
}

fn draft(provider: &str, total_minor: i64, rate_minor: i64) -> ProposalDraft {
    ProposalDraft {
        provider_id: ProviderId(provider.to_string()),
        total_amount: Money::new(total_minor, Currency::Eur),
        hourly_rate: Money::new(rate_minor, Currency::Eur),
        planned_hours: Decimal::new(225, 1),
        message: "can start monday".to_string(),
    }
}

fn capture_event(reference: &str, amount_minor: i64) -> PaymentEvent {
    PaymentEvent {
        reference: PaymentReference(reference.to_string()),
        kind: PaymentEventKind::CaptureSucceeded,
        amount: Money::new(amount_minor, Currency::Eur),
    }
}

async fn accepted_order(harness: &Harness) -> (Quote, Order) {
    let quote = harness
        .matching
        .create_quote(
            harness.customer.clone(),
            "garden fence repair".to_string(),
            "handyman".to_string(),
        )
        .await
        .expect("quote created");
    harness
        .matching
        .submit_proposal(&quote.id, draft("prov-other", 50_000, 2_500))
        .await
        .expect("first proposal");
    let winner = harness
        .matching
        .submit_proposal(&quote.id, draft(&harness.provider.0, 45_000, 2_000))
        .await
        .expect("second proposal");
    let order = harness
        .matching
        .accept_proposal(&quote.id, &winner.id, &harness.customer)
        .await
        .expect("acceptance");
    harness
        .repos
        .payees
        .save(&Payee {
            provider_id: harness.provider.clone(),
            display_name: "Jo Fencer".to_string(),
            kind: PayeeKind::Individual {
                destination: PayoutDestination("acct_test".to_string()),
            },
        })
        .await
        .expect("payee saved");
    (quote, order)
}

async fn funded_order(harness: &Harness, reference: &str) -> Order {
    let (_, order) = accepted_order(harness).await;
    harness
        .escrow
        .capture_funds(&order.id, PaymentReference(reference.to_string()))
        .await
        .expect("capture staged");
    let outcome = harness
        .escrow
        .reconcile_webhook_event(&capture_event(reference, 45_000))
        .await
        .expect("confirmation applied");
    assert_eq!(outcome, ReconcileOutcome::Applied);
    harness.repos.orders.find(&order.id).await.expect("find").expect("order")
}

async fn billed_order(harness: &Harness, reference: &str) -> OrderId {
    let order = funded_order(harness, reference).await;
    let entry = harness
        .timetracking
        .log_time(
            &order.id,
            TimeEntryDraft {
                work_date: NaiveDate::from_ymd_opt(2026, 3, 9).expect("date"),
                hours: Decimal::new(30, 1),
                category: TimeCategory::Original,
                description: "posts set and painted".to_string(),
            },
            &harness.provider,
        )
        .await
        .expect("time logged");
    let request = harness
        .timetracking
        .submit_for_approval(&order.id, &[entry.id.clone()], None, &harness.provider)
        .await
        .expect("submitted");
    harness
        .timetracking
        .resolve_approval(&request.id, ApprovalDecision::Approve, None, &harness.customer)
        .await
        .expect("approved");
    harness
        .timetracking
        .complete_by_provider(&order.id, &harness.provider)
        .await
        .expect("provider confirmed");
    harness
        .timetracking
        .complete_by_customer(&order.id, &harness.customer)
        .await
        .expect("customer confirmed");
    order.id
}

#[tokio::test]
async fn worked_example_scenario_ends_fully_paid_out() {
    let harness = harness();
    let order_id = billed_order(&harness, "pi_example").await;

    // Escrow conservation after capture: 45 000 = 2 250 + 42 750.
    let escrow = harness
        .repos
        .escrows
        .find_by_order(&order_id)
        .await
        .expect("find")
        .expect("escrow");
    assert_eq!(escrow.platform_fee_amount.amount_minor, 2_250);
    assert_eq!(escrow.provider_amount.amount_minor, 42_750);

    let net = harness
        .payouts
        .compute_net_payout(&order_id)
        .await
        .expect("computable")
        .expect("owed");
    assert_eq!(net.net_amount, Money::new(6_000, Currency::Eur));

    let payout = harness.payouts.execute_payout(&order_id).await.expect("payout executed");
    assert_eq!(payout.status, PayoutStatus::Transferred);
    assert_eq!(payout.net_amount, Money::new(6_000, Currency::Eur));

    // Settle via the transfer confirmation webhook.
    let settle = PaymentEvent {
        reference: PaymentReference(
            payout.transfer_reference.clone().expect("transfer reference"),
        ),
        kind: PaymentEventKind::TransferSucceeded,
        amount: payout.net_amount,
    };
    let outcome =
        harness.payouts.reconcile_transfer_event(&settle).await.expect("settlement applied");
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let entries = harness
        .repos
        .time_entries
        .list_for_order(&order_id)
        .await
        .expect("entries");
    assert!(entries.iter().all(|entry| entry.status == TimeEntryStatus::PaidOut));

    let escrow = harness
        .repos
        .escrows
        .find_by_order(&order_id)
        .await
        .expect("find")
        .expect("escrow");
    assert_eq!(escrow.held_amount.amount_minor, 42_750 - 6_000);
    assert_eq!(escrow.status, EscrowStatus::PartiallyReleased);

    // The financial ledger chain stays verifiable end to end.
    let verification =
        harness.ledger.lock().expect("ledger lock").verify_chain(&order_id);
    assert!(verification.valid, "{:?}", verification.failure_reason);
    assert_eq!(verification.verified_entries, 4);

    // Notifications covered the whole journey.
    let events = harness.notifications.events();
    assert!(events.iter().any(|e| format!("{e:?}").contains("ProposalAccepted")));
    assert!(events.iter().any(|e| format!("{e:?}").contains("EscrowHeld")));
    assert!(events.iter().any(|e| format!("{e:?}").contains("PayoutCompleted")));
}

#[tokio::test]
async fn accepting_a_proposal_twice_is_a_conflict() {
    let harness = harness();
    let (quote, _) = accepted_order(&harness).await;

    let aggregate = harness
        .repos
        .quotes
        .load_aggregate(&quote.id)
        .await
        .expect("load")
        .expect("aggregate");
    let loser = aggregate
        .proposals
        .iter()
        .find(|p| p.status == ProposalStatus::Declined)
        .expect("declined sibling");

    let error = harness
        .matching
        .accept_proposal(&quote.id, &loser.id, &harness.customer)
        .await
        .expect_err("second acceptance must fail");
    assert!(matches!(
        error,
        ApplicationError::Domain(DomainError::QuoteClosed { .. })
    ));
}

#[tokio::test]
async fn duplicate_capture_confirmations_apply_exactly_once() {
    let harness = harness();
    let (_, order) = accepted_order(&harness).await;

    harness
        .escrow
        .capture_funds(&order.id, PaymentReference("pi_dup".to_string()))
        .await
        .expect("capture staged");

    let first = harness
        .escrow
        .reconcile_webhook_event(&capture_event("pi_dup", 45_000))
        .await
        .expect("first delivery");
    let second = harness
        .escrow
        .reconcile_webhook_event(&capture_event("pi_dup", 45_000))
        .await
        .expect("second delivery");

    assert_eq!(first, ReconcileOutcome::Applied);
    assert_eq!(second, ReconcileOutcome::Duplicate);

    let order = harness.repos.orders.find(&order.id).await.expect("find").expect("order");
    assert_eq!(order.status, OrderStatus::EscrowHeld);
}

#[tokio::test]
async fn capture_funds_is_idempotent_per_reference() {
    let harness = harness();
    let (_, order) = accepted_order(&harness).await;

    let first = harness
        .escrow
        .capture_funds(&order.id, PaymentReference("pi_retry".to_string()))
        .await
        .expect("first call");
    let second = harness
        .escrow
        .capture_funds(&order.id, PaymentReference("pi_retry".to_string()))
        .await
        .expect("retried call");

    assert_eq!(first.id, second.id);
    assert_eq!(harness.gateway.capture_calls(), 1);
}

#[tokio::test]
async fn confirmation_arriving_before_capture_is_deferred_then_applied() {
    let harness = harness();
    let (_, order) = accepted_order(&harness).await;

    // Webhook wins the race against the initiating call.
    let outcome = harness
        .escrow
        .reconcile_webhook_event(&capture_event("pi_early", 45_000))
        .await
        .expect("early delivery");
    assert_eq!(outcome, ReconcileOutcome::Deferred);

    let record = harness
        .escrow
        .capture_funds(&order.id, PaymentReference("pi_early".to_string()))
        .await
        .expect("capture call");
    assert_eq!(record.status, EscrowStatus::Held);

    let order = harness.repos.orders.find(&order.id).await.expect("find").expect("order");
    assert_eq!(order.status, OrderStatus::EscrowHeld);
}

#[tokio::test]
async fn payout_retry_reuses_the_key_and_transfers_once() {
    let harness = harness();
    let order_id = billed_order(&harness, "pi_payout_retry").await;

    harness.gateway.fail_next_transfers(1);
    let error = harness
        .payouts
        .execute_payout(&order_id)
        .await
        .expect_err("first attempt fails");
    assert!(matches!(error, ApplicationError::PayoutFailed(_)));

    // Entries stay billed so the retry recomputes the identical amount.
    let entries = harness
        .repos
        .time_entries
        .list_for_order(&order_id)
        .await
        .expect("entries");
    assert!(entries.iter().all(|entry| entry.status == TimeEntryStatus::Billed));

    let payout = harness.payouts.execute_payout(&order_id).await.expect("retry succeeds");
    assert_eq!(payout.status, PayoutStatus::Transferred);

    // Two transfer calls hit the processor, exactly one executed, and
    // exactly one payout row exists.
    assert_eq!(harness.gateway.transfer_calls(), 2);
    assert_eq!(harness.gateway.executed_transfer_count(), 1);
    let payouts = harness
        .repos
        .payouts
        .list_for_order(&order_id)
        .await
        .expect("payouts");
    assert_eq!(payouts.len(), 1);
}

#[tokio::test]
async fn double_executing_a_completed_payout_is_rejected() {
    let harness = harness();
    let order_id = billed_order(&harness, "pi_double_payout").await;

    harness.payouts.execute_payout(&order_id).await.expect("first payout");
    let error = harness
        .payouts
        .execute_payout(&order_id)
        .await
        .expect_err("nothing left to pay");
    // All entries are platform_held now, so no billed work remains.
    assert!(matches!(error, ApplicationError::NotFound { .. }));
    assert_eq!(harness.gateway.executed_transfer_count(), 1);

    // The order is untouched, not parked in dispute.
    let order = harness.repos.orders.find(&order_id).await.expect("find").expect("order");
    assert_eq!(order.status, OrderStatus::CustomerCompleted);
}

#[tokio::test]
async fn concurrent_approval_resolutions_have_one_winner() {
    let harness = harness();
    let order = funded_order(&harness, "pi_approval_race").await;

    let entry = harness
        .timetracking
        .log_time(
            &order.id,
            TimeEntryDraft {
                work_date: NaiveDate::from_ymd_opt(2026, 3, 9).expect("date"),
                hours: Decimal::new(20, 1),
                category: TimeCategory::Original,
                description: "first pass".to_string(),
            },
            &harness.provider,
        )
        .await
        .expect("logged");
    let request = harness
        .timetracking
        .submit_for_approval(&order.id, &[entry.id.clone()], None, &harness.provider)
        .await
        .expect("submitted");

    let approve = harness
        .timetracking
        .resolve_approval(&request.id, ApprovalDecision::Approve, None, &harness.customer)
        .await;
    let reject = harness
        .timetracking
        .resolve_approval(&request.id, ApprovalDecision::Reject, None, &harness.customer)
        .await;

    assert!(approve.is_ok());
    let error = reject.expect_err("second decision loses");
    assert!(matches!(
        error,
        ApplicationError::Domain(DomainError::InvalidStateTransition { .. })
    ));

    let stored = harness
        .repos
        .time_entries
        .find(&entry.id)
        .await
        .expect("find")
        .expect("entry");
    assert_eq!(stored.status, TimeEntryStatus::Billed);
}

#[tokio::test]
async fn refund_is_possible_before_billing_and_blocked_after() {
    let harness = harness();

    // Before billing: refund cancels the order.
    let order = funded_order(&harness, "pi_refund_ok").await;
    let escrow = harness
        .repos
        .escrows
        .find_by_order(&order.id)
        .await
        .expect("find")
        .expect("escrow");
    let refunded = harness
        .escrow
        .refund(&escrow.id, "customer cancelled before work started", "support-desk")
        .await
        .expect("refund");
    assert_eq!(refunded.status, EscrowStatus::Refunded);
    let order = harness.repos.orders.find(&order.id).await.expect("find").expect("order");
    assert_eq!(order.status, OrderStatus::Cancelled);

    // After billing: refund is no longer legal.
    let order_id = billed_order(&harness, "pi_refund_blocked").await;
    let escrow = harness
        .repos
        .escrows
        .find_by_order(&order_id)
        .await
        .expect("find")
        .expect("escrow");
    let error = harness
        .escrow
        .refund(&escrow.id, "too late", "support-desk")
        .await
        .expect_err("billed work blocks refund");
    assert!(matches!(
        error,
        ApplicationError::Domain(DomainError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn capture_confirmation_with_wrong_amount_parks_the_order() {
    let harness = harness();
    let (_, order) = accepted_order(&harness).await;

    harness
        .escrow
        .capture_funds(&order.id, PaymentReference("pi_bad_amount".to_string()))
        .await
        .expect("capture staged");

    let error = harness
        .escrow
        .reconcile_webhook_event(&capture_event("pi_bad_amount", 44_999))
        .await
        .expect_err("amount mismatch is fatal");
    assert!(matches!(
        error,
        ApplicationError::Domain(DomainError::InvariantViolation(_))
    ));

    // Order status is irrelevant here (still pending payment, which cannot
    // move to disputed) but nothing advanced to escrow_held.
    let order = harness.repos.orders.find(&order.id).await.expect("find").expect("order");
    assert_ne!(order.status, OrderStatus::EscrowHeld);

    let audit_events = harness.audit.events();
    assert!(audit_events
        .iter()
        .any(|event| event.event_type == "escrow.invariant_violation"));
}
