//! End-to-end exercise of the sql repositories across one order lifecycle:
//! quote -> acceptance -> escrow capture -> logged time -> approval ->
//! payout, asserting the transactional guards along the way.

use rust_decimal::Decimal;

use taskpay_core::domain::approval::ApprovalDecision;
use taskpay_core::domain::escrow::PaymentReference;
use taskpay_core::domain::order::OrderStatus;
use taskpay_core::domain::payout::PayoutStatus;
use taskpay_core::domain::quote::ProposalStatus;
use taskpay_core::domain::time_entry::{TimeCategory, TimeEntryStatus};
use taskpay_core::escrow::EscrowEngine;
use taskpay_core::matching::ProposalMatcher;
use taskpay_core::money::{Currency, Money};
use taskpay_core::payouts::PayoutEngine;
use taskpay_core::timetracking::{TimeEntryDraft, TimeTrackingEngine};

use taskpay_db::fixtures::{self, seed_demo};
use taskpay_db::repositories::{
    ApprovalRepository, EscrowRepository, OrderRepository, PayoutRepository, QuoteRepository,
    RepositoryError, SqlApprovalRepository, SqlEscrowRepository, SqlOrderRepository,
    SqlPayoutRepository, SqlQuoteRepository, SqlTimeEntryRepository, TimeEntryRepository,
};
use taskpay_db::{connect_with_settings, migrations, DbPool};

async fn seeded_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    seed_demo(&pool).await.expect("seed");
    pool
}

#[tokio::test]
async fn full_lifecycle_round_trips_through_sqlite() {
    let pool = seeded_pool().await;
    let quotes = SqlQuoteRepository::new(pool.clone());
    let orders = SqlOrderRepository::new(pool.clone());
    let escrows = SqlEscrowRepository::new(pool.clone());
    let entries_repo = SqlTimeEntryRepository::new(pool.clone());
    let approvals = SqlApprovalRepository::new(pool.clone());
    let payouts = SqlPayoutRepository::new(pool.clone());

    let matcher = ProposalMatcher::new();
    let escrow_engine = EscrowEngine::new(Decimal::new(5, 2));
    let timetrack = TimeTrackingEngine::new();
    let payout_engine = PayoutEngine::new();

    // Accept the cheaper proposal; the sibling is declined in the same commit.
    let aggregate = quotes
        .load_aggregate(&fixtures::demo_quote().id)
        .await
        .expect("load")
        .expect("seeded aggregate");
    let customer = aggregate.quote.customer_id.clone();
    let solo = aggregate
        .proposals
        .iter()
        .find(|p| p.id.0 == fixtures::SEED_PROPOSAL_SOLO_ID)
        .expect("solo proposal")
        .id
        .clone();
    let acceptance =
        matcher.accept_proposal(aggregate, &solo, &customer).expect("acceptance outcome");
    quotes.persist_acceptance(&acceptance).await.expect("persist acceptance");

    let declined = quotes
        .find_proposal(&taskpay_core::domain::quote::ProposalId(
            fixtures::SEED_PROPOSAL_COMPANY_ID.to_string(),
        ))
        .await
        .expect("find")
        .expect("declined proposal");
    assert_eq!(declined.status, ProposalStatus::Declined);

    // Capture funds into escrow and confirm.
    let order = orders.find(&acceptance.order.id).await.expect("find").expect("order row");
    let capture = escrow_engine
        .initiate_capture(&order, PaymentReference("pi_lifecycle".to_string()))
        .expect("capture outcome");
    assert!(escrows.insert_if_absent(&capture.record).await.expect("insert escrow"));
    // A duplicate initiation with the same reference writes nothing.
    assert!(!escrows.insert_if_absent(&capture.record).await.expect("duplicate insert"));

    let confirmation = escrow_engine
        .apply_capture_confirmation(capture.record, order, Money::new(45_000, Currency::Eur))
        .expect("confirmation outcome");
    escrows
        .persist_confirmation(&confirmation.record, &confirmation.order)
        .await
        .expect("persist confirmation");

    // Log three hours and submit them.
    let order = orders.find(&acceptance.order.id).await.expect("find").expect("order row");
    assert_eq!(order.status, OrderStatus::EscrowHeld);
    let provider = order.provider_id.clone();
    let logged = timetrack
        .log_time(
            order,
            TimeEntryDraft {
                work_date: chrono::NaiveDate::from_ymd_opt(2026, 3, 9).expect("date"),
                hours: Decimal::new(30, 1),
                category: TimeCategory::Original,
                description: "posts set and painted".to_string(),
            },
            &provider,
        )
        .expect("log outcome");
    entries_repo
        .insert_with_order(&logged.entry, &logged.order)
        .await
        .expect("persist entry");

    let order = orders.find(&acceptance.order.id).await.expect("find").expect("order row");
    assert_eq!(order.status, OrderStatus::InProgress);

    let batch = entries_repo.list_for_order(&order.id).await.expect("list entries");
    let submission = timetrack
        .submit_for_approval(&order, batch, None, &provider)
        .expect("submission outcome");
    approvals
        .persist_submission(&submission.request, &submission.entries)
        .await
        .expect("persist submission");

    // Resubmitting the same entries must fail the logged guard.
    let stale = submission.entries.clone();
    let double = approvals.persist_submission(&submission.request, &stale).await;
    assert!(matches!(double, Err(RepositoryError::Conflict(_))));

    // Customer approves everything; entries land billed at 3h x 20.00.
    let resolution = timetrack
        .resolve_approval(
            &order,
            submission.request,
            submission.entries,
            ApprovalDecision::Approve,
            None,
            &customer,
        )
        .expect("resolution outcome");
    approvals
        .persist_resolution(&resolution.request, &resolution.entries)
        .await
        .expect("persist resolution");

    let billed = entries_repo.list_for_order(&order.id).await.expect("list entries");
    assert!(billed.iter().all(|entry| entry.status == TimeEntryStatus::Billed));
    assert_eq!(billed[0].billable_amount, Some(Money::new(6_000, Currency::Eur)));

    // Both sides confirm completion.
    let completed = timetrack.complete_by_provider(order, &provider).expect("provider confirm");
    orders.update(&completed.order).await.expect("persist provider confirm");
    let order = orders.find(&acceptance.order.id).await.expect("find").expect("order row");
    let completed = timetrack.complete_by_customer(order, &customer).expect("customer confirm");
    orders.update(&completed.order).await.expect("persist customer confirm");

    // Execute the payout.
    let order = orders.find(&acceptance.order.id).await.expect("find").expect("order row");
    assert_eq!(order.status, OrderStatus::CustomerCompleted);
    let escrow = escrows.find_by_order(&order.id).await.expect("find").expect("escrow row");
    let entries = entries_repo.list_for_order(&order.id).await.expect("list entries");

    let preparation = payout_engine
        .prepare_payout(&order, &escrow, &entries, None)
        .expect("payout staged");
    payouts.insert(&preparation.payout).await.expect("persist payout");

    let success = payout_engine
        .apply_transfer_success(preparation.payout, escrow, entries, "tr_lifecycle")
        .expect("transfer outcome");
    payouts
        .persist_transfer_success(&success.payout, &success.escrow, &success.entries)
        .await
        .expect("persist transfer");

    let stored_payout = payouts
        .find_by_transfer_reference("tr_lifecycle")
        .await
        .expect("find")
        .expect("payout row");
    assert_eq!(stored_payout.status, PayoutStatus::Transferred);
    assert_eq!(stored_payout.net_amount, Money::new(6_000, Currency::Eur));

    // Settle via the webhook-side confirmation.
    let escrow = escrows.find_by_order(&order.id).await.expect("find").expect("escrow row");
    assert_eq!(escrow.held_amount.amount_minor, 36_750);
    let entries = entries_repo.list_for_order(&order.id).await.expect("list entries");
    let settlement = payout_engine
        .apply_transfer_confirmation(stored_payout, entries, &escrow, order)
        .expect("settlement outcome");
    assert!(settlement.applied);
    payouts
        .persist_settlement(&settlement.payout, &settlement.entries, &settlement.order)
        .await
        .expect("persist settlement");

    let entries = entries_repo
        .list_for_order(&settlement.order.id)
        .await
        .expect("list entries");
    assert!(entries.iter().all(|entry| entry.status == TimeEntryStatus::PaidOut));
}

#[tokio::test]
async fn racing_acceptances_commit_exactly_one_order() {
    let pool = seeded_pool().await;
    let quotes = SqlQuoteRepository::new(pool.clone());
    let matcher = ProposalMatcher::new();

    let aggregate = quotes
        .load_aggregate(&fixtures::demo_quote().id)
        .await
        .expect("load")
        .expect("aggregate");
    let customer = aggregate.quote.customer_id.clone();
    let first_id = aggregate.proposals[0].id.clone();
    let second_id = aggregate.proposals[1].id.clone();

    let accept_first = matcher
        .accept_proposal(aggregate.clone(), &first_id, &customer)
        .expect("first decision");
    let accept_second =
        matcher.accept_proposal(aggregate, &second_id, &customer).expect("second decision");

    let first = quotes.persist_acceptance(&accept_first).await;
    let second = quotes.persist_acceptance(&accept_second).await;

    assert!(first.is_ok());
    assert!(matches!(second, Err(RepositoryError::Conflict(_))));
}

#[tokio::test]
async fn order_updates_are_version_guarded() {
    let pool = seeded_pool().await;
    let quotes = SqlQuoteRepository::new(pool.clone());
    let orders = SqlOrderRepository::new(pool.clone());
    let matcher = ProposalMatcher::new();

    let aggregate = quotes
        .load_aggregate(&fixtures::demo_quote().id)
        .await
        .expect("load")
        .expect("aggregate");
    let customer = aggregate.quote.customer_id.clone();
    let proposal_id = aggregate.proposals[0].id.clone();
    let acceptance =
        matcher.accept_proposal(aggregate, &proposal_id, &customer).expect("acceptance");
    quotes.persist_acceptance(&acceptance).await.expect("persist");

    let mut fresh = orders.find(&acceptance.order.id).await.expect("find").expect("order");
    fresh.transition_to(OrderStatus::EscrowHeld).expect("legal transition");
    orders.update(&fresh).await.expect("first write wins");

    // The same snapshot written again carries a stale version.
    let stale = orders.update(&fresh).await;
    assert!(matches!(stale, Err(RepositoryError::Conflict(_))));
}
