use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use taskpay_core::audit::InMemoryAuditSink;
use taskpay_core::domain::approval::ApprovalDecision;
use taskpay_core::domain::escrow::PaymentReference;
use taskpay_core::domain::order::OrderStatus;
use taskpay_core::domain::party::{CustomerId, ProviderId};
use taskpay_core::domain::payee::{Payee, PayeeKind, PayoutDestination};
use taskpay_core::domain::payout::PayoutStatus;
use taskpay_core::domain::time_entry::{TimeCategory, TimeEntryStatus};
use taskpay_core::escrow::EscrowEngine;
use taskpay_core::events::{InMemoryNotificationSink, PaymentEvent, PaymentEventKind};
use taskpay_core::ledger::OrderLedger;
use taskpay_core::matching::ProposalDraft;
use taskpay_core::money::{Currency, Money};
use taskpay_core::timetracking::TimeEntryDraft;

use taskpay_db::repositories::{
    InMemoryApprovalRepository, InMemoryEscrowRepository, InMemoryOrderRepository,
    InMemoryPayeeRepository, InMemoryPaymentEventRepository, InMemoryPayoutRepository,
    InMemoryQuoteRepository, InMemoryTimeEntryRepository, InMemoryState, PayeeRepository,
    TimeEntryRepository,
};
use taskpay_payments::MockPaymentGateway;
use taskpay_server::services::{
    EscrowService, MatchingService, PayoutService, Repositories, Sinks, TimeTrackingService,
};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

struct Harness {
    matching: MatchingService,
    escrow: EscrowService,
    timetracking: TimeTrackingService,
    payouts: PayoutService,
    repos: Repositories,
    gateway: MockPaymentGateway,
    ledger: Arc<Mutex<OrderLedger>>,
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
    let sinks = Sinks {
        audit: Arc::new(InMemoryAuditSink::default()),
        notifications: Arc::new(InMemoryNotificationSink::default()),
    };
    let gateway = MockPaymentGateway::new();
    let ledger = Arc::new(Mutex::new(OrderLedger::new("smoke-signing-key")));

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
        ledger,
    }
}

pub fn run() -> CommandResult {
    let started = Instant::now();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "smoke",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let checks = runtime.block_on(run_scenario());
    finalize_report(checks, started.elapsed().as_millis() as u64)
}

async fn run_scenario() -> Vec<SmokeCheck> {
    let mut checks = Vec::new();
    let harness = harness();
    let customer = CustomerId("smoke-customer".to_string());
    let provider = ProviderId("smoke-provider".to_string());

    // Matching: two proposals in, one accepted, sibling declined.
    let step = Instant::now();
    let matching_result = async {
        let quote = harness
            .matching
            .create_quote(customer.clone(), "fence repair".to_string(), "handyman".to_string())
            .await?;
        harness
            .matching
            .submit_proposal(
                &quote.id,
                ProposalDraft {
                    provider_id: ProviderId("smoke-rival".to_string()),
                    total_amount: Money::new(50_000, Currency::Eur),
                    hourly_rate: Money::new(2_500, Currency::Eur),
                    planned_hours: Decimal::new(200, 1),
                    message: "crew of two".to_string(),
                },
            )
            .await?;
        let winner = harness
            .matching
            .submit_proposal(
                &quote.id,
                ProposalDraft {
                    provider_id: provider.clone(),
                    total_amount: Money::new(45_000, Currency::Eur),
                    hourly_rate: Money::new(2_000, Currency::Eur),
                    planned_hours: Decimal::new(225, 1),
                    message: "solo, careful work".to_string(),
                },
            )
            .await?;
        harness
            .repos
            .payees
            .save(&Payee {
                provider_id: provider.clone(),
                display_name: "Smoke Provider".to_string(),
                kind: PayeeKind::Individual {
                    destination: PayoutDestination("acct_smoke".to_string()),
                },
            })
            .await
            .map_err(|error| taskpay_core::errors::ApplicationError::Persistence(
                error.to_string(),
            ))?;
        harness.matching.accept_proposal(&quote.id, &winner.id, &customer).await
    }
    .await;
    let order = match matching_result {
        Ok(order) => {
            checks.push(pass("quote_matching", step, "proposal accepted, order created"));
            order
        }
        Err(error) => {
            checks.push(fail("quote_matching", step, error.to_string()));
            return checks;
        }
    };

    // Escrow: capture, then webhook confirmation (delivered twice).
    let step = Instant::now();
    let escrow_result = async {
        harness
            .escrow
            .capture_funds(&order.id, PaymentReference("pi_smoke".to_string()))
            .await?;
        let event = PaymentEvent {
            reference: PaymentReference("pi_smoke".to_string()),
            kind: PaymentEventKind::CaptureSucceeded,
            amount: Money::new(45_000, Currency::Eur),
        };
        harness.escrow.reconcile_webhook_event(&event).await?;
        harness.escrow.reconcile_webhook_event(&event).await
    }
    .await;
    match escrow_result {
        Ok(outcome) => checks.push(pass(
            "escrow_capture",
            step,
            format!("funds held; duplicate delivery was a no-op ({outcome:?})"),
        )),
        Err(error) => {
            checks.push(fail("escrow_capture", step, error.to_string()));
            return checks;
        }
    }

    // Time tracking and approval.
    let step = Instant::now();
    let approval_result = async {
        let entry = harness
            .timetracking
            .log_time(
                &order.id,
                TimeEntryDraft {
                    work_date: NaiveDate::from_ymd_opt(2026, 3, 9)
                        .unwrap_or_else(|| NaiveDate::MIN),
                    hours: Decimal::new(30, 1),
                    category: TimeCategory::Original,
                    description: "posts set and painted".to_string(),
                },
                &provider,
            )
            .await?;
        let request = harness
            .timetracking
            .submit_for_approval(&order.id, &[entry.id.clone()], None, &provider)
            .await?;
        harness
            .timetracking
            .resolve_approval(&request.id, ApprovalDecision::Approve, None, &customer)
            .await
    }
    .await;
    match approval_result {
        Ok(request) => checks.push(pass(
            "time_approval",
            step,
            format!("batch approved and billed at {} minor units", request.total_amount.amount_minor),
        )),
        Err(error) => {
            checks.push(fail("time_approval", step, error.to_string()));
            return checks;
        }
    }

    // Two-phase completion.
    let step = Instant::now();
    let completion_result = async {
        harness.timetracking.complete_by_provider(&order.id, &provider).await?;
        harness.timetracking.complete_by_customer(&order.id, &customer).await
    }
    .await;
    match completion_result {
        Ok(completed) if completed.status == OrderStatus::CustomerCompleted => {
            checks.push(pass("completion", step, "both sides confirmed"));
        }
        Ok(completed) => {
            checks.push(fail(
                "completion",
                step,
                format!("unexpected order status {}", completed.status.as_str()),
            ));
            return checks;
        }
        Err(error) => {
            checks.push(fail("completion", step, error.to_string()));
            return checks;
        }
    }

    // Payout with one simulated transfer outage, retried under the same key.
    let step = Instant::now();
    harness.gateway.fail_next_transfers(1);
    let first_attempt = harness.payouts.execute_payout(&order.id).await;
    let retry_result = match first_attempt {
        Err(_) => harness.payouts.execute_payout(&order.id).await,
        Ok(_) => {
            checks.push(fail(
                "payout_retry",
                step,
                "scripted transfer outage did not trigger".to_string(),
            ));
            return checks;
        }
    };
    match retry_result {
        Ok(payout)
            if payout.status == PayoutStatus::Transferred
                && harness.gateway.executed_transfer_count() == 1 =>
        {
            checks.push(pass(
                "payout_retry",
                step,
                format!(
                    "retry reused key {} and transferred {} minor units exactly once",
                    &payout.idempotency_key.0[..12],
                    payout.net_amount.amount_minor
                ),
            ));

            // Settlement webhook closes the loop.
            let step = Instant::now();
            let settle = PaymentEvent {
                reference: PaymentReference(
                    payout.transfer_reference.clone().unwrap_or_default(),
                ),
                kind: PaymentEventKind::TransferSucceeded,
                amount: payout.net_amount,
            };
            match harness.payouts.reconcile_transfer_event(&settle).await {
                Ok(_) => {
                    let entries = harness
                        .repos
                        .time_entries
                        .list_for_order(&order.id)
                        .await
                        .unwrap_or_default();
                    if entries.iter().all(|entry| entry.status == TimeEntryStatus::PaidOut) {
                        checks.push(pass("settlement", step, "all entries paid out"));
                    } else {
                        checks.push(fail(
                            "settlement",
                            step,
                            "entries did not reach paid_out".to_string(),
                        ));
                    }
                }
                Err(error) => checks.push(fail("settlement", step, error.to_string())),
            }
        }
        Ok(payout) => checks.push(fail(
            "payout_retry",
            step,
            format!("unexpected payout state {}", payout.status.as_str()),
        )),
        Err(error) => checks.push(fail("payout_retry", step, error.to_string())),
    }

    // Financial ledger chain must verify end to end.
    let step = Instant::now();
    let verification = harness
        .ledger
        .lock()
        .map(|ledger| ledger.verify_chain(&order.id))
        .ok();
    match verification {
        Some(result) if result.valid => checks.push(pass(
            "ledger_verification",
            step,
            format!("{} ledger entries verified", result.verified_entries),
        )),
        Some(result) => checks.push(fail(
            "ledger_verification",
            step,
            result.failure_reason.unwrap_or_else(|| "chain invalid".to_string()),
        )),
        None => checks.push(fail("ledger_verification", step, "ledger lock poisoned".to_string())),
    }

    checks
}

fn pass(name: &'static str, started: Instant, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Pass,
        elapsed_ms: started.elapsed().as_millis() as u64,
        message: message.into(),
    }
}

fn fail(name: &'static str, started: Instant, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Fail,
        elapsed_ms: started.elapsed().as_millis() as u64,
        message: message.into(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let failed = checks.iter().filter(|check| check.status == SmokeStatus::Fail).count();
    let status = if failed == 0 { SmokeStatus::Pass } else { SmokeStatus::Fail };
    let report = SmokeReport {
        command: "smoke",
        status,
        summary: if failed == 0 {
            "full order lifecycle completed".to_string()
        } else {
            format!("{failed} check(s) failed")
        },
        total_elapsed_ms,
        checks,
    };

    let output = serde_json::to_string_pretty(&report)
        .unwrap_or_else(|error| format!("smoke serialization failed: {error}"));
    CommandResult {
        exit_code: if failed == 0 { 0 } else { 1 },
        output,
    }
}
