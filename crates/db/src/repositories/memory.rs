//! In-memory fakes for the repository traits.
//!
//! These back the service tests and the smoke harness. They enforce the same
//! guards as the sql implementations (open-quote acceptance, pending-approval
//! resolution, version checks), validating every precondition before mutating
//! anything so a failed operation leaves no partial writes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use taskpay_core::domain::approval::{ApprovalRequest, ApprovalRequestId};
use taskpay_core::domain::escrow::{EscrowRecord, EscrowRecordId, PaymentReference};
use taskpay_core::domain::order::{Order, OrderId};
use taskpay_core::domain::party::ProviderId;
use taskpay_core::domain::payee::Payee;
use taskpay_core::domain::payout::{IdempotencyKey, Payout, PayoutStatus};
use taskpay_core::domain::quote::{
    Proposal, ProposalId, Quote, QuoteId, QuoteStatus,
};
use taskpay_core::domain::time_entry::{TimeEntry, TimeEntryId, TimeEntryStatus};
use taskpay_core::events::{PaymentEvent, PaymentEventKind};
use taskpay_core::matching::{AcceptanceOutcome, CancellationOutcome, QuoteAggregate};

use super::{
    ApprovalRepository, EscrowRepository, OrderRepository, PayeeRepository,
    PaymentEventRepository, PayoutRepository, QuoteRepository, RepositoryError,
    TimeEntryRepository,
};

/// One shared store behind all in-memory repositories, mirroring the single
/// database the sql implementations share.
#[derive(Default)]
pub struct InMemoryState {
    quotes: RwLock<HashMap<String, Quote>>,
    proposals: RwLock<HashMap<String, Proposal>>,
    orders: RwLock<HashMap<String, Order>>,
    escrows: RwLock<HashMap<String, EscrowRecord>>,
    entries: RwLock<HashMap<String, TimeEntry>>,
    approvals: RwLock<HashMap<String, ApprovalRequest>>,
    payouts: RwLock<HashMap<String, Payout>>,
    payment_events: RwLock<HashMap<(String, String), PaymentEvent>>,
    payees: RwLock<HashMap<String, Payee>>,
}

impl InMemoryState {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

fn bump(version: &mut u32) {
    *version = version.saturating_add(1);
}

fn conflict(message: impl Into<String>) -> RepositoryError {
    RepositoryError::Conflict(message.into())
}

pub struct InMemoryQuoteRepository {
    state: Arc<InMemoryState>,
}

impl InMemoryQuoteRepository {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn insert_quote(&self, quote: &Quote) -> Result<(), RepositoryError> {
        let mut quotes = self.state.quotes.write().await;
        quotes.insert(quote.id.0.clone(), quote.clone());
        Ok(())
    }

    async fn insert_proposal(&self, proposal: &Proposal) -> Result<(), RepositoryError> {
        let mut proposals = self.state.proposals.write().await;
        proposals.insert(proposal.id.0.clone(), proposal.clone());
        Ok(())
    }

    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let quotes = self.state.quotes.read().await;
        Ok(quotes.get(&id.0).cloned())
    }

    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError> {
        let proposals = self.state.proposals.read().await;
        Ok(proposals.get(&id.0).cloned())
    }

    async fn load_aggregate(
        &self,
        id: &QuoteId,
    ) -> Result<Option<QuoteAggregate>, RepositoryError> {
        let quotes = self.state.quotes.read().await;
        let Some(quote) = quotes.get(&id.0).cloned() else {
            return Ok(None);
        };
        let proposals = self.state.proposals.read().await;
        let mut for_quote: Vec<Proposal> =
            proposals.values().filter(|proposal| proposal.quote_id == *id).cloned().collect();
        for_quote.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(Some(QuoteAggregate { quote, proposals: for_quote }))
    }

    async fn update_proposal(&self, proposal: &Proposal) -> Result<(), RepositoryError> {
        let mut proposals = self.state.proposals.write().await;
        proposals.insert(proposal.id.0.clone(), proposal.clone());
        Ok(())
    }

    async fn persist_acceptance(
        &self,
        outcome: &AcceptanceOutcome,
    ) -> Result<(), RepositoryError> {
        let mut quotes = self.state.quotes.write().await;
        let mut proposals = self.state.proposals.write().await;
        let mut orders = self.state.orders.write().await;

        let stored = quotes
            .get(&outcome.quote.id.0)
            .ok_or_else(|| conflict(format!("quote {} does not exist", outcome.quote.id)))?;
        if stored.status != QuoteStatus::Open {
            return Err(conflict(format!("quote {} is no longer open", outcome.quote.id)));
        }

        let mut quote = outcome.quote.clone();
        bump(&mut quote.state_version);
        quotes.insert(quote.id.0.clone(), quote);

        proposals.insert(outcome.accepted.id.0.clone(), outcome.accepted.clone());
        for declined in &outcome.declined {
            proposals.insert(declined.id.0.clone(), declined.clone());
        }
        orders.insert(outcome.order.id.0.clone(), outcome.order.clone());
        Ok(())
    }

    async fn persist_cancellation(
        &self,
        outcome: &CancellationOutcome,
    ) -> Result<(), RepositoryError> {
        let mut quotes = self.state.quotes.write().await;
        let mut proposals = self.state.proposals.write().await;

        let stored = quotes
            .get(&outcome.quote.id.0)
            .ok_or_else(|| conflict(format!("quote {} does not exist", outcome.quote.id)))?;
        if stored.status != QuoteStatus::Open {
            return Err(conflict(format!("quote {} is no longer open", outcome.quote.id)));
        }

        let mut quote = outcome.quote.clone();
        bump(&mut quote.state_version);
        quotes.insert(quote.id.0.clone(), quote);
        for declined in &outcome.declined {
            proposals.insert(declined.id.0.clone(), declined.clone());
        }
        Ok(())
    }
}

pub struct InMemoryOrderRepository {
    state: Arc<InMemoryState>,
}

impl InMemoryOrderRepository {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

fn apply_order_guarded(
    orders: &mut HashMap<String, Order>,
    order: &Order,
) -> Result<(), RepositoryError> {
    let stored = orders
        .get(&order.id.0)
        .ok_or_else(|| conflict(format!("order {} does not exist", order.id)))?;
    if stored.state_version != order.state_version {
        return Err(conflict(format!(
            "order {} moved past version {}",
            order.id, order.state_version
        )));
    }
    let mut next = order.clone();
    bump(&mut next.state_version);
    orders.insert(next.id.0.clone(), next);
    Ok(())
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.state.orders.read().await;
        Ok(orders.get(&id.0).cloned())
    }

    async fn update(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.state.orders.write().await;
        apply_order_guarded(&mut orders, order)
    }
}

pub struct InMemoryEscrowRepository {
    state: Arc<InMemoryState>,
}

impl InMemoryEscrowRepository {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

fn apply_escrow_guarded(
    escrows: &mut HashMap<String, EscrowRecord>,
    record: &EscrowRecord,
) -> Result<(), RepositoryError> {
    let stored = escrows
        .get(&record.id.0)
        .ok_or_else(|| conflict(format!("escrow record {} does not exist", record.id)))?;
    if stored.state_version != record.state_version {
        return Err(conflict(format!(
            "escrow record {} moved past version {}",
            record.id, record.state_version
        )));
    }
    let mut next = record.clone();
    bump(&mut next.state_version);
    escrows.insert(next.id.0.clone(), next);
    Ok(())
}

#[async_trait::async_trait]
impl EscrowRepository for InMemoryEscrowRepository {
    async fn insert_if_absent(&self, record: &EscrowRecord) -> Result<bool, RepositoryError> {
        let mut escrows = self.state.escrows.write().await;
        let duplicate = escrows
            .values()
            .any(|stored| stored.payment_reference == record.payment_reference);
        if duplicate {
            return Ok(false);
        }
        escrows.insert(record.id.0.clone(), record.clone());
        Ok(true)
    }

    async fn find(
        &self,
        id: &EscrowRecordId,
    ) -> Result<Option<EscrowRecord>, RepositoryError> {
        let escrows = self.state.escrows.read().await;
        Ok(escrows.get(&id.0).cloned())
    }

    async fn find_by_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<EscrowRecord>, RepositoryError> {
        let escrows = self.state.escrows.read().await;
        Ok(escrows.values().find(|record| record.order_id == *order_id).cloned())
    }

    async fn find_by_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<EscrowRecord>, RepositoryError> {
        let escrows = self.state.escrows.read().await;
        Ok(escrows.values().find(|record| record.payment_reference == *reference).cloned())
    }

    async fn persist_confirmation(
        &self,
        record: &EscrowRecord,
        order: &Order,
    ) -> Result<(), RepositoryError> {
        let mut orders = self.state.orders.write().await;
        let mut escrows = self.state.escrows.write().await;

        check_order_version(&orders, order)?;
        apply_escrow_guarded(&mut escrows, record)?;
        apply_order_guarded(&mut orders, order)
    }

    async fn persist_refund(
        &self,
        record: &EscrowRecord,
        order: &Order,
    ) -> Result<(), RepositoryError> {
        let mut orders = self.state.orders.write().await;
        let mut escrows = self.state.escrows.write().await;

        check_order_version(&orders, order)?;
        apply_escrow_guarded(&mut escrows, record)?;
        apply_order_guarded(&mut orders, order)
    }
}

fn check_order_version(
    orders: &HashMap<String, Order>,
    order: &Order,
) -> Result<(), RepositoryError> {
    let stored = orders
        .get(&order.id.0)
        .ok_or_else(|| conflict(format!("order {} does not exist", order.id)))?;
    if stored.state_version != order.state_version {
        return Err(conflict(format!(
            "order {} moved past version {}",
            order.id, order.state_version
        )));
    }
    Ok(())
}

fn check_entry_status(
    entries: &HashMap<String, TimeEntry>,
    entry: &TimeEntry,
    expected: TimeEntryStatus,
) -> Result<(), RepositoryError> {
    let stored = entries
        .get(&entry.id.0)
        .ok_or_else(|| conflict(format!("time entry {} does not exist", entry.id)))?;
    if stored.status != expected {
        return Err(conflict(format!(
            "time entry {} is no longer {}",
            entry.id,
            expected.as_str()
        )));
    }
    Ok(())
}

pub struct InMemoryTimeEntryRepository {
    state: Arc<InMemoryState>,
}

impl InMemoryTimeEntryRepository {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl TimeEntryRepository for InMemoryTimeEntryRepository {
    async fn insert_with_order(
        &self,
        entry: &TimeEntry,
        order: &Order,
    ) -> Result<(), RepositoryError> {
        let mut orders = self.state.orders.write().await;
        let mut entries = self.state.entries.write().await;

        apply_order_guarded(&mut orders, order)?;
        entries.insert(entry.id.0.clone(), entry.clone());
        Ok(())
    }

    async fn find(&self, id: &TimeEntryId) -> Result<Option<TimeEntry>, RepositoryError> {
        let entries = self.state.entries.read().await;
        Ok(entries.get(&id.0).cloned())
    }

    async fn find_many(&self, ids: &[TimeEntryId]) -> Result<Vec<TimeEntry>, RepositoryError> {
        let entries = self.state.entries.read().await;
        Ok(ids.iter().filter_map(|id| entries.get(&id.0).cloned()).collect())
    }

    async fn list_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<TimeEntry>, RepositoryError> {
        let entries = self.state.entries.read().await;
        let mut for_order: Vec<TimeEntry> =
            entries.values().filter(|entry| entry.order_id == *order_id).cloned().collect();
        for_order.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(for_order)
    }
}

pub struct InMemoryApprovalRepository {
    state: Arc<InMemoryState>,
}

impl InMemoryApprovalRepository {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let approvals = self.state.approvals.read().await;
        Ok(approvals.get(&id.0).cloned())
    }

    async fn persist_submission(
        &self,
        request: &ApprovalRequest,
        entries: &[TimeEntry],
    ) -> Result<(), RepositoryError> {
        let mut stored_entries = self.state.entries.write().await;
        let mut approvals = self.state.approvals.write().await;

        for entry in entries {
            check_entry_status(&stored_entries, entry, TimeEntryStatus::Logged)?;
        }

        approvals.insert(request.id.0.clone(), request.clone());
        for entry in entries {
            stored_entries.insert(entry.id.0.clone(), entry.clone());
        }
        Ok(())
    }

    async fn persist_resolution(
        &self,
        request: &ApprovalRequest,
        entries: &[TimeEntry],
    ) -> Result<(), RepositoryError> {
        let mut stored_entries = self.state.entries.write().await;
        let mut approvals = self.state.approvals.write().await;

        let stored = approvals
            .get(&request.id.0)
            .ok_or_else(|| conflict(format!("approval request {} does not exist", request.id)))?;
        if !stored.is_pending() {
            return Err(conflict(format!(
                "approval request {} is no longer pending",
                request.id
            )));
        }
        for entry in entries {
            check_entry_status(&stored_entries, entry, TimeEntryStatus::Submitted)?;
        }

        approvals.insert(request.id.0.clone(), request.clone());
        for entry in entries {
            stored_entries.insert(entry.id.0.clone(), entry.clone());
        }
        Ok(())
    }
}

pub struct InMemoryPayoutRepository {
    state: Arc<InMemoryState>,
}

impl InMemoryPayoutRepository {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl PayoutRepository for InMemoryPayoutRepository {
    async fn insert(&self, payout: &Payout) -> Result<(), RepositoryError> {
        let mut payouts = self.state.payouts.write().await;
        payouts.insert(payout.id.0.clone(), payout.clone());
        Ok(())
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Payout>, RepositoryError> {
        let payouts = self.state.payouts.read().await;
        Ok(payouts.values().find(|payout| payout.idempotency_key == *key).cloned())
    }

    async fn find_by_transfer_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payout>, RepositoryError> {
        let payouts = self.state.payouts.read().await;
        Ok(payouts
            .values()
            .find(|payout| payout.transfer_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn list_for_order(&self, order_id: &OrderId) -> Result<Vec<Payout>, RepositoryError> {
        let payouts = self.state.payouts.read().await;
        let mut for_order: Vec<Payout> =
            payouts.values().filter(|payout| payout.order_id == *order_id).cloned().collect();
        for_order.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(for_order)
    }

    async fn persist_transfer_success(
        &self,
        payout: &Payout,
        escrow: &EscrowRecord,
        entries: &[TimeEntry],
    ) -> Result<(), RepositoryError> {
        let mut escrows = self.state.escrows.write().await;
        let mut stored_entries = self.state.entries.write().await;
        let mut payouts = self.state.payouts.write().await;

        let stored = payouts
            .get(&payout.id.0)
            .ok_or_else(|| conflict(format!("payout {} does not exist", payout.id)))?;
        if stored.status == PayoutStatus::Transferred {
            return Err(conflict(format!("payout {} already transferred", payout.id)));
        }
        for entry in entries {
            check_entry_status(&stored_entries, entry, TimeEntryStatus::Billed)?;
        }

        apply_escrow_guarded(&mut escrows, escrow)?;
        for entry in entries {
            stored_entries.insert(entry.id.0.clone(), entry.clone());
        }
        payouts.insert(payout.id.0.clone(), payout.clone());
        Ok(())
    }

    async fn persist_transfer_failure(&self, payout: &Payout) -> Result<(), RepositoryError> {
        let mut payouts = self.state.payouts.write().await;
        let stored = payouts
            .get(&payout.id.0)
            .ok_or_else(|| conflict(format!("payout {} does not exist", payout.id)))?;
        if stored.status == PayoutStatus::Transferred {
            return Err(conflict(format!("payout {} already transferred", payout.id)));
        }
        payouts.insert(payout.id.0.clone(), payout.clone());
        Ok(())
    }

    async fn persist_settlement(
        &self,
        payout: &Payout,
        entries: &[TimeEntry],
        order: &Order,
    ) -> Result<(), RepositoryError> {
        let mut orders = self.state.orders.write().await;
        let mut stored_entries = self.state.entries.write().await;
        let mut payouts = self.state.payouts.write().await;

        check_order_version(&orders, order)?;
        for entry in entries {
            check_entry_status(&stored_entries, entry, TimeEntryStatus::PlatformHeld)?;
        }

        for entry in entries {
            stored_entries.insert(entry.id.0.clone(), entry.clone());
        }
        payouts.insert(payout.id.0.clone(), payout.clone());
        apply_order_guarded(&mut orders, order)
    }
}

pub struct InMemoryPaymentEventRepository {
    state: Arc<InMemoryState>,
}

impl InMemoryPaymentEventRepository {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl PaymentEventRepository for InMemoryPaymentEventRepository {
    async fn record_if_new(&self, event: &PaymentEvent) -> Result<bool, RepositoryError> {
        let mut events = self.state.payment_events.write().await;
        let key = (event.reference.0.clone(), event.kind.as_str().to_string());
        if events.contains_key(&key) {
            return Ok(false);
        }
        events.insert(key, event.clone());
        Ok(true)
    }

    async fn find(
        &self,
        reference: &PaymentReference,
        kind: PaymentEventKind,
    ) -> Result<Option<PaymentEvent>, RepositoryError> {
        let events = self.state.payment_events.read().await;
        Ok(events.get(&(reference.0.clone(), kind.as_str().to_string())).cloned())
    }
}

pub struct InMemoryPayeeRepository {
    state: Arc<InMemoryState>,
}

impl InMemoryPayeeRepository {
    pub fn new(state: Arc<InMemoryState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl PayeeRepository for InMemoryPayeeRepository {
    async fn find(&self, provider_id: &ProviderId) -> Result<Option<Payee>, RepositoryError> {
        let payees = self.state.payees.read().await;
        Ok(payees.get(&provider_id.0).cloned())
    }

    async fn save(&self, payee: &Payee) -> Result<(), RepositoryError> {
        let mut payees = self.state.payees.write().await;
        payees.insert(payee.provider_id.0.clone(), payee.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use taskpay_core::domain::party::{CustomerId, ProviderId};
    use taskpay_core::domain::quote::{Quote, QuoteId, QuoteStatus};
    use taskpay_core::matching::{ProposalDraft, ProposalMatcher, QuoteAggregate};
    use taskpay_core::money::{Currency, Money};

    use super::{InMemoryQuoteRepository, InMemoryState};
    use crate::repositories::{QuoteRepository, RepositoryError};

    fn open_quote(id: &str) -> Quote {
        Quote {
            id: QuoteId(id.to_string()),
            customer_id: CustomerId("cust-1".to_string()),
            description: "garden fence repair".to_string(),
            category: "handyman".to_string(),
            status: QuoteStatus::Open,
            state_version: 1,
            created_at: Utc::now(),
        }
    }

    fn draft(provider: &str) -> ProposalDraft {
        ProposalDraft {
            provider_id: ProviderId(provider.to_string()),
            total_amount: Money::new(45_000, Currency::Eur),
            hourly_rate: Money::new(2_000, Currency::Eur),
            planned_hours: Decimal::new(225, 1),
            message: "can start monday".to_string(),
        }
    }

    #[tokio::test]
    async fn quote_round_trips_through_the_store() {
        let repo = InMemoryQuoteRepository::new(InMemoryState::shared());
        let quote = open_quote("q-1");

        repo.insert_quote(&quote).await.expect("insert");
        let found = repo.find_quote(&quote.id).await.expect("find");
        assert_eq!(found, Some(quote));
    }

    #[tokio::test]
    async fn concurrent_acceptances_leave_exactly_one_winner() {
        let matcher = ProposalMatcher::new();
        let repo = InMemoryQuoteRepository::new(InMemoryState::shared());
        let quote = open_quote("q-race");
        repo.insert_quote(&quote).await.expect("insert quote");

        let (first, _) = matcher.submit_proposal(&quote, draft("prov-1")).expect("submit");
        let (second, _) = matcher.submit_proposal(&quote, draft("prov-2")).expect("submit");
        repo.insert_proposal(&first).await.expect("insert proposal");
        repo.insert_proposal(&second).await.expect("insert proposal");

        let aggregate = QuoteAggregate {
            quote: quote.clone(),
            proposals: vec![first.clone(), second.clone()],
        };
        let accept_first = matcher
            .accept_proposal(aggregate.clone(), &first.id, &quote.customer_id)
            .expect("decide first");
        let accept_second = matcher
            .accept_proposal(aggregate, &second.id, &quote.customer_id)
            .expect("decide second");

        let first_result = repo.persist_acceptance(&accept_first).await;
        let second_result = repo.persist_acceptance(&accept_second).await;

        assert!(first_result.is_ok());
        assert!(matches!(second_result, Err(RepositoryError::Conflict(_))));
    }
}
