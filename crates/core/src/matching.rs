//! Quote/proposal matching.
//!
//! Pure transition logic: every operation consumes an aggregate snapshot and
//! returns the full set of entities to persist, so the storage layer can
//! apply the outcome in one transaction. The matcher itself never touches
//! storage; the one-accepted-proposal-per-quote guarantee is completed by the
//! repository's conditional write on the quote row.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::party::{CustomerId, ProviderId};
use crate::domain::quote::{Proposal, ProposalId, ProposalStatus, Quote, QuoteId, QuoteStatus};
use crate::errors::DomainError;
use crate::events::DomainEvent;
use crate::money::Money;

/// Snapshot of a quote and all of its proposals, loaded together.
#[derive(Clone, Debug, PartialEq)]
pub struct QuoteAggregate {
    pub quote: Quote,
    pub proposals: Vec<Proposal>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProposalDraft {
    pub provider_id: ProviderId,
    pub total_amount: Money,
    pub hourly_rate: Money,
    pub planned_hours: Decimal,
    pub message: String,
}

/// Everything `accept_proposal` decides, to be persisted atomically.
#[derive(Clone, Debug, PartialEq)]
pub struct AcceptanceOutcome {
    pub quote: Quote,
    pub accepted: Proposal,
    pub declined: Vec<Proposal>,
    pub order: Order,
    pub events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CancellationOutcome {
    pub quote: Quote,
    pub declined: Vec<Proposal>,
    pub events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, Default)]
pub struct ProposalMatcher;

impl ProposalMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Appends a new proposal to an open quote.
    pub fn submit_proposal(
        &self,
        quote: &Quote,
        draft: ProposalDraft,
    ) -> Result<(Proposal, DomainEvent), DomainError> {
        if !quote.is_open() {
            return Err(DomainError::QuoteClosed { quote_id: quote.id.clone() });
        }
        draft.total_amount.ensure_same_currency(draft.hourly_rate)?;
        if !draft.total_amount.is_positive() {
            return Err(DomainError::InvariantViolation(format!(
                "proposal amount must be positive, got {}",
                draft.total_amount
            )));
        }

        let proposal = Proposal {
            id: ProposalId(Uuid::new_v4().to_string()),
            quote_id: quote.id.clone(),
            provider_id: draft.provider_id,
            total_amount: draft.total_amount,
            hourly_rate: draft.hourly_rate,
            planned_hours: draft.planned_hours,
            message: draft.message,
            status: ProposalStatus::Submitted,
            created_at: Utc::now(),
        };
        let event = DomainEvent::ProposalSubmitted {
            quote_id: quote.id.clone(),
            proposal_id: proposal.id.clone(),
        };
        Ok((proposal, event))
    }

    /// Accepts exactly one proposal: the target flips to accepted, the quote
    /// closes, every sibling still submitted is declined, and the order is
    /// created in `PendingPayment`. The caller persists the whole outcome in
    /// a single transaction; a concurrent acceptance loses at that boundary
    /// and must surface as `ConcurrentAcceptance`, never retry.
    pub fn accept_proposal(
        &self,
        aggregate: QuoteAggregate,
        proposal_id: &ProposalId,
        acting_customer: &CustomerId,
    ) -> Result<AcceptanceOutcome, DomainError> {
        let QuoteAggregate { mut quote, proposals } = aggregate;

        if &quote.customer_id != acting_customer {
            return Err(DomainError::NotAParty {
                actor: acting_customer.0.clone(),
                entity: "quote",
            });
        }
        if !quote.is_open() {
            return Err(DomainError::QuoteClosed { quote_id: quote.id.clone() });
        }

        let mut accepted: Option<Proposal> = None;
        let mut declined = Vec::new();
        for mut proposal in proposals {
            if &proposal.id == proposal_id {
                proposal.transition_to(ProposalStatus::Accepted)?;
                accepted = Some(proposal);
            } else if proposal.status == ProposalStatus::Submitted {
                proposal.transition_to(ProposalStatus::Declined)?;
                declined.push(proposal);
            }
        }
        let accepted = accepted.ok_or_else(|| DomainError::ForeignAggregateMember {
            entity: "proposal",
            id: proposal_id.0.clone(),
            order_id: quote.id.0.clone(),
        })?;

        quote.transition_to(QuoteStatus::ProposalAccepted)?;

        let order = Order {
            id: OrderId(Uuid::new_v4().to_string()),
            quote_id: quote.id.clone(),
            proposal_id: accepted.id.clone(),
            customer_id: quote.customer_id.clone(),
            provider_id: accepted.provider_id.clone(),
            gross_amount: accepted.total_amount,
            hourly_rate: accepted.hourly_rate,
            status: OrderStatus::PendingPayment,
            provider_completed_at: None,
            customer_completed_at: None,
            state_version: 1,
            created_at: Utc::now(),
        };

        let events = vec![DomainEvent::ProposalAccepted {
            quote_id: quote.id.clone(),
            proposal_id: accepted.id.clone(),
            order_id: order.id.clone(),
        }];

        Ok(AcceptanceOutcome { quote, accepted, declined, order, events })
    }

    /// A provider takes back their own proposal. Only legal while the quote
    /// is still open and the proposal undecided.
    pub fn withdraw_proposal(
        &self,
        quote: &Quote,
        mut proposal: Proposal,
        acting_provider: &ProviderId,
    ) -> Result<Proposal, DomainError> {
        if &proposal.provider_id != acting_provider {
            return Err(DomainError::NotAParty {
                actor: acting_provider.0.clone(),
                entity: "proposal",
            });
        }
        if !quote.is_open() {
            return Err(DomainError::InvalidStateTransition {
                entity: "proposal",
                from: proposal.status.as_str(),
                to: ProposalStatus::Withdrawn.as_str(),
            });
        }
        proposal.transition_to(ProposalStatus::Withdrawn)?;
        Ok(proposal)
    }

    /// The customer closes an open quote; every undecided proposal is
    /// declined with it.
    pub fn cancel_quote(
        &self,
        aggregate: QuoteAggregate,
        acting_customer: &CustomerId,
    ) -> Result<CancellationOutcome, DomainError> {
        let QuoteAggregate { mut quote, proposals } = aggregate;

        if &quote.customer_id != acting_customer {
            return Err(DomainError::NotAParty {
                actor: acting_customer.0.clone(),
                entity: "quote",
            });
        }
        quote.transition_to(QuoteStatus::Cancelled)?;

        let mut declined = Vec::new();
        for mut proposal in proposals {
            if proposal.status == ProposalStatus::Submitted {
                proposal.transition_to(ProposalStatus::Declined)?;
                declined.push(proposal);
            }
        }

        let events = vec![DomainEvent::QuoteCancelled { quote_id: quote.id.clone() }];
        Ok(CancellationOutcome { quote, declined, events })
    }
}
