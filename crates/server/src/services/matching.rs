use chrono::Utc;
use uuid::Uuid;

use taskpay_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use taskpay_core::domain::order::Order;
use taskpay_core::domain::party::{CustomerId, ProviderId};
use taskpay_core::domain::quote::{Proposal, ProposalId, Quote, QuoteId, QuoteStatus};
use taskpay_core::errors::{ApplicationError, DomainError};
use taskpay_core::matching::{ProposalDraft, ProposalMatcher};

use taskpay_db::repositories::{QuoteRepository, RepositoryError};

use super::{not_found, Repositories, Sinks};

pub struct MatchingService {
    repos: Repositories,
    sinks: Sinks,
    matcher: ProposalMatcher,
}

impl MatchingService {
    pub fn new(repos: Repositories, sinks: Sinks) -> Self {
        Self { repos, sinks, matcher: ProposalMatcher::new() }
    }

    pub async fn create_quote(
        &self,
        customer_id: CustomerId,
        description: String,
        category: String,
    ) -> Result<Quote, ApplicationError> {
        let quote = Quote {
            id: QuoteId(Uuid::new_v4().to_string()),
            customer_id,
            description,
            category,
            status: QuoteStatus::Open,
            state_version: 1,
            created_at: Utc::now(),
        };
        self.repos
            .quotes
            .insert_quote(&quote)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        Ok(quote)
    }

    pub async fn submit_proposal(
        &self,
        quote_id: &QuoteId,
        draft: ProposalDraft,
    ) -> Result<Proposal, ApplicationError> {
        let quote = self
            .repos
            .quotes
            .find_quote(quote_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("quote", &quote_id.0))?;

        let (proposal, event) = self.matcher.submit_proposal(&quote, draft)?;
        self.repos
            .quotes
            .insert_proposal(&proposal)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        self.sinks.notifications.publish(event);
        Ok(proposal)
    }

    /// Accepts one proposal and creates the order, atomically. Of two racing
    /// acceptances exactly one commits; the loser surfaces
    /// `ConcurrentAcceptance` and must re-fetch, not retry.
    pub async fn accept_proposal(
        &self,
        quote_id: &QuoteId,
        proposal_id: &ProposalId,
        acting_customer: &CustomerId,
    ) -> Result<Order, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();
        let aggregate = self
            .repos
            .quotes
            .load_aggregate(quote_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("quote", &quote_id.0))?;

        let outcome = self.matcher.accept_proposal(aggregate, proposal_id, acting_customer)?;

        let persisted = self.repos.quotes.persist_acceptance(&outcome).await;
        if let Err(error) = persisted {
            let mapped = match error {
                RepositoryError::Conflict(_) => ApplicationError::Domain(
                    DomainError::ConcurrentAcceptance { quote_id: quote_id.clone() },
                ),
                other => ApplicationError::Persistence(other.to_string()),
            };
            self.sinks.audit.emit(
                AuditEvent::new(
                    Some(outcome.order.id.clone()),
                    correlation_id,
                    "matching.acceptance_rejected",
                    AuditCategory::Matching,
                    acting_customer.0.clone(),
                    AuditOutcome::Rejected,
                )
                .with_metadata("quote_id", quote_id.0.clone())
                .with_metadata("error", mapped.to_string()),
            );
            return Err(mapped);
        }

        self.sinks.audit.emit(
            AuditEvent::new(
                Some(outcome.order.id.clone()),
                correlation_id,
                "matching.proposal_accepted",
                AuditCategory::Matching,
                acting_customer.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("quote_id", quote_id.0.clone())
            .with_metadata("proposal_id", proposal_id.0.clone())
            .with_metadata("declined_count", outcome.declined.len().to_string()),
        );
        for event in outcome.events.clone() {
            self.sinks.notifications.publish(event);
        }
        Ok(outcome.order)
    }

    pub async fn withdraw_proposal(
        &self,
        proposal_id: &ProposalId,
        acting_provider: &ProviderId,
    ) -> Result<Proposal, ApplicationError> {
        let proposal = self
            .repos
            .quotes
            .find_proposal(proposal_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("proposal", &proposal_id.0))?;
        let quote = self
            .repos
            .quotes
            .find_quote(&proposal.quote_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("quote", &proposal.quote_id.0))?;

        let withdrawn = self.matcher.withdraw_proposal(&quote, proposal, acting_provider)?;
        self.repos
            .quotes
            .update_proposal(&withdrawn)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        Ok(withdrawn)
    }

    pub async fn cancel_quote(
        &self,
        quote_id: &QuoteId,
        acting_customer: &CustomerId,
    ) -> Result<Quote, ApplicationError> {
        let aggregate = self
            .repos
            .quotes
            .load_aggregate(quote_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("quote", &quote_id.0))?;

        let outcome = self.matcher.cancel_quote(aggregate, acting_customer)?;
        self.repos.quotes.persist_cancellation(&outcome).await.map_err(|error| match error {
            RepositoryError::Conflict(_) => ApplicationError::Domain(
                DomainError::StaleAggregate { entity: "quote", id: quote_id.0.clone() },
            ),
            other => ApplicationError::Persistence(other.to_string()),
        })?;

        for event in outcome.events.clone() {
            self.sinks.notifications.publish(event);
        }
        Ok(outcome.quote)
    }
}
