//! Deterministic demo seeds for local development and the smoke harness.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use taskpay_core::domain::party::{CustomerId, ProviderId};
use taskpay_core::domain::payee::{Payee, PayeeKind, PayoutDestination};
use taskpay_core::domain::quote::{
    Proposal, ProposalId, ProposalStatus, Quote, QuoteId, QuoteStatus,
};
use taskpay_core::money::{Currency, Money};

use crate::connection::DbPool;
use crate::repositories::{
    PayeeRepository, QuoteRepository, RepositoryError, SqlPayeeRepository, SqlQuoteRepository,
};

pub const SEED_CUSTOMER_ID: &str = "cust-demo-001";
pub const SEED_PROVIDER_SOLO_ID: &str = "prov-demo-solo";
pub const SEED_PROVIDER_COMPANY_ID: &str = "prov-demo-company";
pub const SEED_QUOTE_ID: &str = "quote-demo-001";
pub const SEED_PROPOSAL_SOLO_ID: &str = "proposal-demo-solo";
pub const SEED_PROPOSAL_COMPANY_ID: &str = "proposal-demo-company";

pub fn demo_quote() -> Quote {
    Quote {
        id: QuoteId(SEED_QUOTE_ID.to_string()),
        customer_id: CustomerId(SEED_CUSTOMER_ID.to_string()),
        description: "Repair and repaint the garden fence".to_string(),
        category: "handyman".to_string(),
        status: QuoteStatus::Open,
        state_version: 1,
        created_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().unwrap_or_else(Utc::now),
    }
}

pub fn demo_proposals() -> Vec<Proposal> {
    let created_at =
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).single().unwrap_or_else(Utc::now);
    vec![
        Proposal {
            id: ProposalId(SEED_PROPOSAL_SOLO_ID.to_string()),
            quote_id: QuoteId(SEED_QUOTE_ID.to_string()),
            provider_id: ProviderId(SEED_PROVIDER_SOLO_ID.to_string()),
            total_amount: Money::new(45_000, Currency::Eur),
            hourly_rate: Money::new(2_000, Currency::Eur),
            planned_hours: Decimal::new(225, 1),
            message: "Two and a half days including materials.".to_string(),
            status: ProposalStatus::Submitted,
            created_at,
        },
        Proposal {
            id: ProposalId(SEED_PROPOSAL_COMPANY_ID.to_string()),
            quote_id: QuoteId(SEED_QUOTE_ID.to_string()),
            provider_id: ProviderId(SEED_PROVIDER_COMPANY_ID.to_string()),
            total_amount: Money::new(50_000, Currency::Eur),
            hourly_rate: Money::new(2_500, Currency::Eur),
            planned_hours: Decimal::new(200, 1),
            message: "Crew of two, done in a day.".to_string(),
            status: ProposalStatus::Submitted,
            created_at,
        },
    ]
}

pub fn demo_payees() -> Vec<Payee> {
    vec![
        Payee {
            provider_id: ProviderId(SEED_PROVIDER_SOLO_ID.to_string()),
            display_name: "Jo Fencer".to_string(),
            kind: PayeeKind::Individual {
                destination: PayoutDestination("acct_demo_solo".to_string()),
            },
        },
        Payee {
            provider_id: ProviderId(SEED_PROVIDER_COMPANY_ID.to_string()),
            display_name: "Fence & Sons GmbH".to_string(),
            kind: PayeeKind::Company {
                destination: PayoutDestination("acct_demo_company".to_string()),
                registration: "HRB 98765".to_string(),
            },
        },
    ]
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedSummary {
    pub quotes: usize,
    pub proposals: usize,
    pub payees: usize,
}

/// Idempotent: re-seeding an already-seeded database changes nothing.
pub async fn seed_demo(pool: &DbPool) -> Result<SeedSummary, RepositoryError> {
    let quote_repo = SqlQuoteRepository::new(pool.clone());
    let payee_repo = SqlPayeeRepository::new(pool.clone());

    let quote = demo_quote();
    let mut summary = SeedSummary { quotes: 0, proposals: 0, payees: 0 };

    if quote_repo.find_quote(&quote.id).await?.is_none() {
        quote_repo.insert_quote(&quote).await?;
        summary.quotes += 1;
        for proposal in demo_proposals() {
            quote_repo.insert_proposal(&proposal).await?;
            summary.proposals += 1;
        }
    }

    for payee in demo_payees() {
        payee_repo.save(&payee).await?;
        summary.payees += 1;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::seed_demo;
    use crate::repositories::{QuoteRepository, SqlQuoteRepository};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seeding_twice_is_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let first = seed_demo(&pool).await.expect("first seed");
        assert_eq!(first.quotes, 1);
        assert_eq!(first.proposals, 2);

        let second = seed_demo(&pool).await.expect("second seed");
        assert_eq!(second.quotes, 0);
        assert_eq!(second.proposals, 0);

        let repo = SqlQuoteRepository::new(pool.clone());
        let aggregate = repo
            .load_aggregate(&taskpay_core::domain::quote::QuoteId(
                super::SEED_QUOTE_ID.to_string(),
            ))
            .await
            .expect("load")
            .expect("seeded quote");
        assert_eq!(aggregate.proposals.len(), 2);
    }
}
