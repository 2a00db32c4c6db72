use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::party::{CustomerId, ProviderId};
use crate::errors::DomainError;
use crate::money::Money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub String);

impl std::fmt::Display for QuoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Open,
    ProposalAccepted,
    Cancelled,
    Withdrawn,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::ProposalAccepted => "proposal_accepted",
            Self::Cancelled => "cancelled",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "proposal_accepted" => Some(Self::ProposalAccepted),
            "cancelled" => Some(Self::Cancelled),
            "withdrawn" => Some(Self::Withdrawn),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Submitted,
    Accepted,
    Declined,
    Withdrawn,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            "withdrawn" => Some(Self::Withdrawn),
            _ => None,
        }
    }
}

/// A customer's request for quotes. Terminal once cancelled, withdrawn, or
/// carrying an accepted proposal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub customer_id: CustomerId,
    pub description: String,
    pub category: String,
    pub status: QuoteStatus,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
}

impl Quote {
    pub fn is_open(&self) -> bool {
        self.status == QuoteStatus::Open
    }

    pub fn transition_to(&mut self, next: QuoteStatus) -> Result<(), DomainError> {
        let legal = matches!(
            (self.status, next),
            (QuoteStatus::Open, QuoteStatus::ProposalAccepted)
                | (QuoteStatus::Open, QuoteStatus::Cancelled)
                | (QuoteStatus::Open, QuoteStatus::Withdrawn)
        );
        if !legal {
            return Err(DomainError::InvalidStateTransition {
                entity: "quote",
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// A provider's offer against a quote. Many proposals per quote; at most one
/// may ever be accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub quote_id: QuoteId,
    pub provider_id: ProviderId,
    pub total_amount: Money,
    pub hourly_rate: Money,
    pub planned_hours: Decimal,
    pub message: String,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    pub fn transition_to(&mut self, next: ProposalStatus) -> Result<(), DomainError> {
        let legal = matches!(
            (self.status, next),
            (ProposalStatus::Submitted, ProposalStatus::Accepted)
                | (ProposalStatus::Submitted, ProposalStatus::Declined)
                | (ProposalStatus::Submitted, ProposalStatus::Withdrawn)
        );
        if !legal {
            return Err(DomainError::InvalidStateTransition {
                entity: "proposal",
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Proposal, ProposalId, ProposalStatus, Quote, QuoteId, QuoteStatus};
    use crate::domain::party::{CustomerId, ProviderId};
    use crate::errors::DomainError;
    use crate::money::{Currency, Money};

    fn quote(status: QuoteStatus) -> Quote {
        Quote {
            id: QuoteId("q-1".to_string()),
            customer_id: CustomerId("cust-1".to_string()),
            description: "garden fence repair".to_string(),
            category: "handyman".to_string(),
            status,
            state_version: 1,
            created_at: Utc::now(),
        }
    }

    fn proposal(status: ProposalStatus) -> Proposal {
        Proposal {
            id: ProposalId("p-1".to_string()),
            quote_id: QuoteId("q-1".to_string()),
            provider_id: ProviderId("prov-1".to_string()),
            total_amount: Money::new(45_000, Currency::Eur),
            hourly_rate: Money::new(2_000, Currency::Eur),
            planned_hours: Decimal::new(225, 1),
            message: "can start monday".to_string(),
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn open_quote_can_accept_a_proposal() {
        let mut quote = quote(QuoteStatus::Open);
        quote.transition_to(QuoteStatus::ProposalAccepted).expect("open -> accepted");
        assert_eq!(quote.status, QuoteStatus::ProposalAccepted);
    }

    #[test]
    fn accepted_quote_is_terminal() {
        let mut quote = quote(QuoteStatus::ProposalAccepted);
        let error = quote
            .transition_to(QuoteStatus::Cancelled)
            .expect_err("accepted quote cannot be cancelled");
        assert!(matches!(error, DomainError::InvalidStateTransition { entity: "quote", .. }));
    }

    #[test]
    fn declined_proposal_cannot_be_accepted_later() {
        let mut proposal = proposal(ProposalStatus::Declined);
        let error = proposal
            .transition_to(ProposalStatus::Accepted)
            .expect_err("declined proposals stay declined");
        assert!(matches!(error, DomainError::InvalidStateTransition { entity: "proposal", .. }));
    }

    #[test]
    fn status_codecs_round_trip() {
        for status in [
            QuoteStatus::Open,
            QuoteStatus::ProposalAccepted,
            QuoteStatus::Cancelled,
            QuoteStatus::Withdrawn,
        ] {
            assert_eq!(QuoteStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            ProposalStatus::Submitted,
            ProposalStatus::Accepted,
            ProposalStatus::Declined,
            ProposalStatus::Withdrawn,
        ] {
            assert_eq!(ProposalStatus::parse(status.as_str()), Some(status));
        }
    }
}
