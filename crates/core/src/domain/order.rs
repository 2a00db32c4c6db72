use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::party::{CustomerId, ProviderId};
use crate::domain::quote::{ProposalId, QuoteId};
use crate::errors::DomainError;
use crate::money::Money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    EscrowHeld,
    InProgress,
    ProviderCompleted,
    CustomerCompleted,
    Disputed,
    Cancelled,
    PaidOut,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::EscrowHeld => "escrow_held",
            Self::InProgress => "in_progress",
            Self::ProviderCompleted => "provider_completed",
            Self::CustomerCompleted => "customer_completed",
            Self::Disputed => "disputed",
            Self::Cancelled => "cancelled",
            Self::PaidOut => "paid_out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending_payment" => Some(Self::PendingPayment),
            "escrow_held" => Some(Self::EscrowHeld),
            "in_progress" => Some(Self::InProgress),
            "provider_completed" => Some(Self::ProviderCompleted),
            "customer_completed" => Some(Self::CustomerCompleted),
            "disputed" => Some(Self::Disputed),
            "cancelled" => Some(Self::Cancelled),
            "paid_out" => Some(Self::PaidOut),
            _ => None,
        }
    }
}

/// The root aggregate of the lifecycle. Created when a proposal is accepted;
/// time entries, the escrow record, and payouts all hang off it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub quote_id: QuoteId,
    pub proposal_id: ProposalId,
    pub customer_id: CustomerId,
    pub provider_id: ProviderId,
    pub gross_amount: Money,
    pub hourly_rate: Money,
    pub status: OrderStatus,
    pub provider_completed_at: Option<DateTime<Utc>>,
    pub customer_completed_at: Option<DateTime<Utc>>,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn accepts_time_entries(&self) -> bool {
        matches!(self.status, OrderStatus::EscrowHeld | OrderStatus::InProgress)
    }

    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), DomainError> {
        let legal = matches!(
            (self.status, next),
            (OrderStatus::PendingPayment, OrderStatus::EscrowHeld)
                | (OrderStatus::PendingPayment, OrderStatus::Cancelled)
                | (OrderStatus::EscrowHeld, OrderStatus::InProgress)
                | (OrderStatus::EscrowHeld, OrderStatus::Cancelled)
                | (OrderStatus::EscrowHeld, OrderStatus::ProviderCompleted)
                | (OrderStatus::InProgress, OrderStatus::ProviderCompleted)
                | (OrderStatus::InProgress, OrderStatus::Disputed)
                | (OrderStatus::ProviderCompleted, OrderStatus::CustomerCompleted)
                | (OrderStatus::ProviderCompleted, OrderStatus::Disputed)
                | (OrderStatus::CustomerCompleted, OrderStatus::PaidOut)
                | (OrderStatus::CustomerCompleted, OrderStatus::Disputed)
                | (OrderStatus::EscrowHeld, OrderStatus::Disputed)
        );
        if !legal {
            return Err(DomainError::InvalidStateTransition {
                entity: "order",
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records the provider's completion confirmation. The order advances to
    /// `ProviderCompleted` once the provider confirms; if the customer already
    /// confirmed earlier, both acknowledgments are present and the order goes
    /// straight to `CustomerCompleted`.
    pub fn confirm_provider_completion(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.provider_completed_at.is_some() {
            return Ok(());
        }
        if !matches!(self.status, OrderStatus::EscrowHeld | OrderStatus::InProgress) {
            return Err(DomainError::InvalidStateTransition {
                entity: "order",
                from: self.status.as_str(),
                to: OrderStatus::ProviderCompleted.as_str(),
            });
        }
        self.provider_completed_at = Some(at);
        self.transition_to(OrderStatus::ProviderCompleted)?;
        if self.customer_completed_at.is_some() {
            self.transition_to(OrderStatus::CustomerCompleted)?;
        }
        Ok(())
    }

    /// Records the customer's completion confirmation. The customer's
    /// acknowledgment is what authorizes escrow release, but it only takes the
    /// order to `CustomerCompleted` when the provider has confirmed too;
    /// confirming first merely records the timestamp.
    pub fn confirm_customer_completion(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.customer_completed_at.is_some() {
            return Ok(());
        }
        match self.status {
            OrderStatus::ProviderCompleted => {
                self.customer_completed_at = Some(at);
                self.transition_to(OrderStatus::CustomerCompleted)
            }
            OrderStatus::EscrowHeld | OrderStatus::InProgress => {
                self.customer_completed_at = Some(at);
                Ok(())
            }
            _ => Err(DomainError::InvalidStateTransition {
                entity: "order",
                from: self.status.as_str(),
                to: OrderStatus::CustomerCompleted.as_str(),
            }),
        }
    }

    pub fn is_fully_confirmed(&self) -> bool {
        self.provider_completed_at.is_some() && self.customer_completed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Order, OrderId, OrderStatus};
    use crate::domain::party::{CustomerId, ProviderId};
    use crate::domain::quote::{ProposalId, QuoteId};
    use crate::errors::DomainError;
    use crate::money::{Currency, Money};

    fn order(status: OrderStatus) -> Order {
        Order {
            id: OrderId("o-1".to_string()),
            quote_id: QuoteId("q-1".to_string()),
            proposal_id: ProposalId("p-1".to_string()),
            customer_id: CustomerId("cust-1".to_string()),
            provider_id: ProviderId("prov-1".to_string()),
            gross_amount: Money::new(45_000, Currency::Eur),
            hourly_rate: Money::new(2_000, Currency::Eur),
            status,
            provider_completed_at: None,
            customer_completed_at: None,
            state_version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn completion_requires_both_confirmations() {
        let mut order = order(OrderStatus::InProgress);

        order.confirm_provider_completion(Utc::now()).expect("provider confirms");
        assert_eq!(order.status, OrderStatus::ProviderCompleted);
        assert!(!order.is_fully_confirmed());

        order.confirm_customer_completion(Utc::now()).expect("customer confirms");
        assert_eq!(order.status, OrderStatus::CustomerCompleted);
        assert!(order.is_fully_confirmed());
    }

    #[test]
    fn customer_may_confirm_first_without_advancing_status() {
        let mut order = order(OrderStatus::InProgress);

        order.confirm_customer_completion(Utc::now()).expect("customer confirms early");
        assert_eq!(order.status, OrderStatus::InProgress);
        assert!(order.customer_completed_at.is_some());

        order.confirm_provider_completion(Utc::now()).expect("provider confirms");
        assert_eq!(order.status, OrderStatus::CustomerCompleted);
    }

    #[test]
    fn repeated_confirmations_are_no_ops() {
        let mut order = order(OrderStatus::InProgress);
        order.confirm_provider_completion(Utc::now()).expect("first confirm");
        let recorded_at = order.provider_completed_at;

        order.confirm_provider_completion(Utc::now()).expect("second confirm is a no-op");
        assert_eq!(order.provider_completed_at, recorded_at);
        assert_eq!(order.status, OrderStatus::ProviderCompleted);
    }

    #[test]
    fn cancelled_order_rejects_completion() {
        let mut order = order(OrderStatus::Cancelled);
        let error = order
            .confirm_provider_completion(Utc::now())
            .expect_err("cancelled orders cannot complete");
        assert!(matches!(error, DomainError::InvalidStateTransition { entity: "order", .. }));
    }

    #[test]
    fn pending_payment_cannot_jump_to_paid_out() {
        let mut order = order(OrderStatus::PendingPayment);
        let error =
            order.transition_to(OrderStatus::PaidOut).expect_err("must pass through escrow");
        assert!(matches!(error, DomainError::InvalidStateTransition { entity: "order", .. }));
    }
}
