use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::OrderId;
use crate::domain::party::{CustomerId, ProviderId};
use crate::domain::time_entry::TimeEntryId;
use crate::errors::DomainError;
use crate::money::Money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalRequestId(pub String);

impl std::fmt::Display for ApprovalRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    PartiallyApproved,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::PartiallyApproved => "partially_approved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "partially_approved" => Some(Self::PartiallyApproved),
            _ => None,
        }
    }
}

/// The customer's decision on a pending approval request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum ApprovalDecision {
    Approve,
    Reject,
    ApprovePartially { approved_entry_ids: Vec<TimeEntryId> },
}

/// A batch of time entries submitted together for the customer's decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalRequestId,
    pub order_id: OrderId,
    pub provider_id: ProviderId,
    pub customer_id: CustomerId,
    pub time_entry_ids: Vec<TimeEntryId>,
    pub total_hours: Decimal,
    pub total_amount: Money,
    pub status: ApprovalStatus,
    pub approved_entry_ids: Vec<TimeEntryId>,
    pub provider_message: Option<String>,
    pub customer_feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn references(&self, entry_id: &TimeEntryId) -> bool {
        self.time_entry_ids.contains(entry_id)
    }

    pub fn resolve(
        &mut self,
        outcome: ApprovalStatus,
        approved: Vec<TimeEntryId>,
        feedback: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.is_pending() {
            return Err(DomainError::InvalidStateTransition {
                entity: "approval_request",
                from: self.status.as_str(),
                to: outcome.as_str(),
            });
        }
        if outcome == ApprovalStatus::Pending {
            return Err(DomainError::InvalidStateTransition {
                entity: "approval_request",
                from: self.status.as_str(),
                to: outcome.as_str(),
            });
        }
        self.status = outcome;
        self.approved_entry_ids = approved;
        self.customer_feedback = feedback;
        self.resolved_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{ApprovalRequest, ApprovalRequestId, ApprovalStatus};
    use crate::domain::order::OrderId;
    use crate::domain::party::{CustomerId, ProviderId};
    use crate::domain::time_entry::TimeEntryId;
    use crate::errors::DomainError;
    use crate::money::{Currency, Money};

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            id: ApprovalRequestId("ar-1".to_string()),
            order_id: OrderId("o-1".to_string()),
            provider_id: ProviderId("prov-1".to_string()),
            customer_id: CustomerId("cust-1".to_string()),
            time_entry_ids: vec![TimeEntryId("te-1".to_string()), TimeEntryId("te-2".to_string())],
            total_hours: Decimal::new(50, 1),
            total_amount: Money::new(10_000, Currency::Eur),
            status: ApprovalStatus::Pending,
            approved_entry_ids: Vec::new(),
            provider_message: None,
            customer_feedback: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn pending_request_resolves_once() {
        let mut request = request();
        request
            .resolve(
                ApprovalStatus::Approved,
                request.time_entry_ids.clone(),
                None,
                Utc::now(),
            )
            .expect("first resolution");
        assert_eq!(request.status, ApprovalStatus::Approved);
        assert!(request.resolved_at.is_some());

        let error = request
            .resolve(ApprovalStatus::Rejected, Vec::new(), None, Utc::now())
            .expect_err("second resolution must fail");
        assert!(matches!(
            error,
            DomainError::InvalidStateTransition { entity: "approval_request", .. }
        ));
    }

    #[test]
    fn resolving_back_to_pending_is_rejected() {
        let mut request = request();
        let error = request
            .resolve(ApprovalStatus::Pending, Vec::new(), None, Utc::now())
            .expect_err("pending is not a resolution");
        assert!(matches!(
            error,
            DomainError::InvalidStateTransition { entity: "approval_request", .. }
        ));
    }
}
