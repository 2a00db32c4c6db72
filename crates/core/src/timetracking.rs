//! Time logging and the customer approval workflow.
//!
//! The resolution path is the most dangerous spot in the lifecycle: a batch
//! decision that only half-applies would strand entries in `Submitted` with
//! no owner able to move them. Every operation therefore returns the complete
//! post-state of the approval aggregate, and the storage layer persists it
//! all-or-nothing.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::approval::{
    ApprovalDecision, ApprovalRequest, ApprovalRequestId, ApprovalStatus,
};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::party::{CustomerId, ProviderId};
use crate::domain::time_entry::{
    billable_amount, TimeCategory, TimeEntry, TimeEntryId, TimeEntryStatus,
};
use crate::errors::DomainError;
use crate::events::DomainEvent;
use crate::money::Money;

#[derive(Clone, Debug, PartialEq)]
pub struct TimeEntryDraft {
    pub work_date: NaiveDate,
    pub hours: Decimal,
    pub category: TimeCategory,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogOutcome {
    pub order: Order,
    pub entry: TimeEntry,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionOutcome {
    pub request: ApprovalRequest,
    pub entries: Vec<TimeEntry>,
    pub events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolutionOutcome {
    pub request: ApprovalRequest,
    pub entries: Vec<TimeEntry>,
    pub events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionOutcome {
    pub order: Order,
    pub events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, Default)]
pub struct TimeTrackingEngine;

impl TimeTrackingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Records a unit of work against an active order. The first logged entry
    /// moves the order from `EscrowHeld` into `InProgress`.
    pub fn log_time(
        &self,
        mut order: Order,
        draft: TimeEntryDraft,
        acting_provider: &ProviderId,
    ) -> Result<LogOutcome, DomainError> {
        if &order.provider_id != acting_provider {
            return Err(DomainError::NotAParty {
                actor: acting_provider.0.clone(),
                entity: "order",
            });
        }
        if !order.accepts_time_entries() {
            return Err(DomainError::InvalidStateTransition {
                entity: "order",
                from: order.status.as_str(),
                to: OrderStatus::InProgress.as_str(),
            });
        }
        if draft.hours <= Decimal::ZERO {
            return Err(DomainError::InvariantViolation(format!(
                "logged hours must be positive, got {}",
                draft.hours
            )));
        }

        if order.status == OrderStatus::EscrowHeld {
            order.transition_to(OrderStatus::InProgress)?;
        }

        let entry = TimeEntry {
            id: TimeEntryId(Uuid::new_v4().to_string()),
            order_id: order.id.clone(),
            provider_id: order.provider_id.clone(),
            work_date: draft.work_date,
            hours: draft.hours,
            category: draft.category,
            description: draft.description,
            status: TimeEntryStatus::Logged,
            billable_amount: None,
            created_at: Utc::now(),
        };

        Ok(LogOutcome { order, entry })
    }

    /// Batches logged entries into a pending approval request and flips each
    /// one to `Submitted`. Any entry that is not currently `Logged` fails the
    /// whole batch, which is what blocks double submission.
    pub fn submit_for_approval(
        &self,
        order: &Order,
        mut entries: Vec<TimeEntry>,
        provider_message: Option<String>,
        acting_provider: &ProviderId,
    ) -> Result<SubmissionOutcome, DomainError> {
        if &order.provider_id != acting_provider {
            return Err(DomainError::NotAParty {
                actor: acting_provider.0.clone(),
                entity: "order",
            });
        }
        if entries.is_empty() {
            return Err(DomainError::InvariantViolation(
                "an approval request needs at least one time entry".to_string(),
            ));
        }

        let mut total_hours = Decimal::ZERO;
        let mut total_amount = Money::zero(order.hourly_rate.currency);
        for entry in &mut entries {
            if entry.order_id != order.id {
                return Err(DomainError::ForeignAggregateMember {
                    entity: "time_entry",
                    id: entry.id.0.clone(),
                    order_id: order.id.0.clone(),
                });
            }
            if entry.status != TimeEntryStatus::Logged {
                return Err(DomainError::EntryNotLoggable {
                    entry_id: entry.id.clone(),
                    status: entry.status,
                });
            }
            entry.transition_to(TimeEntryStatus::Submitted)?;
            total_hours += entry.hours;
            total_amount =
                total_amount.checked_add(billable_amount(entry.hours, order.hourly_rate)?)?;
        }

        let request = ApprovalRequest {
            id: ApprovalRequestId(Uuid::new_v4().to_string()),
            order_id: order.id.clone(),
            provider_id: order.provider_id.clone(),
            customer_id: order.customer_id.clone(),
            time_entry_ids: entries.iter().map(|entry| entry.id.clone()).collect(),
            total_hours,
            total_amount,
            status: ApprovalStatus::Pending,
            approved_entry_ids: Vec::new(),
            provider_message,
            customer_feedback: None,
            created_at: Utc::now(),
            resolved_at: None,
        };

        let events = vec![DomainEvent::ApprovalRequested {
            order_id: order.id.clone(),
            approval_request_id: request.id.clone(),
            total_amount,
        }];

        Ok(SubmissionOutcome { request, entries, events })
    }

    /// Applies the customer's decision across the whole batch. Approved
    /// entries are priced at the order's hourly rate and advance straight to
    /// `Billed`; the rest become immutable rejected history. The returned
    /// aggregate must be committed in one transaction.
    pub fn resolve_approval(
        &self,
        order: &Order,
        mut request: ApprovalRequest,
        mut entries: Vec<TimeEntry>,
        decision: ApprovalDecision,
        feedback: Option<String>,
        acting_customer: &CustomerId,
    ) -> Result<ResolutionOutcome, DomainError> {
        if &request.customer_id != acting_customer {
            return Err(DomainError::NotAParty {
                actor: acting_customer.0.clone(),
                entity: "approval_request",
            });
        }
        if !request.is_pending() {
            return Err(DomainError::InvalidStateTransition {
                entity: "approval_request",
                from: request.status.as_str(),
                to: "resolved",
            });
        }
        for entry in &entries {
            if !request.references(&entry.id) {
                return Err(DomainError::ForeignAggregateMember {
                    entity: "time_entry",
                    id: entry.id.0.clone(),
                    order_id: request.order_id.0.clone(),
                });
            }
        }
        if entries.len() != request.time_entry_ids.len() {
            return Err(DomainError::InvariantViolation(format!(
                "approval request {} references {} entries but {} were loaded",
                request.id,
                request.time_entry_ids.len(),
                entries.len()
            )));
        }

        let approved_ids: Vec<TimeEntryId> = match &decision {
            ApprovalDecision::Approve => request.time_entry_ids.clone(),
            ApprovalDecision::Reject => Vec::new(),
            ApprovalDecision::ApprovePartially { approved_entry_ids } => {
                for id in approved_entry_ids {
                    if !request.references(id) {
                        return Err(DomainError::ForeignAggregateMember {
                            entity: "time_entry",
                            id: id.0.clone(),
                            order_id: request.order_id.0.clone(),
                        });
                    }
                }
                approved_entry_ids.clone()
            }
        };

        for entry in &mut entries {
            if approved_ids.contains(&entry.id) {
                entry.transition_to(TimeEntryStatus::CustomerApproved)?;
                entry.bill_at(order.hourly_rate)?;
            } else {
                entry.transition_to(TimeEntryStatus::CustomerRejected)?;
            }
        }

        let outcome_status = if approved_ids.is_empty() {
            ApprovalStatus::Rejected
        } else if approved_ids.len() == request.time_entry_ids.len() {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::PartiallyApproved
        };
        request.resolve(outcome_status, approved_ids, feedback, Utc::now())?;

        let events = vec![DomainEvent::ApprovalResolved {
            order_id: request.order_id.clone(),
            approval_request_id: request.id.clone(),
            outcome: outcome_status,
        }];

        Ok(ResolutionOutcome { request, entries, events })
    }

    pub fn complete_by_provider(
        &self,
        mut order: Order,
        acting_provider: &ProviderId,
    ) -> Result<CompletionOutcome, DomainError> {
        if &order.provider_id != acting_provider {
            return Err(DomainError::NotAParty {
                actor: acting_provider.0.clone(),
                entity: "order",
            });
        }
        order.confirm_provider_completion(Utc::now())?;
        Ok(CompletionOutcome { events: completion_events(&order), order })
    }

    pub fn complete_by_customer(
        &self,
        mut order: Order,
        acting_customer: &CustomerId,
    ) -> Result<CompletionOutcome, DomainError> {
        if &order.customer_id != acting_customer {
            return Err(DomainError::NotAParty {
                actor: acting_customer.0.clone(),
                entity: "order",
            });
        }
        order.confirm_customer_completion(Utc::now())?;
        Ok(CompletionOutcome { events: completion_events(&order), order })
    }
}

fn completion_events(order: &Order) -> Vec<DomainEvent> {
    if order.status == OrderStatus::CustomerCompleted {
        vec![DomainEvent::OrderCompleted { order_id: order.id.clone() }]
    } else {
        Vec::new()
    }
}
