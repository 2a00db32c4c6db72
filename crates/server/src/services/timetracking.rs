use uuid::Uuid;

use taskpay_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use taskpay_core::domain::approval::{ApprovalDecision, ApprovalRequest, ApprovalRequestId};
use taskpay_core::domain::order::{Order, OrderId};
use taskpay_core::domain::party::{CustomerId, ProviderId};
use taskpay_core::domain::time_entry::{TimeEntry, TimeEntryId};
use taskpay_core::errors::ApplicationError;
use taskpay_core::timetracking::{TimeEntryDraft, TimeTrackingEngine};

use taskpay_db::repositories::{ApprovalRepository, OrderRepository, TimeEntryRepository};

use super::{not_found, store_error, Repositories, Sinks};

pub struct TimeTrackingService {
    repos: Repositories,
    sinks: Sinks,
    engine: TimeTrackingEngine,
}

impl TimeTrackingService {
    pub fn new(repos: Repositories, sinks: Sinks) -> Self {
        Self { repos, sinks, engine: TimeTrackingEngine::new() }
    }

    pub async fn log_time(
        &self,
        order_id: &OrderId,
        draft: TimeEntryDraft,
        acting_provider: &ProviderId,
    ) -> Result<TimeEntry, ApplicationError> {
        let order = self.load_order(order_id).await?;
        let outcome = self.engine.log_time(order, draft, acting_provider)?;
        self.repos
            .time_entries
            .insert_with_order(&outcome.entry, &outcome.order)
            .await
            .map_err(store_error("order", &order_id.0))?;
        Ok(outcome.entry)
    }

    /// Batches logged entries into a pending approval request. The entries
    /// flip to `submitted` in the same transaction that stores the request.
    pub async fn submit_for_approval(
        &self,
        order_id: &OrderId,
        entry_ids: &[TimeEntryId],
        provider_message: Option<String>,
        acting_provider: &ProviderId,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();
        let order = self.load_order(order_id).await?;
        let entries = self.load_entries(entry_ids).await?;

        let outcome =
            self.engine.submit_for_approval(&order, entries, provider_message, acting_provider)?;
        self.repos
            .approvals
            .persist_submission(&outcome.request, &outcome.entries)
            .await
            .map_err(store_error("approval_request", &outcome.request.id.0))?;

        self.sinks.audit.emit(
            AuditEvent::new(
                Some(order_id.clone()),
                correlation_id,
                "timetracking.approval_requested",
                AuditCategory::TimeTracking,
                acting_provider.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("approval_request_id", outcome.request.id.0.clone())
            .with_metadata("entry_count", outcome.entries.len().to_string())
            .with_metadata("total_minor", outcome.request.total_amount.amount_minor.to_string()),
        );
        for event in outcome.events.clone() {
            self.sinks.notifications.publish(event);
        }
        Ok(outcome.request)
    }

    /// Applies the customer's decision over the whole batch in one
    /// all-or-nothing commit. A racing decision loses at the pending guard
    /// and surfaces as a stale-aggregate conflict.
    pub async fn resolve_approval(
        &self,
        approval_request_id: &ApprovalRequestId,
        decision: ApprovalDecision,
        feedback: Option<String>,
        acting_customer: &CustomerId,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();
        let request = self
            .repos
            .approvals
            .find(approval_request_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("approval_request", &approval_request_id.0))?;
        let order = self.load_order(&request.order_id).await?;
        let entries = self.load_entries(&request.time_entry_ids).await?;

        let outcome = self.engine.resolve_approval(
            &order,
            request,
            entries,
            decision,
            feedback,
            acting_customer,
        )?;
        self.repos
            .approvals
            .persist_resolution(&outcome.request, &outcome.entries)
            .await
            .map_err(store_error("approval_request", &approval_request_id.0))?;

        self.sinks.audit.emit(
            AuditEvent::new(
                Some(order.id.clone()),
                correlation_id,
                "timetracking.approval_resolved",
                AuditCategory::TimeTracking,
                acting_customer.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("approval_request_id", approval_request_id.0.clone())
            .with_metadata("outcome", outcome.request.status.as_str().to_string())
            .with_metadata("approved_count", outcome.request.approved_entry_ids.len().to_string()),
        );
        for event in outcome.events.clone() {
            self.sinks.notifications.publish(event);
        }
        Ok(outcome.request)
    }

    pub async fn complete_by_provider(
        &self,
        order_id: &OrderId,
        acting_provider: &ProviderId,
    ) -> Result<Order, ApplicationError> {
        let order = self.load_order(order_id).await?;
        let outcome = self.engine.complete_by_provider(order, acting_provider)?;
        self.repos
            .orders
            .update(&outcome.order)
            .await
            .map_err(store_error("order", &order_id.0))?;
        for event in outcome.events.clone() {
            self.sinks.notifications.publish(event);
        }
        Ok(outcome.order)
    }

    pub async fn complete_by_customer(
        &self,
        order_id: &OrderId,
        acting_customer: &CustomerId,
    ) -> Result<Order, ApplicationError> {
        let order = self.load_order(order_id).await?;
        let outcome = self.engine.complete_by_customer(order, acting_customer)?;
        self.repos
            .orders
            .update(&outcome.order)
            .await
            .map_err(store_error("order", &order_id.0))?;
        for event in outcome.events.clone() {
            self.sinks.notifications.publish(event);
        }
        Ok(outcome.order)
    }

    async fn load_order(&self, order_id: &OrderId) -> Result<Order, ApplicationError> {
        self.repos
            .orders
            .find(order_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| not_found("order", &order_id.0))
    }

    async fn load_entries(
        &self,
        entry_ids: &[TimeEntryId],
    ) -> Result<Vec<TimeEntry>, ApplicationError> {
        let entries = self
            .repos
            .time_entries
            .find_many(entry_ids)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        if entries.len() != entry_ids.len() {
            let loaded: Vec<&str> = entries.iter().map(|entry| entry.id.0.as_str()).collect();
            let missing = entry_ids
                .iter()
                .find(|id| !loaded.contains(&id.0.as_str()))
                .map(|id| id.0.clone())
                .unwrap_or_default();
            return Err(not_found("time_entry", &missing));
        }
        Ok(entries)
    }
}
