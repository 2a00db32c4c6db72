use taskpay_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use taskpay_core::events::{DomainEvent, NotificationSink};
use tracing::{error, info, warn};

/// Audit sink backing the binaries: every engine mutation lands in the
/// structured log stream with its correlation fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let order_id = event.order_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                order_id,
                actor = %event.actor,
                metadata = ?event.metadata,
                "audit event"
            ),
            AuditOutcome::Rejected => warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                order_id,
                actor = %event.actor,
                metadata = ?event.metadata,
                "audit event rejected"
            ),
            AuditOutcome::Failed => error!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                order_id,
                actor = %event.actor,
                metadata = ?event.metadata,
                "audit event failed"
            ),
        }
    }
}

/// Notification fan-out stand-in: publishes domain events to the log
/// stream. Delivery stays fire-and-forget; nothing here can block an engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn publish(&self, event: DomainEvent) {
        info!(
            event_name = "notification.published",
            correlation_id = "notification",
            payload = ?event,
            "domain event published"
        );
    }
}
