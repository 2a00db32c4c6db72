use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{error, info, warn};

use taskpay_core::errors::{ApplicationError, ErrorClass};
use taskpay_core::events::PaymentEventKind;
use taskpay_payments::{verify_webhook_secret, WebhookPayload};

use crate::services::{EscrowService, PayoutService, ReconcileOutcome};

const SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Clone)]
pub struct WebhookState {
    pub escrow: Arc<EscrowService>,
    pub payouts: Arc<PayoutService>,
    pub secret: SecretString,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhooks/payment", post(receive_payment_event)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: WebhookState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.webhooks.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "payment webhook ingress started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.webhooks.error",
                correlation_id = "bootstrap",
                error = %error,
                "webhook ingress terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// Processor deliveries are at-least-once and unordered; every branch that
/// is not an engine fault answers 200 so the processor stops redelivering.
async fn receive_payment_event(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let candidate = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if verify_webhook_secret(state.secret.expose_secret(), candidate).is_err() {
        warn!(
            event_name = "webhooks.bad_signature",
            correlation_id = "webhook",
            "rejected webhook delivery with invalid secret"
        );
        return (StatusCode::UNAUTHORIZED, Json(WebhookResponse { status: "unauthorized" }));
    }

    let event = match WebhookPayload::parse(&body).and_then(WebhookPayload::into_event) {
        Ok(event) => event,
        Err(error) => {
            warn!(
                event_name = "webhooks.bad_payload",
                correlation_id = "webhook",
                error = %error,
                "rejected malformed webhook delivery"
            );
            return (StatusCode::BAD_REQUEST, Json(WebhookResponse { status: "bad_payload" }));
        }
    };

    let result = match event.kind {
        PaymentEventKind::CaptureSucceeded | PaymentEventKind::CaptureFailed => {
            state.escrow.reconcile_webhook_event(&event).await
        }
        PaymentEventKind::TransferSucceeded | PaymentEventKind::TransferFailed => {
            state.payouts.reconcile_transfer_event(&event).await
        }
    };

    match result {
        Ok(ReconcileOutcome::Applied) => (StatusCode::OK, Json(WebhookResponse { status: "applied" })),
        Ok(ReconcileOutcome::Duplicate) => {
            (StatusCode::OK, Json(WebhookResponse { status: "duplicate" }))
        }
        Ok(ReconcileOutcome::Deferred) => {
            (StatusCode::OK, Json(WebhookResponse { status: "deferred" }))
        }
        Err(ApplicationError::Domain(domain)) if domain.class() == ErrorClass::Invariant => {
            // Redelivery cannot repair a broken invariant; the order is
            // already parked for manual resolution, so acknowledge.
            error!(
                event_name = "webhooks.invariant_violation",
                correlation_id = "webhook",
                reference = %event.reference,
                error = %domain,
                "webhook apply hit a financial invariant violation"
            );
            (StatusCode::OK, Json(WebhookResponse { status: "error_recorded" }))
        }
        Err(error) => {
            error!(
                event_name = "webhooks.apply_failed",
                correlation_id = "webhook",
                reference = %event.reference,
                error = %error,
                "webhook apply failed; delivery will be retried"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse { status: "retry_later" }),
            )
        }
    }
}
