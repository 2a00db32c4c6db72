//! HTTP-level tests for the payment webhook ingress: secret verification,
//! payload validation, and idempotent acknowledgement statuses.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_decimal::Decimal;
use tower::util::ServiceExt;

use taskpay_core::audit::InMemoryAuditSink;
use taskpay_core::escrow::EscrowEngine;
use taskpay_core::events::InMemoryNotificationSink;
use taskpay_core::ledger::OrderLedger;

use taskpay_db::repositories::{
    InMemoryApprovalRepository, InMemoryEscrowRepository, InMemoryOrderRepository,
    InMemoryPayeeRepository, InMemoryPaymentEventRepository, InMemoryPayoutRepository,
    InMemoryQuoteRepository, InMemoryTimeEntryRepository, InMemoryState,
};
use taskpay_payments::MockPaymentGateway;

use taskpay_server::services::{EscrowService, PayoutService, Repositories, Sinks};
use taskpay_server::webhooks::{router, WebhookState};

fn webhook_state() -> WebhookState {
    let state = InMemoryState::shared();
    let repos = Repositories {
        quotes: Arc::new(InMemoryQuoteRepository::new(state.clone())),
        orders: Arc::new(InMemoryOrderRepository::new(state.clone())),
        escrows: Arc::new(InMemoryEscrowRepository::new(state.clone())),
        time_entries: Arc::new(InMemoryTimeEntryRepository::new(state.clone())),
        approvals: Arc::new(InMemoryApprovalRepository::new(state.clone())),
        payouts: Arc::new(InMemoryPayoutRepository::new(state.clone())),
        payment_events: Arc::new(InMemoryPaymentEventRepository::new(state.clone())),
        payees: Arc::new(InMemoryPayeeRepository::new(state.clone())),
    };
    let sinks = Sinks {
        audit: Arc::new(InMemoryAuditSink::default()),
        notifications: Arc::new(InMemoryNotificationSink::default()),
    };
    let gateway = Arc::new(MockPaymentGateway::new());
    let ledger = Arc::new(Mutex::new(OrderLedger::new("test-signing-key")));

    WebhookState {
        escrow: Arc::new(EscrowService::new(
            repos.clone(),
            sinks.clone(),
            EscrowEngine::new(Decimal::new(5, 2)),
            gateway.clone(),
            ledger.clone(),
        )),
        payouts: Arc::new(PayoutService::new(repos, sinks, gateway, ledger)),
        secret: "whsec_test".to_string().into(),
    }
}

fn delivery(secret: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/payment")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-webhook-secret", secret);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

const CAPTURE_BODY: &str = r#"{
    "reference": "pi_http_1",
    "kind": "capture",
    "status": "succeeded",
    "amount_minor": 45000,
    "currency": "eur"
}"#;

#[tokio::test]
async fn missing_or_wrong_secret_is_unauthorized() {
    let app = router(webhook_state());

    let missing = app
        .clone()
        .oneshot(delivery(None, CAPTURE_BODY))
        .await
        .expect("response");
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .oneshot(delivery(Some("whsec_wrong"), CAPTURE_BODY))
        .await
        .expect("response");
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_payload_is_a_bad_request() {
    let app = router(webhook_state());
    let response = app
        .oneshot(delivery(Some("whsec_test"), r#"{"reference": "pi", "kind": "capture"}"#))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_reference_is_deferred_and_redelivery_is_duplicate() {
    let app = router(webhook_state());

    let first = app
        .clone()
        .oneshot(delivery(Some("whsec_test"), CAPTURE_BODY))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    let body = axum::body::to_bytes(first.into_body(), 1024).await.expect("body");
    assert!(String::from_utf8_lossy(&body).contains("deferred"));

    let second = app
        .oneshot(delivery(Some("whsec_test"), CAPTURE_BODY))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::OK);
    let body = axum::body::to_bytes(second.into_body(), 1024).await.expect("body");
    assert!(String::from_utf8_lossy(&body).contains("duplicate"));
}
