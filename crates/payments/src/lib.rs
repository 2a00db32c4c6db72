//! Payment processor integration.
//!
//! This crate is the only place that talks to the external money mover:
//! - **Gateway** (`gateway`) - capture and transfer calls with timeouts
//! - **HTTP transport** (`http`) - reqwest client with bounded retries
//! - **Webhook events** (`events`) - payload parsing and secret verification
//!
//! The engine core never depends on this crate; services hand it the
//! requests the pure engines stage and feed the resulting confirmations
//! back through the reconciliation paths.

pub mod events;
pub mod gateway;
pub mod http;

pub use events::{verify_webhook_secret, WebhookError, WebhookPayload};
pub use gateway::{
    CaptureAcknowledgement, GatewayError, MockPaymentGateway, NoopPaymentGateway, PaymentGateway,
    TransferReceipt, TransferRequest,
};
pub use http::HttpPaymentGateway;
