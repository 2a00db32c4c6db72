use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

use taskpay_core::domain::payee::PayoutDestination;
use taskpay_core::domain::payout::IdempotencyKey;
use taskpay_core::escrow::CaptureRequest;
use taskpay_core::money::Money;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("payment call timed out after {0} seconds")]
    Timeout(u64),
    #[error("payment call rejected: {0}")]
    Rejected(String),
    #[error("payment transport failed: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Transport faults and timeouts are safe to retry under the same
    /// idempotency key; a rejection is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureAcknowledgement {
    pub reference: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub amount: Money,
    pub destination: PayoutDestination,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transfer_reference: String,
}

/// The capture/transfer surface of the payment processor.
///
/// Contract: a transfer retried under an idempotency key that already
/// executed returns the original receipt without moving money a second
/// time. Asynchronous confirmations for both calls arrive later as webhook
/// events keyed by the returned references.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(&self, request: &CaptureRequest)
        -> Result<CaptureAcknowledgement, GatewayError>;
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, GatewayError>;
}

/// Acknowledges everything without an external call. Development transport;
/// the server logs which transport is active at startup.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPaymentGateway;

#[async_trait]
impl PaymentGateway for NoopPaymentGateway {
    async fn capture(
        &self,
        request: &CaptureRequest,
    ) -> Result<CaptureAcknowledgement, GatewayError> {
        Ok(CaptureAcknowledgement { reference: request.reference.0.clone() })
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, GatewayError> {
        let short_key: String = request.idempotency_key.0.chars().take(12).collect();
        Ok(TransferReceipt { transfer_reference: format!("tr-noop-{short_key}") })
    }
}

#[derive(Default)]
struct MockGatewayState {
    captures: Vec<CaptureRequest>,
    transfers: Vec<TransferRequest>,
    executed_transfers: HashMap<String, TransferReceipt>,
    transfer_failures_remaining: u32,
    next_transfer_number: u64,
}

/// Scriptable gateway for tests and the smoke harness. Honors the duplicate
/// contract: a key that already executed returns its original receipt and
/// does not count as a second execution.
#[derive(Clone, Default)]
pub struct MockPaymentGateway {
    state: Arc<Mutex<MockGatewayState>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` transfer calls fail with a transport error.
    pub fn fail_next_transfers(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.transfer_failures_remaining = count;
        }
    }

    pub fn capture_calls(&self) -> usize {
        self.state.lock().map(|state| state.captures.len()).unwrap_or(0)
    }

    pub fn transfer_calls(&self) -> usize {
        self.state.lock().map(|state| state.transfers.len()).unwrap_or(0)
    }

    /// Distinct transfers actually executed, regardless of retries.
    pub fn executed_transfer_count(&self) -> usize {
        self.state.lock().map(|state| state.executed_transfers.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn capture(
        &self,
        request: &CaptureRequest,
    ) -> Result<CaptureAcknowledgement, GatewayError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GatewayError::Transport("mock state poisoned".to_string()))?;
        state.captures.push(request.clone());
        Ok(CaptureAcknowledgement { reference: request.reference.0.clone() })
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, GatewayError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GatewayError::Transport("mock state poisoned".to_string()))?;
        state.transfers.push(request.clone());

        if let Some(receipt) = state.executed_transfers.get(&request.idempotency_key.0) {
            return Ok(receipt.clone());
        }

        if state.transfer_failures_remaining > 0 {
            state.transfer_failures_remaining -= 1;
            return Err(GatewayError::Transport("simulated transfer outage".to_string()));
        }

        state.next_transfer_number += 1;
        let receipt =
            TransferReceipt { transfer_reference: format!("tr-mock-{}", state.next_transfer_number) };
        state.executed_transfers.insert(request.idempotency_key.0.clone(), receipt.clone());
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use taskpay_core::domain::escrow::PaymentReference;
    use taskpay_core::domain::order::OrderId;
    use taskpay_core::domain::payee::PayoutDestination;
    use taskpay_core::domain::payout::IdempotencyKey;
    use taskpay_core::domain::time_entry::TimeEntryId;
    use taskpay_core::escrow::CaptureRequest;
    use taskpay_core::money::{Currency, Money};

    use super::{GatewayError, MockPaymentGateway, PaymentGateway, TransferRequest};

    fn transfer_request() -> TransferRequest {
        TransferRequest {
            amount: Money::new(6_000, Currency::Eur),
            destination: PayoutDestination("acct_1".to_string()),
            idempotency_key: IdempotencyKey::derive(
                &OrderId("o-1".to_string()),
                &[TimeEntryId("te-1".to_string())],
            ),
        }
    }

    #[tokio::test]
    async fn duplicate_transfer_key_returns_the_original_receipt() {
        let gateway = MockPaymentGateway::new();
        let request = transfer_request();

        let first = gateway.transfer(&request).await.expect("first transfer");
        let second = gateway.transfer(&request).await.expect("duplicate transfer");

        assert_eq!(first, second);
        assert_eq!(gateway.transfer_calls(), 2);
        assert_eq!(gateway.executed_transfer_count(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_exhaust_then_succeed() {
        let gateway = MockPaymentGateway::new();
        gateway.fail_next_transfers(2);
        let request = transfer_request();

        let first = gateway.transfer(&request).await.expect_err("first scripted failure");
        assert!(first.is_retryable());
        gateway.transfer(&request).await.expect_err("second scripted failure");
        gateway.transfer(&request).await.expect("third attempt succeeds");

        assert_eq!(gateway.executed_transfer_count(), 1);
    }

    #[tokio::test]
    async fn capture_records_the_request() {
        let gateway = MockPaymentGateway::new();
        let request = CaptureRequest {
            amount: Money::new(45_000, Currency::Eur),
            reference: PaymentReference("pi_1".to_string()),
        };

        let ack = gateway.capture(&request).await.expect("capture");
        assert_eq!(ack.reference, "pi_1");
        assert_eq!(gateway.capture_calls(), 1);
    }

    #[test]
    fn rejections_are_not_retryable() {
        assert!(!GatewayError::Rejected("card declined".to_string()).is_retryable());
        assert!(GatewayError::Timeout(30).is_retryable());
    }
}
