use serde::Deserialize;
use thiserror::Error;

use taskpay_core::domain::escrow::PaymentReference;
use taskpay_core::events::{PaymentEvent, PaymentEventKind};
use taskpay_core::money::{Currency, Money};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("webhook signature verification failed")]
    BadSignature,
    #[error("webhook payload could not be parsed: {0}")]
    BadPayload(String),
    #[error("webhook payload carries unknown currency `{0}`")]
    UnknownCurrency(String),
}

/// Wire shape of a processor notification. `kind` distinguishes captures
/// from transfers, `status` carries the terminal outcome.
#[derive(Clone, Debug, Deserialize)]
pub struct WebhookPayload {
    pub reference: String,
    pub kind: String,
    pub status: String,
    pub amount_minor: i64,
    pub currency: String,
}

impl WebhookPayload {
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(body).map_err(|error| WebhookError::BadPayload(error.to_string()))
    }

    pub fn into_event(self) -> Result<PaymentEvent, WebhookError> {
        let kind = match (self.kind.as_str(), self.status.as_str()) {
            ("capture", "succeeded") => PaymentEventKind::CaptureSucceeded,
            ("capture", "failed") => PaymentEventKind::CaptureFailed,
            ("transfer", "succeeded") => PaymentEventKind::TransferSucceeded,
            ("transfer", "failed") => PaymentEventKind::TransferFailed,
            (kind, status) => {
                return Err(WebhookError::BadPayload(format!(
                    "unsupported event kind/status `{kind}/{status}`"
                )))
            }
        };
        let currency = Currency::parse(&self.currency)
            .ok_or_else(|| WebhookError::UnknownCurrency(self.currency.clone()))?;

        Ok(PaymentEvent {
            reference: PaymentReference(self.reference),
            kind,
            amount: Money::new(self.amount_minor, currency),
        })
    }
}

/// Constant-time comparison of the shared webhook secret, so the check leaks
/// nothing about how much of the candidate matched.
pub fn verify_webhook_secret(expected: &str, candidate: &str) -> Result<(), WebhookError> {
    let expected = expected.as_bytes();
    let candidate = candidate.as_bytes();

    let mut diff = expected.len() ^ candidate.len();
    for index in 0..expected.len().max(candidate.len()) {
        let left = expected.get(index).copied().unwrap_or(0);
        let right = candidate.get(index).copied().unwrap_or(0);
        diff |= usize::from(left ^ right);
    }

    if diff == 0 {
        Ok(())
    } else {
        Err(WebhookError::BadSignature)
    }
}

#[cfg(test)]
mod tests {
    use taskpay_core::events::PaymentEventKind;
    use taskpay_core::money::Currency;

    use super::{verify_webhook_secret, WebhookError, WebhookPayload};

    #[test]
    fn capture_payload_parses_into_a_domain_event() {
        let body = br#"{
            "reference": "pi_123",
            "kind": "capture",
            "status": "succeeded",
            "amount_minor": 45000,
            "currency": "eur"
        }"#;

        let event = WebhookPayload::parse(body).expect("parse").into_event().expect("map");
        assert_eq!(event.reference.0, "pi_123");
        assert_eq!(event.kind, PaymentEventKind::CaptureSucceeded);
        assert_eq!(event.amount.amount_minor, 45_000);
        assert_eq!(event.amount.currency, Currency::Eur);
    }

    #[test]
    fn transfer_failure_payload_maps_to_transfer_failed() {
        let body = br#"{
            "reference": "tr_9",
            "kind": "transfer",
            "status": "failed",
            "amount_minor": 6000,
            "currency": "eur"
        }"#;

        let event = WebhookPayload::parse(body).expect("parse").into_event().expect("map");
        assert_eq!(event.kind, PaymentEventKind::TransferFailed);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let body = br#"{
            "reference": "x",
            "kind": "chargeback",
            "status": "succeeded",
            "amount_minor": 1,
            "currency": "eur"
        }"#;

        let error = WebhookPayload::parse(body).expect("parse").into_event().expect_err("map");
        assert!(matches!(error, WebhookError::BadPayload(_)));
    }

    #[test]
    fn unknown_currency_is_rejected() {
        let body = br#"{
            "reference": "x",
            "kind": "capture",
            "status": "succeeded",
            "amount_minor": 1,
            "currency": "xyz"
        }"#;

        let error = WebhookPayload::parse(body).expect("parse").into_event().expect_err("map");
        assert_eq!(error, WebhookError::UnknownCurrency("xyz".to_string()));
    }

    #[test]
    fn secret_verification_accepts_exact_match_only() {
        verify_webhook_secret("whsec_abc", "whsec_abc").expect("match");
        assert!(verify_webhook_secret("whsec_abc", "whsec_abd").is_err());
        assert!(verify_webhook_secret("whsec_abc", "whsec_ab").is_err());
        assert!(verify_webhook_secret("whsec_abc", "").is_err());
    }
}
