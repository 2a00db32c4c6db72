use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use taskpay_core::escrow::CaptureRequest;

use crate::gateway::{
    CaptureAcknowledgement, GatewayError, PaymentGateway, TransferReceipt, TransferRequest,
};

/// JSON-over-HTTP transport to the payment processor. Both calls run under a
/// bounded timeout; transient faults are retried with exponential backoff and
/// the transfer's idempotency key rides along on every attempt, so a retry
/// can never move money twice.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    timeout: Duration,
    max_retries: u32,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            max_retries,
        }
    }

    async fn post_with_retries<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        idempotency_key: Option<&str>,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut request = self
                .client
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .timeout(self.timeout)
                .json(body);
            if let Some(key) = idempotency_key {
                request = request.header("Idempotency-Key", key);
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status().is_client_error() => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    return Err(GatewayError::Rejected(format!("{status}: {detail}")));
                }
                Ok(response) => GatewayError::Transport(format!(
                    "processor returned {status}",
                    status = response.status()
                )),
                Err(source) if source.is_timeout() => GatewayError::Timeout(self.timeout.as_secs()),
                Err(source) => GatewayError::Transport(source.to_string()),
            };

            if !error.is_retryable() || attempt > self.max_retries {
                return Err(error);
            }

            let backoff_ms = 250u64.saturating_mul(1 << attempt.min(8)).min(5_000);
            warn!(
                event_name = "payments.http.retry",
                url = %url,
                attempt,
                backoff_ms,
                error = %error,
                "retrying payment call after transient failure"
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }
}

#[derive(Serialize)]
struct CaptureBody<'a> {
    amount_minor: i64,
    currency: &'a str,
    reference: &'a str,
}

#[derive(Serialize)]
struct TransferBody<'a> {
    amount_minor: i64,
    currency: &'a str,
    destination: &'a str,
}

#[derive(Deserialize)]
struct CaptureResponse {
    reference: String,
}

#[derive(Deserialize)]
struct TransferResponse {
    transfer_reference: String,
}

#[async_trait::async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn capture(
        &self,
        request: &CaptureRequest,
    ) -> Result<CaptureAcknowledgement, GatewayError> {
        let body = CaptureBody {
            amount_minor: request.amount.amount_minor,
            currency: request.amount.currency.as_str(),
            reference: &request.reference.0,
        };
        let response = self.post_with_retries("/v1/captures", &body, None).await?;
        let parsed: CaptureResponse = response
            .json()
            .await
            .map_err(|error| GatewayError::Transport(error.to_string()))?;
        Ok(CaptureAcknowledgement { reference: parsed.reference })
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, GatewayError> {
        let body = TransferBody {
            amount_minor: request.amount.amount_minor,
            currency: request.amount.currency.as_str(),
            destination: &request.destination.0,
        };
        let response = self
            .post_with_retries("/v1/transfers", &body, Some(&request.idempotency_key.0))
            .await?;
        let parsed: TransferResponse = response
            .json()
            .await
            .map_err(|error| GatewayError::Transport(error.to_string()))?;
        Ok(TransferReceipt { transfer_reference: parsed.transfer_reference })
    }
}
