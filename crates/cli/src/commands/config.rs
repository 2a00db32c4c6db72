use secrecy::ExposeSecret;
use serde::Serialize;

use taskpay_core::config::{AppConfig, LoadOptions, PaymentTransport};

#[derive(Debug, Serialize)]
struct ConfigView {
    database_url: String,
    database_max_connections: u32,
    payments_transport: &'static str,
    payments_api_key: &'static str,
    payments_webhook_secret: &'static str,
    payments_currency: String,
    payments_platform_fee_rate: String,
    payments_timeout_secs: u64,
    payments_max_retries: u32,
    server_bind_address: String,
    server_health_check_port: u16,
    server_webhook_port: u16,
    logging_level: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("configuration issue: {error}"),
    };

    let view = ConfigView {
        database_url: config.database.url.clone(),
        database_max_connections: config.database.max_connections,
        payments_transport: match config.payments.transport {
            PaymentTransport::Http => "http",
            PaymentTransport::Noop => "noop",
        },
        payments_api_key: redact(
            config.payments.api_key.as_ref().map(|key| key.expose_secret()),
        ),
        payments_webhook_secret: redact(Some(config.payments.webhook_secret.expose_secret())),
        payments_currency: config.payments.currency.to_string(),
        payments_platform_fee_rate: config.payments.platform_fee_rate.to_string(),
        payments_timeout_secs: config.payments.timeout_secs,
        payments_max_retries: config.payments.max_retries,
        server_bind_address: config.server.bind_address.clone(),
        server_health_check_port: config.server.health_check_port,
        server_webhook_port: config.server.webhook_port,
        logging_level: config.logging.level.clone(),
    };

    serde_json::to_string_pretty(&view)
        .unwrap_or_else(|error| format!("config serialization failed: {error}"))
}

fn redact(value: Option<&str>) -> &'static str {
    match value {
        Some(value) if !value.trim().is_empty() => "<redacted>",
        _ => "<unset>",
    }
}
