pub mod bootstrap;
pub mod health;
pub mod services;
pub mod sinks;
pub mod webhooks;

use anyhow::Result;
use taskpay_core::config::{AppConfig, LoadOptions};

pub fn init_logging(config: &AppConfig) {
    use taskpay_core::config::LogFormat::{Compact, Json, Pretty};
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let webhook_state = webhooks::WebhookState {
        escrow: app.escrow.clone(),
        payouts: app.payouts.clone(),
        secret: app.config.payments.webhook_secret.clone(),
    };
    webhooks::spawn(
        &app.config.server.bind_address,
        app.config.server.webhook_port,
        webhook_state,
    )
    .await?;

    tracing::info!(
        event_name = "system.server.ready",
        correlation_id = "bootstrap",
        "taskpay server is ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.shutdown",
        correlation_id = "bootstrap",
        "shutdown signal received, draining"
    );
    app.db_pool.close().await;
    Ok(())
}
