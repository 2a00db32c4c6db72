use std::sync::{Arc, Mutex};

use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use taskpay_core::config::{AppConfig, ConfigError, LoadOptions, PaymentTransport};
use taskpay_core::escrow::EscrowEngine;
use taskpay_core::ledger::OrderLedger;
use taskpay_db::repositories::{
    SqlApprovalRepository, SqlEscrowRepository, SqlOrderRepository, SqlPayeeRepository,
    SqlPaymentEventRepository, SqlPayoutRepository, SqlQuoteRepository, SqlTimeEntryRepository,
};
use taskpay_db::{connect_with_settings, migrations, DbPool};
use taskpay_payments::{HttpPaymentGateway, NoopPaymentGateway, PaymentGateway};

use crate::services::{
    EscrowService, MatchingService, PayoutService, Repositories, Sinks, TimeTrackingService,
};
use crate::sinks::{TracingAuditSink, TracingNotificationSink};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub matching: Arc<MatchingService>,
    pub escrow: Arc<EscrowService>,
    pub timetracking: Arc<TimeTrackingService>,
    pub payouts: Arc<PayoutService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let repos = Repositories {
        quotes: Arc::new(SqlQuoteRepository::new(db_pool.clone())),
        orders: Arc::new(SqlOrderRepository::new(db_pool.clone())),
        escrows: Arc::new(SqlEscrowRepository::new(db_pool.clone())),
        time_entries: Arc::new(SqlTimeEntryRepository::new(db_pool.clone())),
        approvals: Arc::new(SqlApprovalRepository::new(db_pool.clone())),
        payouts: Arc::new(SqlPayoutRepository::new(db_pool.clone())),
        payment_events: Arc::new(SqlPaymentEventRepository::new(db_pool.clone())),
        payees: Arc::new(SqlPayeeRepository::new(db_pool.clone())),
    };
    let sinks = Sinks {
        audit: Arc::new(TracingAuditSink),
        notifications: Arc::new(TracingNotificationSink),
    };

    let gateway: Arc<dyn PaymentGateway> = match config.payments.transport {
        PaymentTransport::Http => {
            let base_url = config.payments.base_url.clone().unwrap_or_default();
            let api_key = config
                .payments
                .api_key
                .clone()
                .unwrap_or_else(|| String::new().into());
            Arc::new(HttpPaymentGateway::new(
                base_url,
                api_key,
                config.payments.timeout_secs,
                config.payments.max_retries,
            ))
        }
        PaymentTransport::Noop => Arc::new(NoopPaymentGateway),
    };
    info!(
        event_name = "system.bootstrap.payment_transport",
        correlation_id = "bootstrap",
        transport = ?config.payments.transport,
        "payment transport initialized"
    );

    let ledger =
        Arc::new(Mutex::new(OrderLedger::new(config.ledger.signing_key.expose_secret())));
    let escrow_engine = EscrowEngine::new(config.payments.platform_fee_rate);

    let matching = Arc::new(MatchingService::new(repos.clone(), sinks.clone()));
    let escrow = Arc::new(EscrowService::new(
        repos.clone(),
        sinks.clone(),
        escrow_engine,
        gateway.clone(),
        ledger.clone(),
    ));
    let timetracking = Arc::new(TimeTrackingService::new(repos.clone(), sinks.clone()));
    let payouts = Arc::new(PayoutService::new(repos, sinks, gateway, ledger));

    Ok(Application { config, db_pool, matching, escrow, timetracking, payouts })
}
