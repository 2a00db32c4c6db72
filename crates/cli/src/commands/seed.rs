use crate::commands::CommandResult;
use taskpay_core::config::{AppConfig, LoadOptions};
use taskpay_db::{connect_with_settings, fixtures, migrations};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let summary = fixtures::seed_demo(&pool)
            .await
            .map_err(|error| ("seed", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<fixtures::SeedSummary, (&'static str, String, u8)>(summary)
    });

    match result {
        Ok(summary) => CommandResult::success(
            "seed",
            format!(
                "seeded {} quote(s), {} proposal(s), {} payee(s)",
                summary.quotes, summary.proposals, summary.payees
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}
