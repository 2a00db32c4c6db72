use secrecy::ExposeSecret;
use serde::Serialize;

use taskpay_core::config::{AppConfig, LoadOptions, PaymentTransport};
use taskpay_db::connect_with_settings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            Some(config)
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            None
        }
    };

    match &config {
        Some(config) => checks.push(payment_credentials_check(config)),
        None => checks.push(DoctorCheck {
            name: "payment_credentials",
            status: CheckStatus::Skipped,
            details: "configuration failed to load".to_string(),
        }),
    }

    match &config {
        Some(config) => {
            let (connectivity, migrations) = database_checks(config);
            checks.push(connectivity);
            checks.push(migrations);
        }
        None => {
            checks.push(DoctorCheck {
                name: "db_connectivity",
                status: CheckStatus::Skipped,
                details: "configuration failed to load".to_string(),
            });
            checks.push(DoctorCheck {
                name: "migration_visibility",
                status: CheckStatus::Skipped,
                details: "configuration failed to load".to_string(),
            });
        }
    }

    let failed = checks.iter().filter(|check| check.status == CheckStatus::Fail).count();
    let overall_status = if failed == 0 { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if failed == 0 {
        "all checks passed".to_string()
    } else {
        format!("{failed} check(s) failed")
    };

    DoctorReport { overall_status, summary, checks }
}

fn payment_credentials_check(config: &AppConfig) -> DoctorCheck {
    match config.payments.transport {
        PaymentTransport::Noop => DoctorCheck {
            name: "payment_credentials",
            status: CheckStatus::Pass,
            details: "noop transport configured; no external credentials needed".to_string(),
        },
        PaymentTransport::Http => {
            let key_ok = config
                .payments
                .api_key
                .as_ref()
                .map(|key| key.expose_secret().starts_with("sk_"))
                .unwrap_or(false);
            let secret_ok =
                config.payments.webhook_secret.expose_secret().starts_with("whsec_");
            if key_ok && secret_ok {
                DoctorCheck {
                    name: "payment_credentials",
                    status: CheckStatus::Pass,
                    details: "credential prefixes are valid".to_string(),
                }
            } else {
                DoctorCheck {
                    name: "payment_credentials",
                    status: CheckStatus::Fail,
                    details:
                        "expected processor credentials with valid prefixes (api key sk_*, webhook secret whsec_*)"
                            .to_string(),
                }
            }
        }
    }
}

fn database_checks(config: &AppConfig) -> (DoctorCheck, DoctorCheck) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return (
                DoctorCheck {
                    name: "db_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                DoctorCheck {
                    name: "migration_visibility",
                    status: CheckStatus::Skipped,
                    details: "async runtime unavailable".to_string(),
                },
            );
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return (
                    DoctorCheck {
                        name: "db_connectivity",
                        status: CheckStatus::Fail,
                        details: error.to_string(),
                    },
                    DoctorCheck {
                        name: "migration_visibility",
                        status: CheckStatus::Skipped,
                        details: "database unavailable".to_string(),
                    },
                );
            }
        };

        let connectivity = DoctorCheck {
            name: "db_connectivity",
            status: CheckStatus::Pass,
            details: "database connection established".to_string(),
        };

        let migrations = match sqlx_applied_migrations(&pool).await {
            Ok(count) => DoctorCheck {
                name: "migration_visibility",
                status: CheckStatus::Pass,
                details: format!("{count} migration(s) applied"),
            },
            Err(details) => DoctorCheck {
                name: "migration_visibility",
                status: CheckStatus::Fail,
                details,
            },
        };

        pool.close().await;
        (connectivity, migrations)
    })
}

async fn sqlx_applied_migrations(pool: &taskpay_db::DbPool) -> Result<i64, String> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await
    .map_err(|error| error.to_string())?;
    if table_exists == 0 {
        return Err("no migrations have been applied (run `taskpay migrate`)".to_string());
    }

    sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .map_err(|error| error.to_string())
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(format!("taskpay doctor: {}", report.summary));
    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("  [{marker}] {} - {}", check.name, check.details));
    }
    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
