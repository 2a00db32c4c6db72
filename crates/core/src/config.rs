use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Currency;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub payments: PaymentsConfig,
    pub ledger: LedgerConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PaymentsConfig {
    pub transport: PaymentTransport,
    pub api_key: Option<SecretString>,
    pub webhook_secret: SecretString,
    pub base_url: Option<String>,
    pub currency: Currency,
    pub platform_fee_rate: Decimal,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub signing_key: SecretString,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub webhook_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTransport {
    Http,
    Noop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub payment_transport: Option<PaymentTransport>,
    pub payment_api_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub platform_fee_rate: Option<Decimal>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://taskpay.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            payments: PaymentsConfig {
                transport: PaymentTransport::Noop,
                api_key: None,
                webhook_secret: String::new().into(),
                base_url: None,
                currency: Currency::Eur,
                platform_fee_rate: Decimal::new(5, 2),
                timeout_secs: 30,
                max_retries: 3,
            },
            ledger: LedgerConfig { signing_key: "development-only-ledger-key".to_string().into() },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                webhook_port: 8081,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for PaymentTransport {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "noop" => Ok(Self::Noop),
            other => Err(ConfigError::Validation(format!(
                "unsupported payment transport `{other}` (expected http|noop)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("taskpay.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(payments) = patch.payments {
            if let Some(transport) = payments.transport {
                self.payments.transport = transport;
            }
            if let Some(api_key_value) = payments.api_key {
                self.payments.api_key = Some(secret_value(api_key_value));
            }
            if let Some(webhook_secret_value) = payments.webhook_secret {
                self.payments.webhook_secret = secret_value(webhook_secret_value);
            }
            if let Some(base_url) = payments.base_url {
                self.payments.base_url = Some(base_url);
            }
            if let Some(currency) = payments.currency {
                self.payments.currency = currency;
            }
            if let Some(platform_fee_rate) = payments.platform_fee_rate {
                self.payments.platform_fee_rate = platform_fee_rate;
            }
            if let Some(timeout_secs) = payments.timeout_secs {
                self.payments.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = payments.max_retries {
                self.payments.max_retries = max_retries;
            }
        }

        if let Some(ledger) = patch.ledger {
            if let Some(signing_key_value) = ledger.signing_key {
                self.ledger.signing_key = secret_value(signing_key_value);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(webhook_port) = server.webhook_port {
                self.server.webhook_port = webhook_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TASKPAY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TASKPAY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("TASKPAY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TASKPAY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TASKPAY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TASKPAY_PAYMENTS_TRANSPORT") {
            self.payments.transport = value.parse()?;
        }
        if let Some(value) = read_env("TASKPAY_PAYMENTS_API_KEY") {
            self.payments.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TASKPAY_PAYMENTS_WEBHOOK_SECRET") {
            self.payments.webhook_secret = secret_value(value);
        }
        if let Some(value) = read_env("TASKPAY_PAYMENTS_BASE_URL") {
            self.payments.base_url = Some(value);
        }
        if let Some(value) = read_env("TASKPAY_PAYMENTS_CURRENCY") {
            self.payments.currency = Currency::parse(&value).ok_or_else(|| {
                ConfigError::InvalidEnvOverride {
                    key: "TASKPAY_PAYMENTS_CURRENCY".to_string(),
                    value,
                }
            })?;
        }
        if let Some(value) = read_env("TASKPAY_PAYMENTS_PLATFORM_FEE_RATE") {
            self.payments.platform_fee_rate =
                parse_decimal("TASKPAY_PAYMENTS_PLATFORM_FEE_RATE", &value)?;
        }
        if let Some(value) = read_env("TASKPAY_PAYMENTS_TIMEOUT_SECS") {
            self.payments.timeout_secs = parse_u64("TASKPAY_PAYMENTS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TASKPAY_PAYMENTS_MAX_RETRIES") {
            self.payments.max_retries = parse_u32("TASKPAY_PAYMENTS_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("TASKPAY_LEDGER_SIGNING_KEY") {
            self.ledger.signing_key = secret_value(value);
        }

        if let Some(value) = read_env("TASKPAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TASKPAY_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("TASKPAY_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("TASKPAY_SERVER_WEBHOOK_PORT") {
            self.server.webhook_port = parse_u16("TASKPAY_SERVER_WEBHOOK_PORT", &value)?;
        }
        if let Some(value) = read_env("TASKPAY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TASKPAY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("TASKPAY_LOGGING_LEVEL").or_else(|| read_env("TASKPAY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TASKPAY_LOGGING_FORMAT").or_else(|| read_env("TASKPAY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(transport) = overrides.payment_transport {
            self.payments.transport = transport;
        }
        if let Some(api_key) = overrides.payment_api_key {
            self.payments.api_key = Some(secret_value(api_key));
        }
        if let Some(webhook_secret) = overrides.webhook_secret {
            self.payments.webhook_secret = secret_value(webhook_secret);
        }
        if let Some(platform_fee_rate) = overrides.platform_fee_rate {
            self.payments.platform_fee_rate = platform_fee_rate;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_payments(&self.payments)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("taskpay.toml"), PathBuf::from("config/taskpay.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_payments(payments: &PaymentsConfig) -> Result<(), ConfigError> {
    if payments.timeout_secs == 0 || payments.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "payments.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if payments.platform_fee_rate < Decimal::ZERO || payments.platform_fee_rate >= Decimal::ONE {
        return Err(ConfigError::Validation(
            "payments.platform_fee_rate must be a fraction in [0, 1)".to_string(),
        ));
    }

    match payments.transport {
        PaymentTransport::Http => {
            let missing_key = payments
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing_key {
                return Err(ConfigError::Validation(
                    "payments.api_key is required for the http transport".to_string(),
                ));
            }
            let missing_url =
                payments.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing_url {
                return Err(ConfigError::Validation(
                    "payments.base_url is required for the http transport".to_string(),
                ));
            }
            if payments.webhook_secret.expose_secret().trim().is_empty() {
                return Err(ConfigError::Validation(
                    "payments.webhook_secret is required for the http transport".to_string(),
                ));
            }
        }
        PaymentTransport::Noop => {}
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.webhook_port == 0 {
        return Err(ConfigError::Validation(
            "server.webhook_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    value.parse::<Decimal>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    payments: Option<PaymentsPatch>,
    ledger: Option<LedgerPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentsPatch {
    transport: Option<PaymentTransport>,
    api_key: Option<String>,
    webhook_secret: Option<String>,
    base_url: Option<String>,
    currency: Option<Currency>,
    platform_fee_rate: Option<Decimal>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    signing_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    webhook_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
