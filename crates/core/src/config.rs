use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
pub const SEPOLIA_USDT_CONTRACT: &str = "0xaA8E23Fb1079EA71e0a56F48a2aA51851D8433D0";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub payment: PaymentConfig,
    pub negotiation: NegotiationConfig,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub fallback_rpc_url: Option<String>,
    pub chain_id: u64,
    pub token_contract: String,
    pub token_decimals: u32,
    pub gas_limit: u64,
    pub request_timeout_secs: u64,
    pub private_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub poll_interval_secs: u64,
    pub confirmation_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NegotiationConfig {
    pub currency: String,
    pub network: String,
    /// Number of earlier turns scanned when the current message lacks a fact.
    pub history_window: usize,
}

#[derive(Clone, Debug)]
pub struct MemoryConfig {
    pub persist_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub confirmation_timeout_secs: Option<u64>,
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
                url: "sqlite://purser.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            ledger: LedgerConfig {
                rpc_url: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
                fallback_rpc_url: Some("https://rpc.sepolia.org".to_string()),
                chain_id: SEPOLIA_CHAIN_ID,
                token_contract: SEPOLIA_USDT_CONTRACT.to_string(),
                token_decimals: 6,
                gas_limit: 100_000,
                request_timeout_secs: 20,
                private_key: None,
            },
            payment: PaymentConfig { poll_interval_secs: 10, confirmation_timeout_secs: 300 },
            negotiation: NegotiationConfig {
                currency: "USDT".to_string(),
                network: "Sepolia".to_string(),
                history_window: 6,
            },
            memory: MemoryConfig { persist_retries: 2 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

impl LedgerConfig {
    pub fn has_private_key(&self) -> bool {
        self.private_key.as_ref().is_some_and(|key| !key.expose_secret().trim().is_empty())
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("purser.toml"));
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

        if let Some(ledger) = patch.ledger {
            if let Some(rpc_url) = ledger.rpc_url {
                self.ledger.rpc_url = rpc_url;
            }
            if let Some(fallback_rpc_url) = ledger.fallback_rpc_url {
                self.ledger.fallback_rpc_url =
                    Some(fallback_rpc_url).filter(|url| !url.trim().is_empty());
            }
            if let Some(chain_id) = ledger.chain_id {
                self.ledger.chain_id = chain_id;
            }
            if let Some(token_contract) = ledger.token_contract {
                self.ledger.token_contract = token_contract;
            }
            if let Some(token_decimals) = ledger.token_decimals {
                self.ledger.token_decimals = token_decimals;
            }
            if let Some(gas_limit) = ledger.gas_limit {
                self.ledger.gas_limit = gas_limit;
            }
            if let Some(request_timeout_secs) = ledger.request_timeout_secs {
                self.ledger.request_timeout_secs = request_timeout_secs;
            }
            if let Some(private_key) = ledger.private_key {
                self.ledger.private_key = Some(secret_value(private_key));
            }
        }

        if let Some(payment) = patch.payment {
            if let Some(poll_interval_secs) = payment.poll_interval_secs {
                self.payment.poll_interval_secs = poll_interval_secs;
            }
            if let Some(confirmation_timeout_secs) = payment.confirmation_timeout_secs {
                self.payment.confirmation_timeout_secs = confirmation_timeout_secs;
            }
        }

        if let Some(negotiation) = patch.negotiation {
            if let Some(currency) = negotiation.currency {
                self.negotiation.currency = currency;
            }
            if let Some(network) = negotiation.network {
                self.negotiation.network = network;
            }
            if let Some(history_window) = negotiation.history_window {
                self.negotiation.history_window = history_window;
            }
        }

        if let Some(memory) = patch.memory {
            if let Some(persist_retries) = memory.persist_retries {
                self.memory.persist_retries = persist_retries;
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
        if let Some(value) = read_env("PURSER_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PURSER_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PURSER_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PURSER_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PURSER_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PURSER_LEDGER_RPC_URL") {
            self.ledger.rpc_url = value;
        }
        if let Some(value) = read_env("PURSER_LEDGER_FALLBACK_RPC_URL") {
            self.ledger.fallback_rpc_url = Some(value);
        }
        if let Some(value) = read_env("PURSER_LEDGER_CHAIN_ID") {
            self.ledger.chain_id = parse_u64("PURSER_LEDGER_CHAIN_ID", &value)?;
        }
        if let Some(value) = read_env("PURSER_LEDGER_TOKEN_CONTRACT") {
            self.ledger.token_contract = value;
        }
        if let Some(value) = read_env("PURSER_LEDGER_TOKEN_DECIMALS") {
            self.ledger.token_decimals = parse_u32("PURSER_LEDGER_TOKEN_DECIMALS", &value)?;
        }
        if let Some(value) = read_env("PURSER_LEDGER_GAS_LIMIT") {
            self.ledger.gas_limit = parse_u64("PURSER_LEDGER_GAS_LIMIT", &value)?;
        }
        let private_key = read_env("PURSER_LEDGER_PRIVATE_KEY")
            .or_else(|| read_env("BUYER_WALLET_PRIVATE_KEY"));
        if let Some(value) = private_key {
            self.ledger.private_key = Some(secret_value(value));
        }

        if let Some(value) = read_env("PURSER_PAYMENT_POLL_INTERVAL_SECS") {
            self.payment.poll_interval_secs =
                parse_u64("PURSER_PAYMENT_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("PURSER_PAYMENT_CONFIRMATION_TIMEOUT_SECS") {
            self.payment.confirmation_timeout_secs =
                parse_u64("PURSER_PAYMENT_CONFIRMATION_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PURSER_NEGOTIATION_CURRENCY") {
            self.negotiation.currency = value;
        }
        if let Some(value) = read_env("PURSER_NEGOTIATION_NETWORK") {
            self.negotiation.network = value;
        }
        if let Some(value) = read_env("PURSER_NEGOTIATION_HISTORY_WINDOW") {
            self.negotiation.history_window =
                parse_u32("PURSER_NEGOTIATION_HISTORY_WINDOW", &value)? as usize;
        }

        if let Some(value) = read_env("PURSER_MEMORY_PERSIST_RETRIES") {
            self.memory.persist_retries = parse_u32("PURSER_MEMORY_PERSIST_RETRIES", &value)?;
        }

        let log_level = read_env("PURSER_LOGGING_LEVEL").or_else(|| read_env("PURSER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PURSER_LOGGING_FORMAT").or_else(|| read_env("PURSER_LOG_FORMAT"));
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
        if let Some(rpc_url) = overrides.rpc_url {
            self.ledger.rpc_url = rpc_url;
        }
        if let Some(private_key) = overrides.private_key {
            self.ledger.private_key = Some(secret_value(private_key));
        }
        if let Some(poll_interval_secs) = overrides.poll_interval_secs {
            self.payment.poll_interval_secs = poll_interval_secs;
        }
        if let Some(confirmation_timeout_secs) = overrides.confirmation_timeout_secs {
            self.payment.confirmation_timeout_secs = confirmation_timeout_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_ledger(&self.ledger)?;
        validate_payment(&self.payment)?;
        validate_negotiation(&self.negotiation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("purser.toml"), PathBuf::from("config/purser.toml")]
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

fn validate_ledger(ledger: &LedgerConfig) -> Result<(), ConfigError> {
    let urls = std::iter::once(ledger.rpc_url.as_str()).chain(ledger.fallback_rpc_url.as_deref());
    for url in urls {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "ledger rpc url `{url}` must start with http:// or https://"
            )));
        }
    }

    let contract = ledger.token_contract.trim();
    let contract_ok = contract.len() == 42
        && contract.starts_with("0x")
        && contract.bytes().skip(2).all(|byte| byte.is_ascii_hexdigit());
    if !contract_ok {
        return Err(ConfigError::Validation(
            "ledger.token_contract must be a 0x-prefixed 20-byte hex address".to_string(),
        ));
    }

    if ledger.chain_id == 0 {
        return Err(ConfigError::Validation("ledger.chain_id must be non-zero".to_string()));
    }

    if ledger.token_decimals > 28 {
        return Err(ConfigError::Validation(
            "ledger.token_decimals must be at most 28".to_string(),
        ));
    }

    if ledger.gas_limit < 21_000 {
        return Err(ConfigError::Validation(
            "ledger.gas_limit must be at least 21000".to_string(),
        ));
    }

    if ledger.request_timeout_secs == 0 || ledger.request_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "ledger.request_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_payment(payment: &PaymentConfig) -> Result<(), ConfigError> {
    if payment.poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "payment.poll_interval_secs must be greater than zero".to_string(),
        ));
    }

    if payment.poll_interval_secs > payment.confirmation_timeout_secs {
        return Err(ConfigError::Validation(
            "payment.poll_interval_secs must not exceed payment.confirmation_timeout_secs"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_negotiation(negotiation: &NegotiationConfig) -> Result<(), ConfigError> {
    if negotiation.currency.trim().is_empty() || negotiation.network.trim().is_empty() {
        return Err(ConfigError::Validation(
            "negotiation.currency and negotiation.network must not be empty".to_string(),
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

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    ledger: Option<LedgerPatch>,
    payment: Option<PaymentPatch>,
    negotiation: Option<NegotiationPatch>,
    memory: Option<MemoryPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    rpc_url: Option<String>,
    fallback_rpc_url: Option<String>,
    chain_id: Option<u64>,
    token_contract: Option<String>,
    token_decimals: Option<u32>,
    gas_limit: Option<u64>,
    request_timeout_secs: Option<u64>,
    private_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentPatch {
    poll_interval_secs: Option<u64>,
    confirmation_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NegotiationPatch {
    currency: Option<String>,
    network: Option<String>,
    history_window: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryPatch {
    persist_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
