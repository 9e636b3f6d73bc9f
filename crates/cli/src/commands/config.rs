use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use purser_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for Field { key, value, env_keys } in effective_fields(&config) {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    Field { key, value, env_keys }
}

/// Every effective setting with the env vars that can set it, secrets redacted.
fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let private_key =
        if config.ledger.has_private_key() { "<redacted>" } else { "<unset>" }.to_string();

    vec![
        field("database.url", config.database.url.clone(), &["PURSER_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["PURSER_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["PURSER_DATABASE_TIMEOUT_SECS"],
        ),
        field("ledger.rpc_url", config.ledger.rpc_url.clone(), &["PURSER_LEDGER_RPC_URL"]),
        field(
            "ledger.fallback_rpc_url",
            config.ledger.fallback_rpc_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["PURSER_LEDGER_FALLBACK_RPC_URL"],
        ),
        field("ledger.chain_id", config.ledger.chain_id.to_string(), &["PURSER_LEDGER_CHAIN_ID"]),
        field(
            "ledger.token_contract",
            config.ledger.token_contract.clone(),
            &["PURSER_LEDGER_TOKEN_CONTRACT"],
        ),
        field(
            "ledger.token_decimals",
            config.ledger.token_decimals.to_string(),
            &["PURSER_LEDGER_TOKEN_DECIMALS"],
        ),
        field(
            "ledger.gas_limit",
            config.ledger.gas_limit.to_string(),
            &["PURSER_LEDGER_GAS_LIMIT"],
        ),
        field(
            "ledger.private_key",
            private_key,
            &["PURSER_LEDGER_PRIVATE_KEY", "BUYER_WALLET_PRIVATE_KEY"],
        ),
        field(
            "payment.poll_interval_secs",
            config.payment.poll_interval_secs.to_string(),
            &["PURSER_PAYMENT_POLL_INTERVAL_SECS"],
        ),
        field(
            "payment.confirmation_timeout_secs",
            config.payment.confirmation_timeout_secs.to_string(),
            &["PURSER_PAYMENT_CONFIRMATION_TIMEOUT_SECS"],
        ),
        field(
            "negotiation.currency",
            config.negotiation.currency.clone(),
            &["PURSER_NEGOTIATION_CURRENCY"],
        ),
        field(
            "negotiation.network",
            config.negotiation.network.clone(),
            &["PURSER_NEGOTIATION_NETWORK"],
        ),
        field(
            "negotiation.history_window",
            config.negotiation.history_window.to_string(),
            &["PURSER_NEGOTIATION_HISTORY_WINDOW"],
        ),
        field(
            "memory.persist_retries",
            config.memory.persist_retries.to_string(),
            &["PURSER_MEMORY_PERSIST_RETRIES"],
        ),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["PURSER_LOGGING_LEVEL", "PURSER_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["PURSER_LOGGING_FORMAT", "PURSER_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["purser.toml", "config/purser.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
