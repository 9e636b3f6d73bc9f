use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use purser_cli::commands::decide::{self, DecideArgs};
use purser_cli::commands::turn::{self, TurnArgs};
use purser_cli::commands::{config, doctor, history, migrate, session};
use rust_decimal::Decimal;
use serde_json::Value;

const WALLET: &str = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01";
const UNREACHABLE_RPC: &str = "http://127.0.0.1:9";
const KEY_ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("PURSER_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_poll_interval() {
    with_env(
        &[
            ("PURSER_DATABASE_URL", "sqlite::memory:"),
            ("PURSER_PAYMENT_POLL_INTERVAL_SECS", "not-a-number"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn decide_dry_run_pays_within_budget_without_storage() {
    with_env(&[("PURSER_DATABASE_URL", "sqlite:///nonexistent/dir/purser.db")], || {
        let result = decide::run(DecideArgs {
            goal: "headphones".to_string(),
            budget: Decimal::new(100, 0),
            text: format!("Yes, $60. Wallet: {WALLET}"),
            session_id: None,
        });
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "decide");
        assert_eq!(payload["data"]["verdict"]["decision"]["kind"], "execute_payment");
        assert_eq!(payload["data"]["verdict"]["decision"]["recipient_address"], WALLET);
        assert_eq!(payload["data"]["facts"]["price"], "60");
    });
}

#[test]
fn decide_dry_run_counters_over_budget_price() {
    with_env(&[], || {
        let result = decide::run(DecideArgs {
            goal: "headphones".to_string(),
            budget: Decimal::new(50, 0),
            text: format!("$60, send to {WALLET}"),
            session_id: None,
        });
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["verdict"]["decision"]["kind"], "send_message");
        let message = payload["message"].as_str().expect("message");
        assert!(message.contains("over my $50 budget"), "unexpected message: {message}");
    });
}

#[test]
fn decide_rejects_non_positive_budget() {
    with_env(&[], || {
        let result = decide::run(DecideArgs {
            goal: "headphones".to_string(),
            budget: Decimal::ZERO,
            text: "$10".to_string(),
            session_id: None,
        });
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

#[test]
fn turns_are_recorded_and_readable_per_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = sqlite_url(&dir.path().join("purser.db"));

    with_env(&[("PURSER_DATABASE_URL", url.as_str())], || {
        let opened = turn::run(turn_args(None));
        assert_eq!(opened.exit_code, 0, "open failed: {}", opened.output);
        let opened = parse_payload(&opened.output);
        assert_eq!(
            opened["message"],
            "I want to buy headphones. Do you have it in stock? My budget is $100."
        );

        let replied = turn::run(turn_args(Some("Do you have the headphones?")));
        assert_eq!(replied.exit_code, 0, "turn failed: {}", replied.output);
        let replied = parse_payload(&replied.output);
        assert_eq!(replied["data"]["decision"]["kind"], "send_message");
        assert!(replied["data"]["payment"].is_null());

        let record = session::run("ana_s1".to_string());
        assert_eq!(record.exit_code, 0);
        let record = parse_payload(&record.output);
        let turns = record["data"]["conversation_history"].as_array().expect("history");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["annotations"]["rule"], "opening");
        assert_eq!(turns[1]["request_text"], "Do you have the headphones?");

        let listed = history::run("ana".to_string(), 1);
        let listed = parse_payload(&listed.output);
        let entries = listed["data"].as_array().expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["request_text"], "Do you have the headphones?");
    });
}

#[test]
fn turns_without_session_id_resume_the_users_stored_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = sqlite_url(&dir.path().join("purser.db"));

    with_env(&[("PURSER_DATABASE_URL", url.as_str())], || {
        let mut args = turn_args(None);
        args.session_id = None;
        let opened = turn::run(args.clone());
        assert_eq!(opened.exit_code, 0, "open failed: {}", opened.output);
        let opened_session = parse_payload(&opened.output)["data"]["session_id"].clone();
        assert!(opened_session.as_str().is_some_and(|id| id.starts_with("ana_")));

        args.text = Some("Do you have the headphones?".to_string());
        let replied = turn::run(args);
        assert_eq!(replied.exit_code, 0, "turn failed: {}", replied.output);
        assert_eq!(parse_payload(&replied.output)["data"]["session_id"], opened_session);

        let listed = parse_payload(&history::run("ana".to_string(), 10).output);
        let entries = listed["data"].as_array().expect("entries");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry["session_id"] == opened_session));
    });
}

#[test]
fn payment_turn_with_unreachable_ledger_is_reported_as_failed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = sqlite_url(&dir.path().join("purser.db"));

    let vars = [
        ("PURSER_DATABASE_URL", url.as_str()),
        ("PURSER_LEDGER_RPC_URL", UNREACHABLE_RPC),
        ("PURSER_LEDGER_FALLBACK_RPC_URL", UNREACHABLE_RPC),
    ];
    with_env(&vars, || {
        let text = format!("Yes, $60. Wallet: {WALLET}");
        let result = turn::run(turn_args(Some(&text)));
        assert_eq!(result.exit_code, 0, "turn failed: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["decision"]["kind"], "execute_payment");
        assert_eq!(payload["data"]["payment"]["state"]["state"], "failed");
        assert_eq!(payload["data"]["payment"]["state"]["failure"], "network_unavailable");
        let reply = payload["message"].as_str().expect("reply");
        assert!(reply.starts_with("I couldn't send the payment of $60"), "unexpected reply: {reply}");
    });
}

#[test]
fn config_redacts_the_payer_key() {
    with_env(&[("BUYER_WALLET_PRIVATE_KEY", KEY_ONE)], || {
        let output = config::run();
        assert!(output.contains(
            "- ledger.private_key = <redacted> (source: env (BUYER_WALLET_PRIVATE_KEY))"
        ));
        assert!(!output.contains(KEY_ONE));
        assert!(output.contains("- payment.confirmation_timeout_secs = 300 (source: default)"));
    });
}

#[test]
fn doctor_reports_missing_payer_key() {
    with_env(&[("PURSER_DATABASE_URL", "sqlite::memory:")], || {
        let report: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");
        assert_eq!(report["overall_status"], "fail");

        let checks = report["checks"].as_array().expect("checks");
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .expect("check present")
        };
        assert_eq!(status_of("config_validation"), "pass");
        assert_eq!(status_of("payer_key_readiness"), "fail");
        assert_eq!(status_of("database_connectivity"), "pass");
    });
}

#[test]
fn doctor_passes_with_a_valid_key() {
    with_env(
        &[("PURSER_DATABASE_URL", "sqlite::memory:"), ("PURSER_LEDGER_PRIVATE_KEY", KEY_ONE)],
        || {
            let output = doctor::run(false);
            assert!(output.starts_with("doctor: all readiness checks passed"), "{output}");
            assert!(output.contains("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"));
        },
    );
}

fn turn_args(text: Option<&str>) -> TurnArgs {
    TurnArgs {
        user_id: "ana".to_string(),
        session_id: Some("ana_s1".to_string()),
        goal: "headphones".to_string(),
        budget: Decimal::new(100, 0),
        text: text.map(str::to_string),
    }
}

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PURSER_DATABASE_URL",
        "PURSER_DATABASE_MAX_CONNECTIONS",
        "PURSER_DATABASE_TIMEOUT_SECS",
        "PURSER_LEDGER_RPC_URL",
        "PURSER_LEDGER_FALLBACK_RPC_URL",
        "PURSER_LEDGER_CHAIN_ID",
        "PURSER_LEDGER_TOKEN_CONTRACT",
        "PURSER_LEDGER_TOKEN_DECIMALS",
        "PURSER_LEDGER_GAS_LIMIT",
        "PURSER_LEDGER_PRIVATE_KEY",
        "BUYER_WALLET_PRIVATE_KEY",
        "PURSER_PAYMENT_POLL_INTERVAL_SECS",
        "PURSER_PAYMENT_CONFIRMATION_TIMEOUT_SECS",
        "PURSER_NEGOTIATION_CURRENCY",
        "PURSER_NEGOTIATION_NETWORK",
        "PURSER_NEGOTIATION_HISTORY_WINDOW",
        "PURSER_MEMORY_PERSIST_RETRIES",
        "PURSER_LOGGING_LEVEL",
        "PURSER_LOGGING_FORMAT",
        "PURSER_LOG_LEVEL",
        "PURSER_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
