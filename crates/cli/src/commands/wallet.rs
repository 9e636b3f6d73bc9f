use anyhow::Context as _;
use serde_json::json;

use crate::bootstrap::bootstrap_with_config;
use crate::commands::{async_runtime, load_config, CommandResult, Failure};

/// Payer address and token balance.
pub fn run() -> CommandResult {
    let result = load_config().and_then(|config| {
        let runtime = async_runtime()?;
        runtime.block_on(async move {
            let currency = config.negotiation.currency.clone();
            let app = bootstrap_with_config(config).await?;
            let summary = app
                .runtime
                .executor()
                .wallet_summary()
                .await
                .context("wallet balance lookup failed")
                .map_err(|error| Failure::new("ledger_query", format!("{error:#}"), 9))?;
            app.db_pool.close().await;
            Ok::<_, Failure>((summary, currency))
        })
    });

    match result {
        Ok((summary, currency)) => CommandResult::success_with(
            "wallet",
            format!("{} holds {} {currency}", summary.address, summary.balance),
            json!({ "address": summary.address, "balance": summary.balance, "currency": currency }),
        ),
        Err(failure) => failure.into_result("wallet"),
    }
}
