use anyhow::Context as _;
use purser_core::payment::ledger::ReceiptStatus;
use serde_json::json;

use crate::bootstrap::bootstrap_with_config;
use crate::commands::{async_runtime, load_config, CommandResult, Failure};

/// Receipt state of a transaction reference as the ledger sees it now.
pub fn run(reference: String) -> CommandResult {
    let result = load_config().and_then(|config| {
        let runtime = async_runtime()?;
        runtime.block_on(async move {
            let app = bootstrap_with_config(config).await?;
            let status = app
                .runtime
                .executor()
                .transaction_status(&reference)
                .await
                .with_context(|| format!("receipt lookup for {reference} failed"))
                .map_err(|error| Failure::new("ledger_query", format!("{error:#}"), 9))?;
            app.db_pool.close().await;
            Ok::<_, Failure>((reference, status))
        })
    });

    match result {
        Ok((reference, status)) => {
            let (state, block_reference) = match &status {
                ReceiptStatus::Pending => ("pending", None),
                ReceiptStatus::Confirmed { block_reference } => {
                    ("confirmed", Some(block_reference.clone()))
                }
                ReceiptStatus::Reverted => ("reverted", None),
            };
            CommandResult::success_with(
                "tx-status",
                format!("{reference} is {state}"),
                json!({ "reference": reference, "state": state, "block_reference": block_reference }),
            )
        }
        Err(failure) => failure.into_result("tx-status"),
    }
}
