use purser_core::domain::session::SessionId;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bootstrap::bootstrap_with_config;
use crate::commands::{async_runtime, load_config, CommandResult, Failure};

#[derive(Clone, Debug)]
pub struct TurnArgs {
    pub user_id: String,
    pub session_id: Option<String>,
    pub goal: String,
    pub budget: Decimal,
    /// Counterparty message; `None` opens the negotiation instead.
    pub text: Option<String>,
}

pub fn run(args: TurnArgs) -> CommandResult {
    match execute(args) {
        Ok(result) => result,
        Err(failure) => failure.into_result("turn"),
    }
}

fn execute(args: TurnArgs) -> Result<CommandResult, Failure> {
    let config = load_config()?;
    let runtime = async_runtime()?;

    runtime.block_on(async move {
        let app = bootstrap_with_config(config).await?;
        let context = app
            .runtime
            .resolve_context(&args.user_id, args.session_id.map(SessionId), &args.goal, args.budget)
            .await?;

        let outcome = match args.text.as_deref() {
            None => app.runtime.open(&context).await?,
            Some(text) => {
                // Ctrl-C stops waiting on a broadcast transfer; it is recorded as timed out.
                let cancel = CancellationToken::new();
                let interrupt = cancel.clone();
                let watcher = tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!(
                            event_name = "cli.turn.interrupted",
                            "interrupted, abandoning confirmation wait"
                        );
                        interrupt.cancel();
                    }
                });
                let outcome =
                    app.runtime.handle_turn_with_cancellation(&context, text, cancel).await;
                watcher.abort();
                outcome?
            }
        };

        app.db_pool.close().await;
        Ok::<_, Failure>(CommandResult::success_with("turn", outcome.reply.clone(), &outcome))
    })
}
