use purser_core::domain::session::SessionId;

use crate::bootstrap::bootstrap_with_config;
use crate::commands::{async_runtime, load_config, CommandResult, Failure};

/// Prints the stored record for `session_id`; unknown ids read as empty.
pub fn run(session_id: String) -> CommandResult {
    let result = load_config().and_then(|config| {
        let runtime = async_runtime()?;
        runtime.block_on(async move {
            let app = bootstrap_with_config(config).await?;
            let record = app
                .runtime
                .store()
                .read(&SessionId(session_id))
                .await
                .map_err(|error| Failure::new("persistence", error.to_string(), 8))?;
            app.db_pool.close().await;
            Ok::<_, Failure>(record)
        })
    });

    match result {
        Ok(record) => {
            let message = format!(
                "session {} has {} turn(s) and {} payment attempt(s)",
                record.session_id,
                record.conversation_history.len(),
                record.payment_attempts.len()
            );
            CommandResult::success_with("session", message, &record)
        }
        Err(failure) => failure.into_result("session"),
    }
}
