use crate::bootstrap::bootstrap_with_config;
use crate::commands::{async_runtime, load_config, CommandResult, Failure};

/// Most recent turns across every session of `user_id`, newest first.
pub fn run(user_id: String, limit: usize) -> CommandResult {
    let result = load_config().and_then(|config| {
        let runtime = async_runtime()?;
        runtime.block_on(async move {
            let app = bootstrap_with_config(config).await?;
            let entries = app
                .runtime
                .store()
                .user_history(&user_id, limit)
                .await
                .map_err(|error| Failure::new("persistence", error.to_string(), 8))?;
            app.db_pool.close().await;
            Ok::<_, Failure>(entries)
        })
    });

    match result {
        Ok(entries) => {
            CommandResult::success_with("history", format!("{} turn(s)", entries.len()), &entries)
        }
        Err(failure) => failure.into_result("history"),
    }
}
