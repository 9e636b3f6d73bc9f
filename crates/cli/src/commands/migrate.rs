use purser_db::{connect, migrations};

use crate::commands::{async_runtime, load_config, CommandResult, Failure};

pub fn run() -> CommandResult {
    match apply() {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => failure.into_result("migrate"),
    }
}

fn apply() -> Result<(), Failure> {
    let config = load_config()?;
    let runtime = async_runtime()?;

    runtime.block_on(async move {
        let pool = connect(&config.database)
            .await
            .map_err(|error| Failure::new("db_connectivity", error.to_string(), 4))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), 5))?;
        pool.close().await;
        Ok::<(), Failure>(())
    })
}
