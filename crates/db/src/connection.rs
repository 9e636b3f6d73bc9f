use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use purser_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Opens the session database. Every pooled connection enforces foreign keys,
/// runs in WAL mode, and waits out a locked database for up to `timeout_secs`.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let timeout_secs = config.timeout_secs.max(1);
    let busy_timeout = format!("PRAGMA busy_timeout = {}", timeout_secs * 1_000);

    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs))
        .after_connect(move |conn, _meta| {
            let busy_timeout = busy_timeout.clone();
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query(&busy_timeout).execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await
}

#[cfg(test)]
pub(crate) fn in_memory() -> DatabaseConfig {
    DatabaseConfig { url: "sqlite::memory:".to_string(), max_connections: 1, timeout_secs: 30 }
}

#[cfg(test)]
mod tests {
    use super::{connect, in_memory};

    #[tokio::test]
    async fn connections_apply_session_pragmas() {
        let mut config = in_memory();
        config.timeout_secs = 7;
        let pool = connect(&config).await.expect("connect");

        let foreign_keys: i64 =
            sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&pool).await.expect("foreign_keys");
        let busy_timeout: i64 =
            sqlx::query_scalar("PRAGMA busy_timeout").fetch_one(&pool).await.expect("busy_timeout");

        assert_eq!(foreign_keys, 1);
        assert_eq!(busy_timeout, 7_000);
    }
}
