use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use purser_core::domain::payment::{PaymentAttempt, PaymentAttemptId, PaymentState};
use purser_core::domain::session::{SessionId, SessionRecord};

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

/// Session rows hold the bounded lists as JSON; payment attempts get their own
/// table so their state stays queryable by transaction reference.
pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_attempts(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<PaymentAttempt>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                amount,
                recipient_address,
                state,
                block_reference,
                failure,
                transaction_reference,
                polls,
                last_error,
                created_at,
                updated_at
             FROM payment_attempt
             WHERE session_id = ?
             ORDER BY ordinal ASC",
        )
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(attempt_from_row).collect()
    }

    async fn hydrate(&self, row: SqliteRow) -> Result<SessionRecord, RepositoryError> {
        let mut record = session_from_row(row)?;
        record.payment_attempts = self.load_attempts(&record.session_id).await?;
        Ok(record)
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find(&self, id: &SessionId) -> Result<Option<SessionRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                user_id,
                conversation_json,
                preferences_json,
                searches_json,
                created_at,
                updated_at
             FROM negotiation_session
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), RepositoryError> {
        let conversation_json = encode_json("conversation_history", &record.conversation_history)?;
        let preferences_json = encode_json("user_preferences", &record.user_preferences)?;
        let searches_json = encode_json("past_searches", &record.past_searches)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO negotiation_session (
                id,
                user_id,
                conversation_json,
                preferences_json,
                searches_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                conversation_json = excluded.conversation_json,
                preferences_json = excluded.preferences_json,
                searches_json = excluded.searches_json,
                updated_at = excluded.updated_at",
        )
        .bind(&record.session_id.0)
        .bind(record.user_id.as_deref())
        .bind(conversation_json)
        .bind(preferences_json)
        .bind(searches_json)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (ordinal, attempt) in record.payment_attempts.iter().enumerate() {
            sqlx::query(
                "INSERT INTO payment_attempt (
                    id,
                    session_id,
                    ordinal,
                    amount,
                    recipient_address,
                    state,
                    block_reference,
                    failure,
                    transaction_reference,
                    polls,
                    last_error,
                    created_at,
                    updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    ordinal = excluded.ordinal,
                    state = excluded.state,
                    block_reference = excluded.block_reference,
                    failure = excluded.failure,
                    transaction_reference = excluded.transaction_reference,
                    polls = excluded.polls,
                    last_error = excluded.last_error,
                    updated_at = excluded.updated_at",
            )
            .bind(&attempt.id.0)
            .bind(&record.session_id.0)
            .bind(ordinal as i64)
            .bind(attempt.amount.to_string())
            .bind(&attempt.recipient_address)
            .bind(attempt.state.as_str())
            .bind(attempt.state.block_reference())
            .bind(attempt.state.failure().map(|failure| failure.as_str()))
            .bind(attempt.transaction_reference.as_deref())
            .bind(i64::from(attempt.polls))
            .bind(attempt.last_error.as_deref())
            .bind(attempt.created_at.to_rfc3339())
            .bind(attempt.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SessionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                conversation_json,
                preferences_json,
                searches_json,
                created_at,
                updated_at
             FROM negotiation_session
             WHERE user_id = ?
             ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.hydrate(row).await?);
        }
        Ok(records)
    }
}

fn session_from_row(row: SqliteRow) -> Result<SessionRecord, RepositoryError> {
    Ok(SessionRecord {
        session_id: SessionId(row.try_get("id")?),
        user_id: row.try_get("user_id")?,
        conversation_history: decode_json("conversation_json", row.try_get("conversation_json")?)?,
        user_preferences: decode_json("preferences_json", row.try_get("preferences_json")?)?,
        past_searches: decode_json("searches_json", row.try_get("searches_json")?)?,
        payment_attempts: Vec::new(),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn attempt_from_row(row: SqliteRow) -> Result<PaymentAttempt, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let block_reference = row.try_get::<Option<String>, _>("block_reference")?;
    let failure = row.try_get::<Option<String>, _>("failure")?;
    let state = PaymentState::from_parts(&state_raw, block_reference.as_deref(), failure.as_deref())
        .ok_or_else(|| {
            RepositoryError::Decode(format!("unknown or incomplete payment state `{state_raw}`"))
        })?;

    let amount_raw = row.try_get::<String, _>("amount")?;
    let amount = Decimal::from_str(&amount_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid amount `{amount_raw}` ({error})"))
    })?;

    Ok(PaymentAttempt {
        id: PaymentAttemptId(row.try_get("id")?),
        amount,
        recipient_address: row.try_get("recipient_address")?,
        state,
        transaction_reference: row.try_get("transaction_reference")?,
        polls: parse_u32("polls", row.try_get("polls")?)?,
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn encode_json<T: serde::Serialize>(field: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{field}`: {error}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: String,
) -> Result<T, RepositoryError> {
    serde_json::from_str(&value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use purser_core::domain::payment::{PaymentAttempt, PaymentFailure, PaymentState};
    use purser_core::domain::session::{SearchRecord, SessionId, SessionRecord, TurnRecord};

    use super::SqlSessionRepository;
    use crate::connection::in_memory;
    use crate::migrations;
    use crate::repositories::SessionRepository;
    use crate::{connect, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect(&in_memory()).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_record() -> SessionRecord {
        let mut record =
            SessionRecord::new(SessionId("alice_1700000000".to_string()), Some("alice".into()));
        record.push_turn(
            TurnRecord::new("Yes, $60. Wallet: 0xABCDEF0123456789ABCDEF0123456789ABCDEF01", "paid")
                .annotate("decision", "execute_payment"),
        );
        record.set_preference("preferred_network", "Sepolia");
        record.push_search(SearchRecord {
            timestamp: chrono::Utc::now(),
            term: "headphones".to_string(),
            result_count: 3,
        });

        let mut confirmed =
            PaymentAttempt::pending(Decimal::new(6000, 2), "0xABCDEF0123456789ABCDEF0123456789ABCDEF01");
        confirmed.mark_submitted("0xfeed".to_string()).expect("submit");
        confirmed.polls = 4;
        confirmed
            .transition_to(PaymentState::Confirmed { block_reference: "5123001".to_string() })
            .expect("confirm");
        record.upsert_payment_attempt(confirmed);

        let mut failed = PaymentAttempt::pending(Decimal::ONE, "0x12");
        failed.mark_failed(PaymentFailure::InvalidAddress, "too short").expect("fail");
        record.upsert_payment_attempt(failed);
        record
    }

    #[tokio::test]
    async fn sql_session_repo_round_trip_preserves_attempt_order_and_state() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let record = sample_record();

        repo.save(&record).await.expect("save session");
        let found = repo.find(&record.session_id).await.expect("find session");

        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn saving_again_updates_attempt_in_place() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let mut record =
            SessionRecord::new(SessionId("bob_1".to_string()), Some("bob".to_string()));
        let mut attempt = PaymentAttempt::pending(Decimal::new(60, 0), "0xabc");
        record.upsert_payment_attempt(attempt.clone());
        repo.save(&record).await.expect("first save");

        attempt.mark_submitted("0xfeed".to_string()).expect("submit");
        attempt.transition_to(PaymentState::TimedOut).expect("timeout");
        record.upsert_payment_attempt(attempt);
        repo.save(&record).await.expect("second save");

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payment_attempt")
            .fetch_one(&pool)
            .await
            .expect("count attempts");
        let found = repo.find(&record.session_id).await.expect("find").expect("present");

        assert_eq!(count, 1);
        assert_eq!(found.payment_attempts[0].state, PaymentState::TimedOut);
        assert_eq!(found.known_transaction_reference(), None);
    }

    #[tokio::test]
    async fn unknown_session_is_absent() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool);

        let found = repo.find(&SessionId("missing".to_string())).await.expect("query");
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn list_for_user_returns_newest_first() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool);
        let older = SessionRecord::new(SessionId("carol_1".to_string()), Some("carol".into()));
        let mut newer = SessionRecord::new(SessionId("carol_2".to_string()), Some("carol".into()));
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);
        repo.save(&older).await.expect("save older");
        repo.save(&newer).await.expect("save newer");

        let listed = repo.list_for_user("carol").await.expect("list");
        let ids: Vec<&str> = listed.iter().map(|record| record.session_id.as_str()).collect();

        assert_eq!(ids, vec!["carol_2", "carol_1"]);
    }
}
