//! Bounded per-session memory with synchronous persistence.
//!
//! Every mutation runs under the session's lock as load, apply, persist. The
//! persisted copy is only replaced by a save that succeeded, so a failed write
//! leaves the previous record intact rather than a half-applied one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use purser_core::domain::payment::PaymentAttempt;
use purser_core::domain::session::{SearchRecord, SessionId, SessionRecord, TurnRecord};
use purser_core::errors::ApplicationError;
use purser_core::payment::{JournalError, PaymentJournal};

use crate::locks::SessionLocks;
use crate::repositories::{RepositoryError, SessionRepository};

const HISTORY_EXCERPT_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session `{session_id}` could not be loaded: {source}")]
    Load {
        session_id: String,
        #[source]
        source: RepositoryError,
    },
    #[error("session `{session_id}` was not persisted after {attempts} attempt(s): {source}")]
    Persistence {
        session_id: String,
        attempts: u32,
        #[source]
        source: RepositoryError,
    },
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserHistoryEntry {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub request_text: String,
    pub response_excerpt: String,
}

pub struct SessionStore {
    repository: Arc<dyn SessionRepository>,
    active_sessions: Mutex<HashMap<String, SessionId>>,
    locks: SessionLocks,
    persist_retries: u32,
}

impl SessionStore {
    pub fn new(repository: Arc<dyn SessionRepository>, persist_retries: u32) -> Self {
        Self {
            repository,
            active_sessions: Mutex::new(HashMap::new()),
            locks: SessionLocks::default(),
            persist_retries,
        }
    }

    /// Resolves the session for `user_id`, creating and persisting it if needed.
    ///
    /// An existing mapping wins when its record still exists; otherwise the
    /// hint is used. Without a hint the user's most recently updated stored
    /// session is resumed, so a new process keeps the same negotiation. Only a
    /// user with no stored session gets an id derived from the user and clock.
    pub async fn get_or_create(
        &self,
        user_id: &str,
        hint: Option<SessionId>,
    ) -> Result<SessionId, StoreError> {
        if let Some(mapped) = self.mapped_session(user_id) {
            if self.load(&mapped).await?.is_some() {
                return Ok(mapped);
            }
        }

        if hint.is_none() {
            if let Some(stored) = self.latest_stored_session(user_id).await? {
                debug!(
                    event_name = "memory.session.resumed",
                    session_id = %stored,
                    user_id,
                    "resumed stored session"
                );
                self.remember_session(user_id, &stored);
                return Ok(stored);
            }
        }

        let session_id = hint.unwrap_or_else(|| SessionId::for_user(user_id, Utc::now()));
        {
            let _guard = self.locks.acquire(&session_id).await;
            if self.load(&session_id).await?.is_none() {
                let record = SessionRecord::new(session_id.clone(), Some(user_id.to_owned()));
                self.persist(&record).await?;
                debug!(
                    event_name = "memory.session.created",
                    session_id = %session_id,
                    user_id,
                    "session record created"
                );
            }
        }

        self.remember_session(user_id, &session_id);
        Ok(session_id)
    }

    /// Current record for `session_id`; an unknown id reads as an empty record.
    pub async fn read(&self, session_id: &SessionId) -> Result<SessionRecord, StoreError> {
        Ok(self
            .load(session_id)
            .await?
            .unwrap_or_else(|| SessionRecord::new(session_id.clone(), None)))
    }

    pub async fn append_turn(
        &self,
        session_id: &SessionId,
        request_text: &str,
        response_text: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let turn = TurnRecord {
            timestamp: Utc::now(),
            request_text: request_text.to_owned(),
            response_text: response_text.to_owned(),
            annotations,
        };
        self.mutate(session_id, |record| record.push_turn(turn)).await.map(drop)
    }

    pub async fn record_payment_attempt(
        &self,
        session_id: &SessionId,
        attempt: &PaymentAttempt,
    ) -> Result<(), StoreError> {
        let attempt = attempt.clone();
        self.mutate(session_id, |record| record.upsert_payment_attempt(attempt)).await.map(drop)
    }

    pub async fn set_preference(
        &self,
        session_id: &SessionId,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.mutate(session_id, |record| record.set_preference(key, value)).await.map(drop)
    }

    pub async fn record_search(
        &self,
        session_id: &SessionId,
        term: &str,
        result_count: u32,
    ) -> Result<(), StoreError> {
        let search = SearchRecord { timestamp: Utc::now(), term: term.to_owned(), result_count };
        self.mutate(session_id, |record| record.push_search(search)).await.map(drop)
    }

    /// Most recent turns across all of a user's sessions, newest first.
    pub async fn user_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<UserHistoryEntry>, StoreError> {
        let records = self.repository.list_for_user(user_id).await.map_err(|source| {
            StoreError::Load { session_id: format!("user:{user_id}"), source }
        })?;

        let mut entries: Vec<UserHistoryEntry> = records
            .into_iter()
            .flat_map(|record| {
                let session_id = record.session_id;
                record.conversation_history.into_iter().map(move |turn| UserHistoryEntry {
                    session_id: session_id.clone(),
                    timestamp: turn.timestamp,
                    request_text: turn.request_text,
                    response_excerpt: turn.response_text.chars().take(HISTORY_EXCERPT_CHARS).collect(),
                })
            })
            .collect();
        entries.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn latest_stored_session(&self, user_id: &str) -> Result<Option<SessionId>, StoreError> {
        let records = self.repository.list_for_user(user_id).await.map_err(|source| {
            StoreError::Load { session_id: format!("user:{user_id}"), source }
        })?;
        Ok(records.into_iter().next().map(|record| record.session_id))
    }

    async fn mutate<F>(&self, session_id: &SessionId, apply: F) -> Result<SessionRecord, StoreError>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let _guard = self.locks.acquire(session_id).await;
        let mut record = self
            .load(session_id)
            .await?
            .unwrap_or_else(|| SessionRecord::new(session_id.clone(), None));
        apply(&mut record);
        self.persist(&record).await?;
        Ok(record)
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        self.repository
            .find(session_id)
            .await
            .map_err(|source| StoreError::Load { session_id: session_id.0.clone(), source })
    }

    async fn persist(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let attempts = self.persist_retries + 1;
        let mut attempt = 1;
        loop {
            match self.repository.save(record).await {
                Ok(()) => return Ok(()),
                Err(source) if attempt >= attempts => {
                    warn!(
                        event_name = "memory.persist.failed",
                        session_id = %record.session_id,
                        attempts,
                        error = %source,
                        "session write failed, keeping previous record"
                    );
                    return Err(StoreError::Persistence {
                        session_id: record.session_id.0.clone(),
                        attempts,
                        source,
                    });
                }
                Err(source) => {
                    warn!(
                        event_name = "memory.persist.retry",
                        session_id = %record.session_id,
                        attempt,
                        error = %source,
                        "session write failed, retrying"
                    );
                    attempt += 1;
                }
            }
        }
    }

    fn mapped_session(&self, user_id: &str) -> Option<SessionId> {
        let sessions = match self.active_sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.get(user_id).cloned()
    }

    fn remember_session(&self, user_id: &str, session_id: &SessionId) {
        let mut sessions = match self.active_sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.insert(user_id.to_owned(), session_id.clone());
    }
}

#[async_trait]
impl PaymentJournal for SessionStore {
    async fn record_payment_attempt(
        &self,
        session_id: &SessionId,
        attempt: &PaymentAttempt,
    ) -> Result<(), JournalError> {
        SessionStore::record_payment_attempt(self, session_id, attempt)
            .await
            .map_err(|error| JournalError(error.to_string()))
    }
}
