use async_trait::async_trait;
use thiserror::Error;

use purser_core::domain::session::{SessionId, SessionRecord};

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of session records. `save` replaces the whole record.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, id: &SessionId) -> Result<Option<SessionRecord>, RepositoryError>;

    async fn save(&self, record: &SessionRecord) -> Result<(), RepositoryError>;

    /// Sessions belonging to `user_id`, most recently updated first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SessionRecord>, RepositoryError>;
}
