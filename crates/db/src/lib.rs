pub mod connection;
pub mod locks;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{connect, DbPool};
pub use locks::SessionLocks;
pub use repositories::{
    InMemorySessionRepository, RepositoryError, SessionRepository, SqlSessionRepository,
};
pub use store::{SessionStore, StoreError, UserHistoryEntry};
