use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use purser_core::domain::session::SessionId;

/// One async mutex per session id. Different sessions never contend.
///
/// Entries nobody holds or waits on are dropped on the next `acquire`, so a
/// long-running process keeps only the sessions currently in use.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub async fn acquire(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(session_id.0.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use purser_core::domain::session::SessionId;

    use super::SessionLocks;

    #[tokio::test]
    async fn same_session_is_serialized() {
        let locks = Arc::new(SessionLocks::default());
        let session = SessionId("alice_1".to_string());
        let guard = locks.acquire(&session).await;

        let contender = {
            let locks = locks.clone();
            let session = session.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&session).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished(), "second writer must wait for the first");

        drop(guard);
        contender.await.expect("contender completes once released");
    }

    #[tokio::test]
    async fn different_sessions_do_not_contend() {
        let locks = SessionLocks::default();
        let _first = locks.acquire(&SessionId("alice_1".to_string())).await;

        let second = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(&SessionId("bob_1".to_string())),
        )
        .await;

        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn released_sessions_are_forgotten() {
        let locks = SessionLocks::default();
        let held = locks.acquire(&SessionId("alice_1".to_string())).await;
        drop(locks.acquire(&SessionId("bob_1".to_string())).await);
        assert_eq!(locks.tracked(), 2);

        let _carol = locks.acquire(&SessionId("carol_1".to_string())).await;
        assert_eq!(locks.tracked(), 2, "bob's idle lock is pruned, alice's held lock is kept");

        drop(held);
        let _alice = locks.acquire(&SessionId("alice_1".to_string())).await;
        assert_eq!(locks.tracked(), 2);
    }
}
