//! Distributed Lock Manager
//!
//! Named, expiring, token-owned mutexes in the external key/value store.
//! A lock is the key `lock:<name>` holding an opaque token; only the holder
//! of the token can release or extend it, so a lock that expired and was
//! re-acquired by someone else is never clobbered by the original owner.
//!
//! The TTL is a safety net against crashed holders, not the correctness
//! mechanism: callers must finish their critical section well within it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::kv::KvStore;

const LOCK_PREFIX: &str = "lock:";

/// Token identifying one acquisition of one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        // Timestamp plus random suffix: unique per acquisition with
        // overwhelming probability, and useful when inspecting the store.
        Self(format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lock operations over the shared key/value store.
pub struct LockManager {
    kv: Arc<dyn KvStore>,
}

impl LockManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Try to acquire `name` with expiry `ttl`.
    ///
    /// Returns the owning token on success, `None` on contention. A store
    /// error is reported as `None` after a warning: to the caller an
    /// unreachable store and a held lock look the same, and the
    /// coordinator's retry budget bounds both.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> Option<LockToken> {
        let token = LockToken::generate();
        match self
            .kv
            .set_nx(&format!("{LOCK_PREFIX}{name}"), token.as_str(), ttl)
            .await
        {
            Ok(true) => Some(token),
            Ok(false) => None,
            Err(e) => {
                warn!(lock = name, error = %e, "Lock acquire failed at the store");
                None
            }
        }
    }

    /// Release `name` if it is still owned by `token`.
    ///
    /// Errors are logged and swallowed: the TTL guarantees eventual release,
    /// and failing the surrounding operation over a cleanup hiccup would
    /// turn a committed write into a spurious error.
    pub async fn release(&self, name: &str, token: &LockToken) {
        match self
            .kv
            .delete_if_eq(&format!("{LOCK_PREFIX}{name}"), token.as_str())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Already expired, or taken over after expiry. Nothing to do.
            }
            Err(e) => {
                warn!(lock = name, error = %e, "Lock release failed; TTL will reap it");
            }
        }
    }

    /// Refresh the expiry of `name` to `ttl` if still owned by `token`.
    /// Returns whether the extension took effect.
    pub async fn extend(&self, name: &str, token: &LockToken, ttl: Duration) -> bool {
        match self
            .kv
            .expire_if_eq(&format!("{LOCK_PREFIX}{name}"), token.as_str(), ttl)
            .await
        {
            Ok(extended) => extended,
            Err(e) => {
                warn!(lock = name, error = %e, "Lock extend failed at the store");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    const TTL: Duration = Duration::from_secs(30);

    fn manager() -> LockManager {
        LockManager::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn test_acquire_then_contend() {
        let locks = manager();

        let token = locks.acquire("wallet:w1", TTL).await;
        assert!(token.is_some());

        // Second acquisition of the same name must fail while held.
        assert!(locks.acquire("wallet:w1", TTL).await.is_none());

        // A different name is independent.
        assert!(locks.acquire("wallet:w2", TTL).await.is_some());
    }

    #[tokio::test]
    async fn test_release_frees_the_lock() {
        let locks = manager();

        let token = locks.acquire("wallet:w1", TTL).await.unwrap();
        locks.release("wallet:w1", &token).await;

        assert!(locks.acquire("wallet:w1", TTL).await.is_some());
    }

    #[tokio::test]
    async fn test_release_with_stale_token_is_noop() {
        let locks = manager();

        let stale = locks.acquire("wallet:w1", TTL).await.unwrap();
        locks.release("wallet:w1", &stale).await;

        // Re-acquired by a new owner; the stale token must not release it.
        let current = locks.acquire("wallet:w1", TTL).await.unwrap();
        locks.release("wallet:w1", &stale).await;
        assert!(locks.acquire("wallet:w1", TTL).await.is_none());

        locks.release("wallet:w1", &current).await;
        assert!(locks.acquire("wallet:w1", TTL).await.is_some());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_reacquired() {
        let locks = manager();

        let _token = locks
            .acquire("wallet:w1", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(locks.acquire("wallet:w1", TTL).await.is_some());
    }

    #[tokio::test]
    async fn test_extend_only_for_owner() {
        let locks = manager();

        let token = locks.acquire("wallet:w1", TTL).await.unwrap();
        assert!(locks.extend("wallet:w1", &token, TTL).await);

        let imposter = LockToken::generate();
        assert!(!locks.extend("wallet:w1", &imposter, TTL).await);
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = LockToken::generate();
        let b = LockToken::generate();
        assert_ne!(a, b);
    }
}
