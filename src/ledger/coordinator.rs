//! Ordered-Lock Coordinator
//!
//! Acquires the locks for a set of wallets in canonical order, runs the
//! caller's work, and releases them in reverse order. The canonical order
//! is bytewise lexicographic on the wallet id's textual form, identical in
//! every process, so two requests contending on the same wallets always
//! acquire in the same sequence and can never form a deadlock cycle.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::LedgerError;
use super::lock::{LockManager, LockToken};
use super::types::WalletId;

/// Retry and TTL policy for wallet lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockPolicy {
    /// Expiry of each wallet lock. Default 30 s.
    pub ttl: Duration,
    /// Full-set acquisition retries after the initial attempt. Default 3.
    pub max_retries: u32,
    /// First backoff delay; doubles per retry (100 ms, 200 ms, 400 ms).
    pub backoff_base: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
        }
    }
}

/// Ceiling on the exponential backoff between acquisition attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Coordinates multi-wallet critical sections over the lock manager.
pub struct OrderedLockCoordinator {
    locks: LockManager,
    policy: LockPolicy,
}

impl OrderedLockCoordinator {
    pub fn new(locks: LockManager, policy: LockPolicy) -> Self {
        Self { locks, policy }
    }

    /// Run `work` while holding the locks for every wallet in `wallet_ids`.
    ///
    /// Acquisition is all-or-nothing: if any lock in the sorted sequence is
    /// unavailable, every lock already held is released before backing off,
    /// so partial holds never extend contention windows. After the retry
    /// budget is exhausted the call fails with `LOCK_UNAVAILABLE` and `work`
    /// is never invoked.
    pub async fn with_wallet_locks<T, F, Fut>(
        &self,
        wallet_ids: &[WalletId],
        work: F,
    ) -> Result<T, LedgerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let names = canonical_lock_names(wallet_ids);

        let mut attempt = 0;
        let mut backoff = self.policy.backoff_base;
        let held = loop {
            if let Some(held) = self.acquire_all(&names).await {
                break held;
            }
            if attempt >= self.policy.max_retries {
                debug!(locks = names.len(), attempts = attempt + 1, "Lock budget exhausted");
                return Err(LedgerError::LockUnavailable);
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
            attempt += 1;
        };

        // No early return between here and the release loop: the work's
        // outcome is captured and the locks come off in every path.
        let result = work().await;

        for (name, token) in held.iter().rev() {
            self.locks.release(name, token).await;
        }

        result
    }

    /// Acquire every lock in `names`, in order. On the first unavailable
    /// lock, release the ones already held (reverse order) and report the
    /// whole attempt as failed.
    async fn acquire_all(&self, names: &[String]) -> Option<Vec<(String, LockToken)>> {
        let mut held: Vec<(String, LockToken)> = Vec::with_capacity(names.len());

        for name in names {
            match self.locks.acquire(name, self.policy.ttl).await {
                Some(token) => held.push((name.clone(), token)),
                None => {
                    debug!(lock = %name, "Contention; releasing partial acquisition");
                    for (held_name, token) in held.iter().rev() {
                        self.locks.release(held_name, token).await;
                    }
                    return None;
                }
            }
        }

        Some(held)
    }
}

/// Sorted, deduplicated lock names for a wallet set.
fn canonical_lock_names(wallet_ids: &[WalletId]) -> Vec<String> {
    let mut names: Vec<String> = wallet_ids
        .iter()
        .map(|id| format!("wallet:{id}"))
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKvStore};
    use std::sync::Arc;

    fn coordinator(kv: Arc<dyn KvStore>) -> OrderedLockCoordinator {
        // Tight backoff keeps the retry-exhaustion tests fast.
        OrderedLockCoordinator::new(
            LockManager::new(kv),
            LockPolicy {
                ttl: Duration::from_secs(5),
                max_retries: 3,
                backoff_base: Duration::from_millis(5),
            },
        )
    }

    fn wallet(n: u8) -> WalletId {
        format!("00000000-0000-4000-8000-0000000000{n:02x}")
            .parse()
            .unwrap()
    }

    #[test]
    fn test_canonical_order_is_sorted_and_deduplicated() {
        let a = wallet(1);
        let b = wallet(2);

        let names = canonical_lock_names(&[b, a, b]);
        assert_eq!(
            names,
            vec![format!("wallet:{a}"), format!("wallet:{b}")]
        );
    }

    #[tokio::test]
    async fn test_runs_work_and_releases() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let coord = coordinator(kv.clone());

        let out = coord
            .with_wallet_locks(&[wallet(1), wallet(2)], || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(out, 42);

        // Both locks must be free again.
        let locks = LockManager::new(kv);
        assert!(locks
            .acquire(&format!("wallet:{}", wallet(1)), Duration::from_secs(1))
            .await
            .is_some());
        assert!(locks
            .acquire(&format!("wallet:{}", wallet(2)), Duration::from_secs(1))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_releases_on_work_error() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let coord = coordinator(kv.clone());

        let result: Result<(), _> = coord
            .with_wallet_locks(&[wallet(1)], || async {
                Err(LedgerError::InsufficientBalance)
            })
            .await;
        assert!(matches!(result, Err(LedgerError::InsufficientBalance)));

        let locks = LockManager::new(kv);
        assert!(locks
            .acquire(&format!("wallet:{}", wallet(1)), Duration::from_secs(1))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_fails_lock_unavailable_when_held_elsewhere() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let coord = coordinator(kv.clone());

        // Another owner holds wallet 2 for the whole test.
        let foreign = LockManager::new(kv);
        let _held = foreign
            .acquire(&format!("wallet:{}", wallet(2)), Duration::from_secs(30))
            .await
            .unwrap();

        let result: Result<(), _> = coord
            .with_wallet_locks(&[wallet(1), wallet(2)], || async {
                panic!("work must not run without all locks")
            })
            .await;
        assert!(matches!(result, Err(LedgerError::LockUnavailable)));

        // The partial hold on wallet 1 must have been released every attempt.
        assert!(foreign
            .acquire(&format!("wallet:{}", wallet(1)), Duration::from_secs(1))
            .await
            .is_some());
    }

    /// Deterministic pseudo-random sequence for load generation.
    struct Lcg(u64);

    impl Lcg {
        fn new(seed: u64) -> Self {
            Self(seed)
        }

        fn pick(&mut self, bound: usize) -> usize {
            self.0 = self.0.wrapping_mul(0x5DEECE66D).wrapping_add(0xB);
            // Skip the low bits; LCG low bits cycle with short periods.
            (self.0 >> 16) as usize % bound
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overlapping_sets_all_terminate() {
        // Deadlock-freedom: 64 workers keep locking random wallet pairs, in
        // user-supplied (unsorted) order, for five sustained seconds. Every
        // worker must terminate; no cyclic wait can form.
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let coord = Arc::new(OrderedLockCoordinator::new(
            LockManager::new(kv),
            LockPolicy {
                ttl: Duration::from_secs(5),
                max_retries: 20,
                backoff_base: Duration::from_millis(1),
            },
        ));

        let pool = [wallet(1), wallet(2), wallet(3), wallet(4)];
        let deadline = std::time::Instant::now() + Duration::from_secs(5);

        let mut tasks = tokio::task::JoinSet::new();
        for worker in 0..64u64 {
            let coord = coord.clone();
            tasks.spawn(async move {
                let mut rng = Lcg::new(0x5eed + worker);
                let mut completed = 0u64;
                while std::time::Instant::now() < deadline {
                    // Random pair, deliberately unsorted; may collapse to a
                    // single wallet, which the coordinator deduplicates.
                    let a = pool[rng.pick(pool.len())];
                    let b = pool[rng.pick(pool.len())];
                    let outcome = coord
                        .with_wallet_locks(&[b, a], || async {
                            tokio::time::sleep(Duration::from_micros(100)).await;
                            Ok(())
                        })
                        .await;
                    match outcome {
                        Ok(()) => completed += 1,
                        Err(LedgerError::LockUnavailable) => {}
                        Err(e) => panic!("unexpected coordinator error: {e:?}"),
                    }
                }
                completed
            });
        }

        let completed = tokio::time::timeout(Duration::from_secs(60), async {
            let mut total = 0u64;
            let mut workers = 0;
            while let Some(joined) = tasks.join_next().await {
                total += joined.unwrap();
                workers += 1;
            }
            (workers, total)
        })
        .await
        .expect("coordinator deadlocked or livelocked");

        assert_eq!(completed.0, 64, "every worker must terminate");
        assert!(completed.1 > 0, "sustained load must make progress");
    }
}
