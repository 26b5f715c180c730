//! In-Memory Key/Value Store
//!
//! Process-local [`KvStore`] with real expiry semantics. Used by unit and
//! integration tests that exercise the lock and idempotency layers without a
//! live Redis.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{KvError, KvStore};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory store with per-key expiry. Expired entries are purged lazily on
/// access, which is indistinguishable from eager expiry to callers.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        if let Some(existing) = entries.get(key) {
            if !existing.is_expired() {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        match entries.get(key) {
            Some(e) if e.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(e) => Ok(Some(e.value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries
            .lock()
            .expect("kv mutex poisoned")
            .remove(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        match entries.get(key) {
            Some(e) if !e.is_expired() && e.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_if_eq(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        match entries.get_mut(key) {
            Some(e) if !e.is_expired() && e.value == expected => {
                e.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
