//! Key/Value Store Abstraction
//!
//! The lock manager and the idempotency store both run against an external
//! key/value store that every process instance can reach. This module defines
//! the small set of primitives they need, so the engine itself stays
//! store-agnostic: production uses Redis, tests use the in-memory store.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryKvStore;
pub use self::redis::RedisKvStore;

/// Error from the key/value store (connectivity, protocol).
#[derive(Debug, Error, Clone)]
#[error("kv store error: {0}")]
pub struct KvError(pub String);

impl From<::redis::RedisError> for KvError {
    fn from(e: ::redis::RedisError) -> Self {
        KvError(e.to_string())
    }
}

/// Minimal key/value operations shared by locks and idempotency records.
///
/// All mutating conditional operations are atomic on the store side: the
/// compare-and-delete / compare-and-expire guards are what make lock tokens
/// safe against releasing a lock that has already expired and been
/// re-acquired by another owner.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set `key` to `value` with expiry `ttl`, overwriting any prior value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Set `key` to `value` with expiry `ttl`, only if the key is absent.
    /// Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Read the current value of `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Delete `key` unconditionally. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Delete `key` only if its current value equals `expected`.
    /// Returns whether a deletion happened.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, KvError>;

    /// Refresh the expiry of `key` to `ttl` only if its current value equals
    /// `expected`. Returns whether the expiry was refreshed.
    async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration)
        -> Result<bool, KvError>;
}
