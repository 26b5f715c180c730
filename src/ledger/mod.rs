//! Transaction Engine
//!
//! The double-entry ledger core: deduplicates by idempotency key,
//! serializes contending requests with ordered distributed locks, and
//! writes balanced debit/credit entries plus compare-and-swap balance
//! updates inside one serializable database transaction.

pub mod amount;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod idempotency;
pub mod lock;
pub mod types;
pub mod wallets;
pub mod writer;

pub use coordinator::{LockPolicy, OrderedLockCoordinator};
pub use error::LedgerError;
pub use executor::{DbTimeouts, TransactionExecutor};
pub use idempotency::{IdempotencyStore, IdempotencyTtls};
pub use lock::{LockManager, LockToken};
pub use types::{
    AssetTypeId, EntryType, LedgerEntry, LedgerOperation, OwnerType, TransactionId,
    TransactionRecord, TransactionResult, TransactionStatus, TransactionType, Wallet, WalletId,
};
