//! Ledger Core Types
//!
//! Identifiers, enumerations and row types for the double-entry ledger.
//! Enum values are stored in PostgreSQL as enumerated types whose labels
//! match `as_str`, so every variant round-trips through its label.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wallet identifier (UUID v4).
///
/// The lowercase hyphenated rendering is the canonical textual form: the
/// ordered-lock coordinator sorts these strings bytewise, so the rendering
/// must be identical across all processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(Uuid);

/// Asset type identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetTypeId(Uuid);

/// Transaction header identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

macro_rules! uuid_id {
    ($name:ident) => {
        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Uuid renders lowercase hyphenated, the canonical form.
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(WalletId);
uuid_id!(AssetTypeId);
uuid_id!(TransactionId);

/// Who owns a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OwnerType {
    User,
    System,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::User => "USER",
            OwnerType::System => "SYSTEM",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(OwnerType::User),
            "SYSTEM" => Some(OwnerType::System),
            _ => None,
        }
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a ledger entry relative to its wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "DEBIT",
            EntryType::Credit => "CREDIT",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "DEBIT" => Some(EntryType::Debit),
            "CREDIT" => Some(EntryType::Credit),
            _ => None,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business kind of a transaction.
///
/// `Transfer` is reserved in the schema; no operation constructs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Topup,
    Bonus,
    Purchase,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Topup => "TOPUP",
            TransactionType::Bonus => "BONUS",
            TransactionType::Purchase => "PURCHASE",
            TransactionType::Transfer => "TRANSFER",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "TOPUP" => Some(TransactionType::Topup),
            "BONUS" => Some(TransactionType::Bonus),
            "PURCHASE" => Some(TransactionType::Purchase),
            "TRANSFER" => Some(TransactionType::Transfer),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a transaction header.
///
/// The engine only ever writes `Completed`; `Pending`, `Failed` and
/// `RolledBack` are reserved for future extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    RolledBack,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionStatus::Pending),
            "COMPLETED" => Some(TransactionStatus::Completed),
            "FAILED" => Some(TransactionStatus::Failed),
            "ROLLED_BACK" => Some(TransactionStatus::RolledBack),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wallet row: the `(owner, asset)` balance record.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub id: WalletId,
    pub owner_id: String,
    pub owner_type: OwnerType,
    pub asset_type_id: AssetTypeId,
    pub balance: Decimal,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// Immutable, append-only ledger entry.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: i64,
    pub transaction_id: TransactionId,
    pub wallet_id: WalletId,
    pub asset_type_id: AssetTypeId,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub running_balance: Decimal,
    pub counterparty_wallet_id: Option<WalletId>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Transaction header row: anchors exactly two ledger entries.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub idempotency_key: String,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A ledger operation request with pre-resolved wallets.
///
/// `from_wallet_id` is absent only for a pure mint; the standard flows
/// (top-up, bonus, purchase) always carry both sides, with treasury and
/// revenue modelled as real system wallets.
#[derive(Debug, Clone)]
pub struct LedgerOperation {
    pub from_wallet_id: Option<WalletId>,
    pub to_wallet_id: WalletId,
    pub asset_type_id: AssetTypeId,
    pub amount: Decimal,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Result returned to callers and persisted under the idempotency key.
///
/// Balance fields are normalized decimal strings so a replayed request gets
/// a byte-identical response. A completed result always carries
/// `to_balance`; a cached failure record carries `error` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_label_roundtrip() {
        for t in [
            TransactionType::Topup,
            TransactionType::Bonus,
            TransactionType::Purchase,
            TransactionType::Transfer,
        ] {
            assert_eq!(TransactionType::from_label(t.as_str()), Some(t));
        }
        for s in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::RolledBack,
        ] {
            assert_eq!(TransactionStatus::from_label(s.as_str()), Some(s));
        }
        assert_eq!(EntryType::from_label("DEBIT"), Some(EntryType::Debit));
        assert_eq!(OwnerType::from_label("SYSTEM"), Some(OwnerType::System));
        assert_eq!(OwnerType::from_label("ADMIN"), None);
    }

    #[test]
    fn test_wallet_id_canonical_form_is_lowercase() {
        let id: WalletId = "A7F4D9E2-0C31-4B6A-9D58-1E2F3A4B5C6D".parse().unwrap();
        assert_eq!(id.to_string(), "a7f4d9e2-0c31-4b6a-9d58-1e2f3a4b5c6d");
    }

    #[test]
    fn test_wallet_id_ordering_is_stable_across_renderings() {
        let a: WalletId = "00000000-0000-4000-8000-000000000001".parse().unwrap();
        let b: WalletId = "00000000-0000-4000-8000-000000000002".parse().unwrap();
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn test_result_wire_format() {
        let result = TransactionResult {
            transaction_id: "7b1e9f00-3c21-4a4d-8a15-6f0e9d8c7b6a".parse().unwrap(),
            status: TransactionStatus::Completed,
            from_balance: Some("9999900".to_string()),
            to_balance: Some("10100".to_string()),
            error: None,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json["transactionId"],
            "7b1e9f00-3c21-4a4d-8a15-6f0e9d8c7b6a"
        );
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["fromBalance"], "9999900");
        assert_eq!(json["toBalance"], "10100");
        assert!(json.get("error").is_none());

        let back: TransactionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_failed_result_wire_format() {
        let result = TransactionResult {
            transaction_id: TransactionId::new(),
            status: TransactionStatus::Failed,
            from_balance: None,
            to_balance: None,
            error: Some("INSUFFICIENT_BALANCE".to_string()),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["error"], "INSUFFICIENT_BALANCE");
        assert!(json.get("fromBalance").is_none());
        assert!(json.get("toBalance").is_none());
    }
}
