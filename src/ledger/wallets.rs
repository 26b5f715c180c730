//! Wallet Repository
//!
//! Row access for wallets and the replay-reconstruction queries the
//! executor needs when the idempotency cache has been lost but the durable
//! transaction header survives.
//!
//! Balance and version mutations happen only in the double-entry writer;
//! this module reads, creates and reconstructs.

use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::amount::format_balance;
use super::error::LedgerError;
use super::types::{
    AssetTypeId, EntryType, LedgerEntry, OwnerType, TransactionId, TransactionRecord,
    TransactionResult, TransactionStatus, TransactionType, Wallet, WalletId,
};

const WALLET_COLUMNS: &str =
    "id, owner_id, owner_type::TEXT AS owner_type, asset_type_id, balance, version, created_at";

pub(crate) fn wallet_from_row(row: &PgRow) -> Result<Wallet, LedgerError> {
    let owner_type_label: String = row.try_get("owner_type")?;
    let owner_type = OwnerType::from_label(&owner_type_label)
        .ok_or_else(|| LedgerError::Database(format!("invalid owner_type: {owner_type_label}")))?;

    Ok(Wallet {
        id: row.try_get::<Uuid, _>("id")?.into(),
        owner_id: row.try_get("owner_id")?,
        owner_type,
        asset_type_id: row.try_get::<Uuid, _>("asset_type_id")?.into(),
        balance: row.try_get("balance")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Fetch a wallet by id, constrained to the operation's asset. A wallet of
/// the wrong asset is indistinguishable from a missing one by design:
/// amounts never cross asset types.
pub(crate) async fn fetch_wallet_for_update(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: WalletId,
    asset_type_id: AssetTypeId,
) -> Result<Option<Wallet>, LedgerError> {
    let row = sqlx::query(&format!(
        "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1 AND asset_type_id = $2"
    ))
    .bind(wallet_id.as_uuid())
    .bind(asset_type_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref().map(wallet_from_row).transpose()
}

/// Fetch a wallet by id from the pool (reads outside the engine's
/// serializable transaction: seeding, tests, reconstruction).
pub async fn get_wallet(pool: &PgPool, wallet_id: WalletId) -> Result<Option<Wallet>, LedgerError> {
    let row = sqlx::query(&format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1"))
        .bind(wallet_id.as_uuid())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(wallet_from_row).transpose()
}

/// Look up a system wallet (Treasury, Revenue) for an asset.
pub async fn system_wallet(
    pool: &PgPool,
    owner_id: &str,
    asset_type_id: AssetTypeId,
) -> Result<Option<Wallet>, LedgerError> {
    let row = sqlx::query(&format!(
        "SELECT {WALLET_COLUMNS} FROM wallets
         WHERE owner_id = $1 AND owner_type = 'SYSTEM' AND asset_type_id = $2"
    ))
    .bind(owner_id)
    .bind(asset_type_id.as_uuid())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(wallet_from_row).transpose()
}

/// Get or create the wallet for a user/asset pair.
///
/// This is the auto-creation step the request façade performs before the
/// executor runs; the executor itself only ever sees wallets by id. The
/// insert races benignly: on conflict the existing row is returned.
pub async fn get_or_create_user_wallet(
    pool: &PgPool,
    owner_id: &str,
    asset_type_id: AssetTypeId,
) -> Result<Wallet, LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO wallets (id, owner_id, owner_type, asset_type_id, balance, version)
        VALUES ($1, $2, 'USER', $3, 0, 0)
        ON CONFLICT (owner_id, owner_type, asset_type_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(owner_id)
    .bind(asset_type_id.as_uuid())
    .execute(pool)
    .await?;

    let row = sqlx::query(&format!(
        "SELECT {WALLET_COLUMNS} FROM wallets
         WHERE owner_id = $1 AND owner_type = 'USER' AND asset_type_id = $2"
    ))
    .bind(owner_id)
    .bind(asset_type_id.as_uuid())
    .fetch_one(pool)
    .await?;

    wallet_from_row(&row)
}

/// Fetch a transaction header by its idempotency key.
pub async fn transaction_by_key(
    pool: &PgPool,
    idempotency_key: &str,
) -> Result<Option<TransactionRecord>, LedgerError> {
    let row = sqlx::query(
        "SELECT id, idempotency_key, tx_type::TEXT AS tx_type, status::TEXT AS status,
                metadata, created_at, completed_at
         FROM transactions WHERE idempotency_key = $1",
    )
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let tx_type_label: String = row.try_get("tx_type")?;
    let tx_type = TransactionType::from_label(&tx_type_label)
        .ok_or_else(|| LedgerError::Database(format!("invalid tx_type: {tx_type_label}")))?;
    let status_label: String = row.try_get("status")?;
    let status = TransactionStatus::from_label(&status_label)
        .ok_or_else(|| LedgerError::Database(format!("invalid status: {status_label}")))?;

    Ok(Some(TransactionRecord {
        id: row.try_get::<Uuid, _>("id")?.into(),
        idempotency_key: row.try_get("idempotency_key")?,
        tx_type,
        status,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    }))
}

/// Fetch the ledger entries anchored by a transaction header.
pub async fn entries_for_transaction(
    pool: &PgPool,
    transaction_id: TransactionId,
) -> Result<Vec<LedgerEntry>, LedgerError> {
    let rows = sqlx::query(
        "SELECT id, transaction_id, wallet_id, asset_type_id,
                entry_type::TEXT AS entry_type, amount, running_balance,
                counterparty_wallet_id, description, created_at
         FROM ledger_entries
         WHERE transaction_id = $1
         ORDER BY created_at, id",
    )
    .bind(transaction_id.as_uuid())
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let label: String = row.try_get("entry_type")?;
        let entry_type = EntryType::from_label(&label)
            .ok_or_else(|| LedgerError::Database(format!("invalid entry_type: {label}")))?;

        entries.push(LedgerEntry {
            id: row.try_get("id")?,
            transaction_id: row.try_get::<Uuid, _>("transaction_id")?.into(),
            wallet_id: row.try_get::<Uuid, _>("wallet_id")?.into(),
            asset_type_id: row.try_get::<Uuid, _>("asset_type_id")?.into(),
            entry_type,
            amount: row.try_get("amount")?,
            running_balance: row.try_get("running_balance")?,
            counterparty_wallet_id: row
                .try_get::<Option<Uuid>, _>("counterparty_wallet_id")?
                .map(Into::into),
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
        });
    }

    Ok(entries)
}

/// Rebuild the result of a completed transaction from its durable rows.
///
/// Used when a replayed request misses the idempotency cache and collides
/// with the unique index on `transactions.idempotency_key`: if a COMPLETED
/// header exists, the original result is recovered from the header and its
/// two ledger entries (credit = destination, debit = source).
pub async fn reconstruct_result(
    pool: &PgPool,
    idempotency_key: &str,
) -> Result<Option<TransactionResult>, LedgerError> {
    let Some(header) = transaction_by_key(pool, idempotency_key).await? else {
        return Ok(None);
    };
    if header.status != TransactionStatus::Completed {
        return Ok(None);
    }

    let mut from_balance: Option<Decimal> = None;
    let mut to_balance: Option<Decimal> = None;
    for entry in entries_for_transaction(pool, header.id).await? {
        match entry.entry_type {
            EntryType::Debit => from_balance = Some(entry.running_balance),
            EntryType::Credit => to_balance = Some(entry.running_balance),
        }
    }

    let Some(to_balance) = to_balance else {
        // A committed header without a credit entry cannot exist.
        return Err(LedgerError::Database(format!(
            "transaction {} has no credit entry",
            header.id
        )));
    };

    Ok(Some(TransactionResult {
        transaction_id: header.id,
        status: TransactionStatus::Completed,
        from_balance: from_balance.map(format_balance),
        to_balance: Some(format_balance(to_balance)),
        error: None,
    }))
}
