//! Double-Entry Writer
//!
//! Runs inside the serializable database transaction the executor opened.
//! For one operation it reads both wallet rows, validates the balance,
//! appends the credit and debit ledger entries with running balances, and
//! performs compare-and-swap updates on each wallet's balance+version.
//!
//! Any failure aborts the enclosing transaction, so a committed transaction
//! always carries the header, both entries and both updated wallet rows, or
//! nothing at all.
//!
//! The wallet lock, serializable isolation and the version CAS are
//! deliberately redundant layers; all three must stay.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use tracing::debug;

use super::amount::ensure_valid;
use super::error::LedgerError;
use super::types::{EntryType, LedgerOperation, TransactionId, Wallet, WalletId};
use super::wallets::fetch_wallet_for_update;

/// Balances after a committed double-entry write.
#[derive(Debug, Clone, Copy)]
pub struct EntryOutcome {
    /// New source balance; absent for a pure mint without a source wallet.
    pub from_balance: Option<Decimal>,
    /// New destination balance.
    pub to_balance: Decimal,
}

/// Append the balanced entries for `op` and update both wallets.
///
/// `transaction_id` must reference a header row already inserted in this
/// same transaction.
pub async fn write_double_entry(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: TransactionId,
    op: &LedgerOperation,
) -> Result<EntryOutcome, LedgerError> {
    // Amount validity is enforced upstream; re-checked here because this is
    // the last gate before rows are written.
    ensure_valid(op.amount)?;

    // Read the wallet rows. The source is read only when the operation has
    // one; the asset constraint makes a wrong-asset wallet a missing one.
    let from = match op.from_wallet_id {
        Some(from_id) => Some(
            fetch_wallet_for_update(tx, from_id, op.asset_type_id)
                .await?
                .ok_or(LedgerError::SourceWalletNotFound(from_id))?,
        ),
        None => None,
    };

    let to = fetch_wallet_for_update(tx, op.to_wallet_id, op.asset_type_id)
        .await?
        .ok_or(LedgerError::DestinationWalletNotFound(op.to_wallet_id))?;

    if let Some(from) = &from {
        if from.balance < op.amount {
            debug!(
                wallet = %from.id,
                balance = %from.balance,
                amount = %op.amount,
                "Rejecting overdraw"
            );
            return Err(LedgerError::InsufficientBalance);
        }
    }

    let new_to = to.balance + op.amount;
    let new_from = from.as_ref().map(|w| w.balance - op.amount);

    // Both entries carry the same timestamp; they are two halves of one
    // movement.
    let entry_at = Utc::now();

    append_entry(
        tx,
        transaction_id,
        &to,
        EntryType::Credit,
        op,
        new_to,
        op.from_wallet_id,
        entry_at,
    )
    .await?;

    if let (Some(from), Some(new_from)) = (&from, new_from) {
        append_entry(
            tx,
            transaction_id,
            from,
            EntryType::Debit,
            op,
            new_from,
            Some(op.to_wallet_id),
            entry_at,
        )
        .await?;
    }

    if let (Some(from), Some(new_from)) = (&from, new_from) {
        if !cas_update_wallet(tx, from, new_from).await? {
            return Err(LedgerError::ConcurrentModificationSource);
        }
    }

    if !cas_update_wallet(tx, &to, new_to).await? {
        return Err(LedgerError::ConcurrentModificationDestination);
    }

    debug!(
        transaction_id = %transaction_id,
        to_wallet = %op.to_wallet_id,
        amount = %op.amount,
        "Double entry written"
    );

    Ok(EntryOutcome {
        from_balance: new_from,
        to_balance: new_to,
    })
}

#[allow(clippy::too_many_arguments)]
async fn append_entry(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: TransactionId,
    wallet: &Wallet,
    entry_type: EntryType,
    op: &LedgerOperation,
    running_balance: Decimal,
    counterparty: Option<WalletId>,
    entry_at: chrono::DateTime<Utc>,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries
            (transaction_id, wallet_id, asset_type_id, entry_type, amount,
             running_balance, counterparty_wallet_id, description, created_at)
        VALUES ($1, $2, $3, $4::entry_type, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(transaction_id.as_uuid())
    .bind(wallet.id.as_uuid())
    .bind(op.asset_type_id.as_uuid())
    .bind(entry_type.as_str())
    .bind(op.amount)
    .bind(running_balance)
    .bind(counterparty.map(|c| c.as_uuid()))
    .bind(op.description.as_deref())
    .bind(entry_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Write the new balance and bump the version, guarded by the version read
/// at the start of the transaction. Zero rows affected means another writer
/// got there first (lock expiry, rogue writer); the caller maps that to the
/// appropriate concurrent-modification error.
async fn cas_update_wallet(
    tx: &mut Transaction<'_, Postgres>,
    wallet: &Wallet,
    new_balance: Decimal,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        r#"
        UPDATE wallets
        SET balance = $1, version = version + 1, updated_at = now()
        WHERE id = $2 AND version = $3
        "#,
    )
    .bind(new_balance)
    .bind(wallet.id.as_uuid())
    .bind(wallet.version)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}
