//! PostgreSQL Schema
//!
//! Idempotent DDL for the four ledger tables and their enumerated types,
//! plus a minimal seed (default asset, Treasury and Revenue system wallets).
//! Every statement is safe to re-run on an initialized database.

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

/// Owner id of the seeded treasury wallet (mint source for top-ups).
pub const TREASURY_OWNER: &str = "TREASURY";
/// Owner id of the seeded revenue wallet (bonus source, purchase sink).
pub const REVENUE_OWNER: &str = "REVENUE";
/// Code of the seeded default asset.
pub const DEFAULT_ASSET_CODE: &str = "GOLD";

/// Opening treasury balance: 10,000,000 units of the default asset.
const TREASURY_OPENING_BALANCE: i64 = 10_000_000;

const CREATE_ENUMS: [&str; 4] = [
    r#"
    DO $$ BEGIN
        CREATE TYPE owner_type AS ENUM ('USER', 'SYSTEM');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE entry_type AS ENUM ('DEBIT', 'CREDIT');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE transaction_type AS ENUM ('TOPUP', 'BONUS', 'PURCHASE', 'TRANSFER');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE transaction_status AS ENUM ('PENDING', 'COMPLETED', 'FAILED', 'ROLLED_BACK');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
];

const CREATE_ASSET_TYPES: &str = r#"
CREATE TABLE IF NOT EXISTS asset_types (
    id          UUID PRIMARY KEY,
    code        TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    active      BOOLEAN NOT NULL DEFAULT TRUE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_WALLETS: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    id             UUID PRIMARY KEY,
    owner_id       TEXT NOT NULL,
    owner_type     owner_type NOT NULL,
    asset_type_id  UUID NOT NULL REFERENCES asset_types(id) ON DELETE RESTRICT,
    balance        NUMERIC(19,8) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    version        BIGINT NOT NULL DEFAULT 0 CHECK (version >= 0),
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (owner_id, owner_type, asset_type_id)
)
"#;

const CREATE_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id               UUID PRIMARY KEY,
    idempotency_key  TEXT NOT NULL UNIQUE,
    tx_type          transaction_type NOT NULL,
    status           transaction_status NOT NULL,
    metadata         JSONB,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    completed_at     TIMESTAMPTZ
)
"#;

const CREATE_LEDGER_ENTRIES: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_entries (
    id                      BIGSERIAL PRIMARY KEY,
    transaction_id          UUID NOT NULL REFERENCES transactions(id) ON DELETE RESTRICT,
    wallet_id               UUID NOT NULL REFERENCES wallets(id) ON DELETE RESTRICT,
    asset_type_id           UUID NOT NULL REFERENCES asset_types(id) ON DELETE RESTRICT,
    entry_type              entry_type NOT NULL,
    amount                  NUMERIC(19,8) NOT NULL CHECK (amount > 0),
    running_balance         NUMERIC(19,8) NOT NULL,
    counterparty_wallet_id  UUID REFERENCES wallets(id) ON DELETE RESTRICT,
    description             TEXT,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_INDICES: [&str; 2] = [
    r#"
    CREATE INDEX IF NOT EXISTS idx_ledger_entries_wallet_created
        ON ledger_entries (wallet_id, created_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_ledger_entries_transaction
        ON ledger_entries (transaction_id)
    "#,
];

/// Advisory lock key serializing concurrent schema initialization.
const SCHEMA_LOCK_KEY: i64 = 0x636f_696e_7661;

/// Create enumerated types, tables and indices. Idempotent, and safe to
/// run from several processes at once: `CREATE ... IF NOT EXISTS` still
/// races at the catalog level, so the whole pass runs under an advisory
/// lock in one transaction.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing ledger schema...");

    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    for ddl in CREATE_ENUMS {
        sqlx::query(ddl).execute(&mut *tx).await?;
    }

    sqlx::query(CREATE_ASSET_TYPES).execute(&mut *tx).await?;
    sqlx::query(CREATE_WALLETS).execute(&mut *tx).await?;
    sqlx::query(CREATE_TRANSACTIONS).execute(&mut *tx).await?;
    sqlx::query(CREATE_LEDGER_ENTRIES).execute(&mut *tx).await?;

    for ddl in CREATE_INDICES {
        sqlx::query(ddl).execute(&mut *tx).await?;
    }

    tx.commit().await?;

    tracing::info!("Ledger schema initialized");
    Ok(())
}

/// Seed the default asset and the Treasury / Revenue system wallets when
/// absent. Returns the default asset id.
pub async fn seed_minimal(pool: &PgPool) -> Result<Uuid, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO asset_types (id, code, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (code) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(DEFAULT_ASSET_CODE)
    .bind("Gold Coins")
    .execute(pool)
    .await?;

    let asset_id: Uuid = sqlx::query_scalar("SELECT id FROM asset_types WHERE code = $1")
        .bind(DEFAULT_ASSET_CODE)
        .fetch_one(pool)
        .await?;

    seed_system_wallet(pool, TREASURY_OWNER, asset_id, Decimal::from(TREASURY_OPENING_BALANCE))
        .await?;
    seed_system_wallet(pool, REVENUE_OWNER, asset_id, Decimal::ZERO).await?;

    tracing::info!(asset = DEFAULT_ASSET_CODE, "Seed data in place");
    Ok(asset_id)
}

async fn seed_system_wallet(
    pool: &PgPool,
    owner_id: &str,
    asset_id: Uuid,
    opening_balance: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO wallets (id, owner_id, owner_type, asset_type_id, balance, version)
        VALUES ($1, $2, 'SYSTEM', $3, $4, 0)
        ON CONFLICT (owner_id, owner_type, asset_type_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(owner_id)
    .bind(asset_id)
    .bind(opening_balance)
    .execute(pool)
    .await?;

    Ok(())
}
