use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    CharityContribution, EventStore, FarmEventRecord, FeedItem, PersistenceError, PriceSample,
    Result, SwapEventRecord, TransferRecord,
};

/// Schema for the event ledger. Amounts are NUMERIC(78, 0) so any uint256 fits.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sync_state (
        id SMALLINT PRIMARY KEY CHECK (id = 1),
        last_block BIGINT NOT NULL,
        last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS token_transfers (
        id BIGSERIAL PRIMARY KEY,
        tx_hash TEXT NOT NULL,
        log_index BIGINT NOT NULL,
        block_number BIGINT NOT NULL,
        timestamp BIGINT NOT NULL,
        from_address TEXT NOT NULL,
        to_address TEXT NOT NULL,
        amount NUMERIC(78, 0) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (tx_hash, log_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transfers_block ON token_transfers(block_number)",
    r#"
    CREATE TABLE IF NOT EXISTS charity_contributions (
        id BIGSERIAL PRIMARY KEY,
        tx_hash TEXT NOT NULL,
        log_index BIGINT NOT NULL,
        block_number BIGINT NOT NULL,
        timestamp BIGINT NOT NULL,
        from_address TEXT NOT NULL,
        contribution_type TEXT NOT NULL CHECK (contribution_type IN ('pledged', 'delivered')),
        amount_bnb NUMERIC(78, 0) NOT NULL,
        amount_token NUMERIC(78, 0) NOT NULL,
        amount_usd NUMERIC NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (tx_hash, contribution_type, log_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_charity_timestamp ON charity_contributions(timestamp)",
    r#"
    CREATE TABLE IF NOT EXISTS farm_events (
        id BIGSERIAL PRIMARY KEY,
        tx_hash TEXT NOT NULL,
        log_index BIGINT NOT NULL,
        block_number BIGINT NOT NULL,
        timestamp BIGINT NOT NULL,
        user_address TEXT NOT NULL,
        pool_id BIGINT NOT NULL,
        event_type TEXT NOT NULL,
        amount NUMERIC(78, 0) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (tx_hash, user_address, pool_id, event_type, log_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_farm_events_user ON farm_events(user_address)",
    r#"
    CREATE TABLE IF NOT EXISTS swap_events (
        id BIGSERIAL PRIMARY KEY,
        tx_hash TEXT NOT NULL,
        log_index BIGINT NOT NULL,
        block_number BIGINT NOT NULL,
        timestamp BIGINT NOT NULL,
        sender TEXT NOT NULL,
        amount0_in NUMERIC(78, 0) NOT NULL,
        amount1_in NUMERIC(78, 0) NOT NULL,
        amount0_out NUMERIC(78, 0) NOT NULL,
        amount1_out NUMERIC(78, 0) NOT NULL,
        to_address TEXT NOT NULL,
        volume_bnb NUMERIC(78, 0) NOT NULL,
        UNIQUE (tx_hash, log_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_swap_events_block ON swap_events(block_number)",
    r#"
    CREATE TABLE IF NOT EXISTS price_history (
        id BIGSERIAL PRIMARY KEY,
        timestamp TIMESTAMPTZ NOT NULL,
        price_bnb NUMERIC NOT NULL,
        reserve_token NUMERIC(78, 0) NOT NULL,
        reserve_bnb NUMERIC(78, 0) NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_price_history_timestamp ON price_history(timestamp DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS live_feed (
        id BIGSERIAL PRIMARY KEY,
        timestamp BIGINT NOT NULL,
        event_type TEXT NOT NULL,
        user_address TEXT,
        amount TEXT,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_feed_timestamp ON live_feed(timestamp DESC)",
];

/// PostgreSQL-backed event store
#[derive(Debug, Clone)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| {
                PersistenceError::PoolCreation(format!("PostgreSQL connection error: {}", e))
            })?;

        info!("PostgreSQL pool initialized: max_connections=10, acquire_timeout=30s");
        Ok(Self { pool })
    }

    /// Create the ledger tables if they are missing
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema verified ({} statements)", SCHEMA.len());
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresClient {
    async fn get_last_block(&self) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT last_block FROM sync_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let block: i64 = row.try_get("last_block")?;
                Ok(Some(from_i64(block, "last_block")?))
            }
            None => Ok(None),
        }
    }

    async fn set_last_block(&self, block_number: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (id, last_block, last_updated)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE SET
                last_block = EXCLUDED.last_block,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(to_i64(block_number, "last_block")?)
        .execute(&self.pool)
        .await?;

        debug!("Cursor set to block {}", block_number);
        Ok(())
    }

    async fn insert_transfer(&self, transfer: &TransferRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO token_transfers
                (tx_hash, log_index, block_number, timestamp, from_address, to_address, amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7::numeric)
            ON CONFLICT (tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(&transfer.tx_hash)
        .bind(to_i64(transfer.log_index, "log_index")?)
        .bind(to_i64(transfer.block_number, "block_number")?)
        .bind(to_i64(transfer.timestamp, "timestamp")?)
        .bind(&transfer.from_address)
        .bind(&transfer.to_address)
        .bind(transfer.amount.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_charity(&self, contribution: &CharityContribution) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO charity_contributions
                (tx_hash, log_index, block_number, timestamp, from_address, contribution_type,
                 amount_bnb, amount_token, amount_usd)
            VALUES ($1, $2, $3, $4, $5, $6, $7::numeric, $8::numeric, $9::numeric)
            ON CONFLICT (tx_hash, contribution_type, log_index) DO NOTHING
            "#,
        )
        .bind(&contribution.tx_hash)
        .bind(to_i64(contribution.log_index, "log_index")?)
        .bind(to_i64(contribution.block_number, "block_number")?)
        .bind(to_i64(contribution.timestamp, "timestamp")?)
        .bind(&contribution.from_address)
        .bind(contribution.contribution_type.as_str())
        .bind(contribution.amount_bnb.to_string())
        .bind(contribution.amount_token.to_string())
        .bind(contribution.amount_usd.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_farm_event(&self, event: &FarmEventRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO farm_events
                (tx_hash, log_index, block_number, timestamp, user_address, pool_id, event_type, amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::numeric)
            ON CONFLICT (tx_hash, user_address, pool_id, event_type, log_index) DO NOTHING
            "#,
        )
        .bind(&event.tx_hash)
        .bind(to_i64(event.log_index, "log_index")?)
        .bind(to_i64(event.block_number, "block_number")?)
        .bind(to_i64(event.timestamp, "timestamp")?)
        .bind(&event.user_address)
        .bind(to_i64(event.pool_id, "pool_id")?)
        .bind(event.event_type.as_str())
        .bind(event.amount.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_swap_event(&self, swap: &SwapEventRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO swap_events
                (tx_hash, log_index, block_number, timestamp, sender, amount0_in, amount1_in,
                 amount0_out, amount1_out, to_address, volume_bnb)
            VALUES ($1, $2, $3, $4, $5, $6::numeric, $7::numeric, $8::numeric, $9::numeric, $10, $11::numeric)
            ON CONFLICT (tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(&swap.tx_hash)
        .bind(to_i64(swap.log_index, "log_index")?)
        .bind(to_i64(swap.block_number, "block_number")?)
        .bind(to_i64(swap.timestamp, "timestamp")?)
        .bind(&swap.sender)
        .bind(swap.amount0_in.to_string())
        .bind(swap.amount1_in.to_string())
        .bind(swap.amount0_out.to_string())
        .bind(swap.amount1_out.to_string())
        .bind(&swap.to_address)
        .bind(swap.volume_bnb.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_price(&self, sample: &PriceSample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_history (timestamp, price_bnb, reserve_token, reserve_bnb)
            VALUES ($1, $2::numeric, $3::numeric, $4::numeric)
            "#,
        )
        .bind(sample.timestamp)
        .bind(sample.price_bnb.to_string())
        .bind(sample.reserve_token.to_string())
        .bind(sample.reserve_bnb.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_recent_prices(&self, limit: usize) -> Result<Vec<PriceSample>> {
        let limit = i64::try_from(limit)
            .map_err(|_| PersistenceError::InvalidData(format!("limit out of range: {}", limit)))?;

        let rows = sqlx::query(
            r#"
            SELECT timestamp, price_bnb::text AS price_bnb,
                   reserve_token::text AS reserve_token, reserve_bnb::text AS reserve_bnb
            FROM price_history
            ORDER BY timestamp DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
            let price: String = row.try_get("price_bnb")?;
            let reserve_token: String = row.try_get("reserve_token")?;
            let reserve_bnb: String = row.try_get("reserve_bnb")?;

            samples.push(PriceSample {
                timestamp,
                price_bnb: Decimal::from_str(&price).map_err(|e| {
                    PersistenceError::InvalidData(format!("price_bnb '{}': {}", price, e))
                })?,
                reserve_token: parse_numeric(&reserve_token)?,
                reserve_bnb: parse_numeric(&reserve_bnb)?,
            });
        }

        // Chronological order for the rolling window
        samples.reverse();
        Ok(samples)
    }

    async fn get_last_swap_block(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COALESCE(MAX(block_number), 0) AS last_block FROM swap_events")
            .fetch_one(&self.pool)
            .await?;
        let block: i64 = row.try_get("last_block")?;
        from_i64(block, "last_block")
    }

    async fn insert_feed(&self, item: &FeedItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO live_feed (timestamp, event_type, user_address, amount, metadata)
            VALUES ($1, $2, $3, $4, $5::jsonb)
            "#,
        )
        .bind(to_i64(item.timestamp, "timestamp")?)
        .bind(item.event_type.as_str())
        .bind(&item.user_address)
        .bind(&item.amount)
        .bind(serde_json::to_string(&item.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| PersistenceError::InvalidData(format!("{} out of range: {}", field, value)))
}

fn from_i64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| PersistenceError::InvalidData(format!("negative {}: {}", field, value)))
}

/// NUMERIC(78, 0) rendered as text
fn parse_numeric(value: &str) -> Result<BigUint> {
    let digits = value.split('.').next().unwrap_or(value);
    BigUint::from_str(digits)
        .map_err(|e| PersistenceError::InvalidData(format!("numeric '{}': {}", value, e)))
}
