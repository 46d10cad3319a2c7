use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use redis::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod memory_store;
pub mod postgres_client;

pub use memory_store::MemoryEventStore;
pub use postgres_client::PostgresClient;

/// Plain token transfer from the token contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    /// Block timestamp, unix seconds
    pub timestamp: u64,
    pub from_address: String,
    pub to_address: String,
    pub amount: BigUint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributionType {
    /// Tax collected into the token contract, not yet swapped
    Pledged,
    /// BNB actually sent to the charity wallet by swapAndDonate
    Delivered,
}

impl ContributionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContributionType::Pledged => "pledged",
            ContributionType::Delivered => "delivered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharityContribution {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub timestamp: u64,
    pub from_address: String,
    pub contribution_type: ContributionType,
    pub amount_bnb: BigUint,
    pub amount_token: BigUint,
    pub amount_usd: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FarmEventType {
    Deposit,
    Withdraw,
    Harvest,
}

impl FarmEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FarmEventType::Deposit => "deposit",
            FarmEventType::Withdraw => "withdraw",
            FarmEventType::Harvest => "harvest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmEventRecord {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub timestamp: u64,
    pub user_address: String,
    pub pool_id: u64,
    pub event_type: FarmEventType,
    pub amount: BigUint,
}

/// AMM trade on the token/BNB pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapEventRecord {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub timestamp: u64,
    /// Economic actor: the signing account when the raw sender is the router
    pub sender: String,
    pub amount0_in: BigUint,
    pub amount1_in: BigUint,
    pub amount0_out: BigUint,
    pub amount1_out: BigUint,
    pub to_address: String,
    /// BNB-side amountIn + amountOut, in wei
    pub volume_bnb: BigUint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    /// BNB per whole token
    pub price_bnb: Decimal,
    pub reserve_token: BigUint,
    pub reserve_bnb: BigUint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedEventType {
    Transfer,
    Donation,
    FarmDeposit,
    FarmWithdraw,
    FarmHarvest,
}

impl FeedEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedEventType::Transfer => "transfer",
            FeedEventType::Donation => "donation",
            FeedEventType::FarmDeposit => "farm_deposit",
            FeedEventType::FarmWithdraw => "farm_withdraw",
            FeedEventType::FarmHarvest => "farm_harvest",
        }
    }
}

impl From<FarmEventType> for FeedEventType {
    fn from(event_type: FarmEventType) -> Self {
        match event_type {
            FarmEventType::Deposit => FeedEventType::FarmDeposit,
            FarmEventType::Withdraw => FeedEventType::FarmWithdraw,
            FarmEventType::Harvest => FeedEventType::FarmHarvest,
        }
    }
}

/// Recent-activity row shown on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub timestamp: u64,
    pub event_type: FeedEventType,
    pub user_address: Option<String>,
    pub amount: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Pool creation error: {0}")]
    PoolCreation(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Lock acquisition failed")]
    LockFailed,
    #[error("Lock not found")]
    LockNotFound,
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Idempotent ledger consumed by the listener and the autoswap tracker.
///
/// Every `insert_*` is insert-or-ignore on the record's uniqueness key and
/// reports whether a new row was written. Transfer, charity and farm inserts
/// are critical writes; swap, price and feed inserts are best-effort and
/// callers swallow their errors.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_last_block(&self) -> Result<Option<u64>>;

    /// Single-row upsert of the ingestion cursor
    async fn set_last_block(&self, block_number: u64) -> Result<()>;

    /// Unique on (tx_hash, log_index)
    async fn insert_transfer(&self, transfer: &TransferRecord) -> Result<bool>;

    /// Unique on (tx_hash, contribution_type, log_index)
    async fn insert_charity(&self, contribution: &CharityContribution) -> Result<bool>;

    /// Unique on (tx_hash, user_address, pool_id, event_type, log_index)
    async fn insert_farm_event(&self, event: &FarmEventRecord) -> Result<bool>;

    /// Unique on (tx_hash, log_index)
    async fn insert_swap_event(&self, swap: &SwapEventRecord) -> Result<bool>;

    async fn insert_price(&self, sample: &PriceSample) -> Result<()>;

    /// Most recent `limit` samples, oldest first
    async fn get_recent_prices(&self, limit: usize) -> Result<Vec<PriceSample>>;

    /// Highest stored swap block, 0 when none
    async fn get_last_swap_block(&self) -> Result<u64>;

    async fn insert_feed(&self, item: &FeedItem) -> Result<()>;
}

/// Redis client used for the cross-process listener lock
#[derive(Debug, Clone)]
pub struct RedisClient {
    client: Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHandle {
    pub key: String,
    pub value: String,
    pub ttl_seconds: u64,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Test the connection
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Connected to Redis");
        Ok(Self { client })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(PersistenceError::from)
    }

    /// Acquire a lock with a single `SET key value NX EX ttl`.
    /// Returns `LockFailed` when another holder owns it.
    pub async fn acquire_lock(&self, lock_name: &str, ttl_seconds: u64) -> Result<LockHandle> {
        let key = format!("lock:{}", lock_name);
        let value = format!(
            "{}:{}:{}",
            std::process::id(),
            Utc::now().timestamp(),
            uuid::Uuid::new_v4()
        );

        let mut conn = self.get_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;

        if reply.is_none() {
            return Err(PersistenceError::LockFailed);
        }

        debug!("Acquired lock: {}", lock_name);
        Ok(LockHandle {
            key,
            value,
            ttl_seconds,
        })
    }

    /// Release a lock only if this handle still owns it
    pub async fn release_lock(&self, handle: &LockHandle) -> Result<()> {
        let script = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#;

        let mut conn = self.get_connection().await?;
        let result: i32 = redis::Script::new(script)
            .key(&handle.key)
            .arg(&handle.value)
            .invoke_async(&mut conn)
            .await?;

        if result == 1 {
            debug!("Released lock: {}", handle.key);
            Ok(())
        } else {
            warn!("Lock was already expired or held by another process: {}", handle.key);
            Err(PersistenceError::LockNotFound)
        }
    }
}
