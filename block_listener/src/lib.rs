pub mod attribution;
pub mod decoder;
pub mod usd_oracle;
pub mod window;

pub use attribution::TraderResolver;
pub use decoder::{decode_log, decode_swap, ChainEvent, DecodeError, DecodedLog, EventKind, SwapLog};
pub use usd_oracle::BnbUsdOracle;
pub use window::{compute_window, confirmed_head, BlockWindow, WindowParams};

use autoswap_core::{parse_units, StrategyError, TOKEN_DECIMALS};
use chain_client::{Address, ChainClient, ChainClientError, Log, LogFilter};
use chrono::Utc;
use config_manager::SystemConfig;
use num_bigint::BigUint;
use persistence_layer::{
    CharityContribution, ContributionType, EventStore, FarmEventRecord, FeedEventType, FeedItem,
    PersistenceError, RedisClient, TransferRecord,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Chain client error: {0}")]
    Chain(#[from] ChainClientError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Amount conversion error: {0}")]
    Amount(#[from] StrategyError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("USD oracle error: {0}")]
    Oracle(String),
}

pub type Result<T> = std::result::Result<T, ListenerError>;

const LEADER_LOCK: &str = "block-listener-leader";

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub token: Address,
    pub masterchef: Address,
    pub pair: Address,
    pub router: Address,
    pub wbnb: Address,
    pub bnb_usd_pair: Address,
    pub window: WindowParams,
    pub poll_interval: Duration,
    /// Transfers at or above this many wei go to the live feed
    pub large_transfer_threshold: BigUint,
    pub leader_lock_ttl_seconds: u64,
}

fn parse_address(value: &str, field: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|e| ListenerError::Config(format!("{}: {}", field, e)))
}

impl ListenerSettings {
    pub fn from_config(config: &SystemConfig) -> Result<Self> {
        let contracts = &config.contracts;
        let listener = &config.listener;

        Ok(Self {
            token: parse_address(&contracts.token_address, "token_address")?,
            masterchef: parse_address(&contracts.masterchef_address, "masterchef_address")?,
            pair: parse_address(&contracts.pair_address, "pair_address")?,
            router: parse_address(&contracts.router_address, "router_address")?,
            wbnb: parse_address(&contracts.wbnb_address, "wbnb_address")?,
            bnb_usd_pair: parse_address(&contracts.bnb_usd_pair_address, "bnb_usd_pair_address")?,
            window: WindowParams {
                confirmation_depth: listener.confirmation_depth,
                backfill_window: listener.backfill_window,
                max_batch_blocks: listener.max_batch_blocks,
                start_block: listener.start_block,
            },
            poll_interval: Duration::from_millis(listener.poll_interval_ms),
            large_transfer_threshold: parse_units(
                &listener.large_transfer_threshold_tokens.to_string(),
                TOKEN_DECIMALS,
            )?,
            leader_lock_ttl_seconds: config.redis.lock_ttl_seconds,
        })
    }
}

/// Result of one listener tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub window: Option<BlockWindow>,
    /// Events stored (or already present)
    pub processed: usize,
    /// Malformed or removed logs skipped with a warning
    pub dropped: usize,
    /// Events whose critical write failed
    pub failures: usize,
    pub cursor_advanced: bool,
}

enum Outcome {
    Stored,
    Dropped,
}

/// Block timestamps fetched during one tick
#[derive(Default)]
struct BlockTimes(HashMap<u64, u64>);

/// Block Window Processor: turns confirmed blocks into idempotent ledger rows
pub struct BlockListener {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn EventStore>,
    resolver: TraderResolver,
    oracle: Arc<BnbUsdOracle>,
    leader_lock: Option<RedisClient>,
    settings: ListenerSettings,
}

impl BlockListener {
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn EventStore>,
        settings: ListenerSettings,
    ) -> Self {
        let resolver = TraderResolver::new(client.clone(), settings.pair, settings.router);
        let oracle = Arc::new(BnbUsdOracle::new(
            client.clone(),
            settings.bnb_usd_pair,
            settings.wbnb,
        ));

        Self {
            client,
            store,
            resolver,
            oracle,
            leader_lock: None,
            settings,
        }
    }

    /// Gate every tick on a Redis lock so only one process ingests
    pub fn with_leader_lock(mut self, redis: RedisClient) -> Self {
        self.leader_lock = Some(redis);
        self
    }

    /// Apply the configured start block, if any, before the first tick
    pub async fn initialize_cursor(&self) -> Result<()> {
        let start_block = self.settings.window.start_block;
        if start_block > 0 {
            self.store.set_last_block(start_block).await?;
            info!("Starting from configured block {}", start_block);
            return Ok(());
        }

        match self.store.get_last_block().await? {
            Some(block) => info!("Resuming from last processed block {}", block),
            None => info!("No cursor stored, starting at the confirmed head"),
        }
        Ok(())
    }

    /// Poll until `shutdown` flips to true. A running tick always completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Block listener started (poll every {:?}, depth {}, backfill {}, batch {})",
            self.settings.poll_interval,
            self.settings.window.confirmation_depth,
            self.settings.window.backfill_window,
            self.settings.window.max_batch_blocks
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.guarded_tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Block listener stopped");
    }

    async fn guarded_tick(&self) {
        let handle = match &self.leader_lock {
            Some(redis) => {
                match redis
                    .acquire_lock(LEADER_LOCK, self.settings.leader_lock_ttl_seconds)
                    .await
                {
                    Ok(handle) => Some(handle),
                    Err(PersistenceError::LockFailed) => {
                        debug!("Another process holds {}, skipping tick", LEADER_LOCK);
                        return;
                    }
                    Err(e) => {
                        warn!("Leader lock unavailable, skipping tick: {}", e);
                        return;
                    }
                }
            }
            None => None,
        };

        if let Err(e) = self.tick().await {
            error!("Listener tick failed: {}", e);
        }

        if let (Some(redis), Some(handle)) = (&self.leader_lock, handle) {
            if let Err(e) = redis.release_lock(&handle).await {
                debug!("Leader lock release: {}", e);
            }
        }
    }

    /// One pass over the next confirmed block window
    pub async fn tick(&self) -> Result<TickReport> {
        let latest = self.client.block_number().await?;
        let params = &self.settings.window;

        let last_processed = match self.store.get_last_block().await? {
            Some(block) => block,
            None => {
                let confirmed = confirmed_head(latest, params);
                self.store.set_last_block(confirmed).await?;
                info!("Cursor initialised at confirmed block {}", confirmed);
                return Ok(TickReport::default());
            }
        };

        let window = match compute_window(latest, Some(last_processed), params) {
            Some(window) => window,
            None => {
                debug!("No new confirmed blocks (head {}, cursor {})", latest, last_processed);
                return Ok(TickReport::default());
            }
        };

        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        if let Err(e) = self.oracle.sample(now).await {
            warn!("BNB/USD sample failed: {}", e);
        }

        info!(
            "Processing blocks {} to {} ({} blocks)",
            window.from_block,
            window.to_block,
            window.block_count()
        );

        let batches = self.fetch_all(&window).await?;
        let mut report = TickReport {
            window: Some(window),
            ..TickReport::default()
        };
        let mut times = BlockTimes::default();

        for (kind, logs) in &batches {
            for log in logs {
                let decoded = match decode_log(*kind, log) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!(
                            "Dropping malformed {} log in tx {:?}: {}",
                            kind.name(),
                            log.transaction_hash,
                            e
                        );
                        report.dropped += 1;
                        continue;
                    }
                };

                match self.process(&decoded, &mut times).await {
                    Ok(Outcome::Stored) => report.processed += 1,
                    Ok(Outcome::Dropped) => report.dropped += 1,
                    Err(e) => {
                        error!(
                            "Failed to persist {} {:?}:{}: {}",
                            kind.name(),
                            decoded.tx_hash,
                            decoded.log_index,
                            e
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        if report.failures == 0 {
            self.store.set_last_block(window.to_block).await?;
            report.cursor_advanced = true;
            info!(
                "Blocks {} to {} processed: {} events, {} dropped",
                window.from_block, window.to_block, report.processed, report.dropped
            );
        } else {
            error!(
                "{} events failed in blocks {} to {}, cursor stays at {}",
                report.failures, window.from_block, window.to_block, last_processed
            );
        }

        Ok(report)
    }

    fn source(&self, kind: EventKind) -> Address {
        match kind {
            EventKind::Transfer | EventKind::Donated => self.settings.token,
            EventKind::Deposit | EventKind::Withdraw | EventKind::Harvest => {
                self.settings.masterchef
            }
        }
    }

    /// Fetch every event category for the window concurrently
    async fn fetch_all(&self, window: &BlockWindow) -> Result<Vec<(EventKind, Vec<Log>)>> {
        let fetches = EventKind::ALL.into_iter().map(|kind| {
            let filter = LogFilter {
                address: self.source(kind),
                topic0: kind.topic(),
                from_block: window.from_block,
                to_block: window.to_block,
            };
            async move { (kind, self.client.get_logs(&filter).await) }
        });

        let mut batches = Vec::with_capacity(EventKind::ALL.len());
        for (kind, result) in futures::future::join_all(fetches).await {
            let logs = result?;
            debug!("{} {} logs", logs.len(), kind.name());
            batches.push((kind, logs));
        }
        Ok(batches)
    }

    async fn block_time(&self, times: &mut BlockTimes, block: u64) -> Result<u64> {
        if let Some(ts) = times.0.get(&block) {
            return Ok(*ts);
        }
        let ts = self.client.block_timestamp(block).await?;
        times.0.insert(block, ts);
        Ok(ts)
    }

    async fn process(&self, log: &DecodedLog, times: &mut BlockTimes) -> Result<Outcome> {
        match &log.event {
            ChainEvent::Transfer { from, to, value } => {
                let timestamp = self.block_time(times, log.block_number).await?;
                self.process_transfer(log, timestamp, *from, *to, value).await?;
                Ok(Outcome::Stored)
            }
            ChainEvent::Farm {
                event_type,
                user,
                pool_id,
                amount,
            } => {
                let timestamp = self.block_time(times, log.block_number).await?;
                let record = FarmEventRecord {
                    tx_hash: log.tx_hash_hex(),
                    log_index: log.log_index,
                    block_number: log.block_number,
                    timestamp,
                    user_address: format!("{:?}", user),
                    pool_id: *pool_id,
                    event_type: *event_type,
                    amount: amount.clone(),
                };
                self.store.insert_farm_event(&record).await?;

                self.publish(FeedItem {
                    timestamp,
                    event_type: FeedEventType::from(*event_type),
                    user_address: Some(format!("{:?}", user)),
                    amount: Some(amount.to_string()),
                    metadata: json!({ "poolId": pool_id, "txHash": log.tx_hash_hex() }),
                })
                .await;
                Ok(Outcome::Stored)
            }
            ChainEvent::Donated {
                tokens_sold,
                bnb_sent,
                to,
                ..
            } => {
                let timestamp = match self.block_time(times, log.block_number).await {
                    Ok(ts) => ts,
                    Err(e) => {
                        warn!(
                            "Dropping donation {:?}: block {} timestamp unavailable: {}",
                            log.tx_hash, log.block_number, e
                        );
                        return Ok(Outcome::Dropped);
                    }
                };
                self.process_donation(log, timestamp, tokens_sold, bnb_sent, *to)
                    .await?;
                Ok(Outcome::Stored)
            }
        }
    }

    async fn process_transfer(
        &self,
        log: &DecodedLog,
        timestamp: u64,
        from: Address,
        to: Address,
        value: &BigUint,
    ) -> Result<()> {
        let record = TransferRecord {
            tx_hash: log.tx_hash_hex(),
            log_index: log.log_index,
            block_number: log.block_number,
            timestamp,
            from_address: format!("{:?}", from),
            to_address: format!("{:?}", to),
            amount: value.clone(),
        };
        self.store.insert_transfer(&record).await?;

        let is_pledge = to == self.settings.token;
        let is_large = *value >= self.settings.large_transfer_threshold;
        if !is_pledge && !is_large {
            return Ok(());
        }

        let trader = self.resolver.resolve_transfer(log.tx_hash, from).await;

        if is_pledge {
            let pledge = CharityContribution {
                tx_hash: log.tx_hash_hex(),
                log_index: log.log_index,
                block_number: log.block_number,
                timestamp,
                from_address: format!("{:?}", trader),
                contribution_type: ContributionType::Pledged,
                amount_bnb: BigUint::default(),
                amount_token: value.clone(),
                amount_usd: Decimal::ZERO,
            };
            self.store.insert_charity(&pledge).await?;
            debug!("Pledge of {} from {:?} in {:?}", value, trader, log.tx_hash);
        }

        if is_large {
            self.publish(FeedItem {
                timestamp,
                event_type: FeedEventType::Transfer,
                user_address: Some(format!("{:?}", trader)),
                amount: Some(value.to_string()),
                metadata: json!({ "to": format!("{:?}", to), "txHash": log.tx_hash_hex() }),
            })
            .await;
        }

        Ok(())
    }

    async fn process_donation(
        &self,
        log: &DecodedLog,
        timestamp: u64,
        tokens_sold: &BigUint,
        bnb_sent: &BigUint,
        to: Address,
    ) -> Result<()> {
        let amount_usd = match self.oracle.usd_value_at(bnb_sent, timestamp).await {
            Ok(usd) => usd,
            Err(e) => {
                warn!("USD value unavailable for donation {:?}: {}", log.tx_hash, e);
                Decimal::ZERO
            }
        };

        let contribution = CharityContribution {
            tx_hash: log.tx_hash_hex(),
            log_index: log.log_index,
            block_number: log.block_number,
            timestamp,
            from_address: format!("{:?}", self.settings.token),
            contribution_type: ContributionType::Delivered,
            amount_bnb: bnb_sent.clone(),
            amount_token: tokens_sold.clone(),
            amount_usd,
        };
        self.store.insert_charity(&contribution).await?;

        info!(
            "Donation delivered in {:?}: {} wei BNB (${}) to {:?}",
            log.tx_hash, bnb_sent, amount_usd, to
        );

        self.publish(FeedItem {
            timestamp,
            event_type: FeedEventType::Donation,
            user_address: Some(format!("{:?}", self.settings.token)),
            amount: Some(amount_usd.to_string()),
            metadata: json!({
                "txHash": log.tx_hash_hex(),
                "bnbSent": bnb_sent.to_string(),
                "tokensSold": tokens_sold.to_string(),
                "to": format!("{:?}", to),
            }),
        })
        .await;

        Ok(())
    }

    /// Live feed writes never affect the batch
    async fn publish(&self, item: FeedItem) {
        if let Err(e) = self.store.insert_feed(&item).await {
            warn!("Live feed write failed ({}): {}", item.event_type.as_str(), e);
        }
    }
}
