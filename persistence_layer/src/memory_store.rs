use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use tokio::sync::Mutex;

use crate::{
    CharityContribution, EventStore, FarmEventRecord, FeedItem, PriceSample, Result,
    SwapEventRecord, TransferRecord,
};

/// Price samples kept in memory; older ones are dropped first
pub const MAX_PRICE_SAMPLES: usize = 10_000;
/// Activity feed entries kept in memory
pub const MAX_FEED_ITEMS: usize = 10_000;

fn push_capped<T>(items: &mut VecDeque<T>, item: T, cap: usize) {
    if items.len() >= cap {
        items.pop_front();
    }
    items.push_back(item);
}

#[derive(Default)]
struct Tables {
    last_block: Option<u64>,
    transfers: Vec<TransferRecord>,
    transfer_keys: HashSet<(String, u64)>,
    charity: Vec<CharityContribution>,
    charity_keys: HashSet<(String, &'static str, u64)>,
    farm_events: Vec<FarmEventRecord>,
    farm_keys: HashSet<(String, String, u64, &'static str, u64)>,
    swaps: Vec<SwapEventRecord>,
    swap_keys: HashSet<(String, u64)>,
    prices: VecDeque<PriceSample>,
    feed: VecDeque<FeedItem>,
}

/// Process-local event store. Used when no database is configured and in tests;
/// uniqueness keys match the PostgreSQL constraints.
#[derive(Default)]
pub struct MemoryEventStore {
    tables: Mutex<Tables>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn transfers(&self) -> Vec<TransferRecord> {
        self.tables.lock().await.transfers.clone()
    }

    pub async fn charity_contributions(&self) -> Vec<CharityContribution> {
        self.tables.lock().await.charity.clone()
    }

    pub async fn farm_events(&self) -> Vec<FarmEventRecord> {
        self.tables.lock().await.farm_events.clone()
    }

    pub async fn swap_events(&self) -> Vec<SwapEventRecord> {
        self.tables.lock().await.swaps.clone()
    }

    pub async fn feed(&self) -> Vec<FeedItem> {
        self.tables.lock().await.feed.iter().cloned().collect()
    }

    pub async fn price_count(&self) -> usize {
        self.tables.lock().await.prices.len()
    }

    /// Rows across the four ledger tables
    pub async fn ledger_row_count(&self) -> usize {
        let tables = self.tables.lock().await;
        tables.transfers.len() + tables.charity.len() + tables.farm_events.len() + tables.swaps.len()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn get_last_block(&self) -> Result<Option<u64>> {
        Ok(self.tables.lock().await.last_block)
    }

    async fn set_last_block(&self, block_number: u64) -> Result<()> {
        self.tables.lock().await.last_block = Some(block_number);
        Ok(())
    }

    async fn insert_transfer(&self, transfer: &TransferRecord) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let key = (transfer.tx_hash.clone(), transfer.log_index);
        if !tables.transfer_keys.insert(key) {
            return Ok(false);
        }
        tables.transfers.push(transfer.clone());
        Ok(true)
    }

    async fn insert_charity(&self, contribution: &CharityContribution) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let key = (
            contribution.tx_hash.clone(),
            contribution.contribution_type.as_str(),
            contribution.log_index,
        );
        if !tables.charity_keys.insert(key) {
            return Ok(false);
        }
        tables.charity.push(contribution.clone());
        Ok(true)
    }

    async fn insert_farm_event(&self, event: &FarmEventRecord) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let key = (
            event.tx_hash.clone(),
            event.user_address.clone(),
            event.pool_id,
            event.event_type.as_str(),
            event.log_index,
        );
        if !tables.farm_keys.insert(key) {
            return Ok(false);
        }
        tables.farm_events.push(event.clone());
        Ok(true)
    }

    async fn insert_swap_event(&self, swap: &SwapEventRecord) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let key = (swap.tx_hash.clone(), swap.log_index);
        if !tables.swap_keys.insert(key) {
            return Ok(false);
        }
        tables.swaps.push(swap.clone());
        Ok(true)
    }

    async fn insert_price(&self, sample: &PriceSample) -> Result<()> {
        let mut tables = self.tables.lock().await;
        push_capped(&mut tables.prices, sample.clone(), MAX_PRICE_SAMPLES);
        Ok(())
    }

    async fn get_recent_prices(&self, limit: usize) -> Result<Vec<PriceSample>> {
        let tables = self.tables.lock().await;
        let skip = tables.prices.len().saturating_sub(limit);
        Ok(tables.prices.iter().skip(skip).cloned().collect())
    }

    async fn get_last_swap_block(&self) -> Result<u64> {
        let tables = self.tables.lock().await;
        Ok(tables.swaps.iter().map(|s| s.block_number).max().unwrap_or(0))
    }

    async fn insert_feed(&self, item: &FeedItem) -> Result<()> {
        let mut tables = self.tables.lock().await;
        push_capped(&mut tables.feed, item.clone(), MAX_FEED_ITEMS);
        Ok(())
    }
}
