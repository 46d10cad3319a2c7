use autoswap_core::{price_from_reserves, PricePoint, PriceWindow};
use block_listener::decoder::decode_positioned_swap;
use block_listener::TraderResolver;
use chain_client::contracts::SwapEvent;
use chain_client::{Address, ChainClient, LogFilter};
use chrono::Utc;
use ethers::contract::EthEvent;
use num_bigint::BigUint;
use persistence_layer::{EventStore, PriceSample, SwapEventRecord};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{AutoswapSettings, OrchestratorError, Result};

/// Spot price of the token read from the pair reserves
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentPrice {
    /// BNB per whole token
    pub price: Decimal,
    pub reserve_token: BigUint,
    pub reserve_bnb: BigUint,
}

/// Keeps the rolling price window in memory and syncs pair Swap events into
/// the store for volume.
pub struct PriceVolumeTracker {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn EventStore>,
    resolver: TraderResolver,
    pair: Address,
    token_is_token0: bool,
    max_volume_blocks: u64,
    window: Mutex<PriceWindow>,
}

impl PriceVolumeTracker {
    /// Resolve the token position in the pair and reload stored prices.
    /// A pair that does not contain the token is a configuration error.
    pub async fn init(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn EventStore>,
        settings: &AutoswapSettings,
    ) -> Result<Self> {
        let (token0, token1) = client.pair_tokens(settings.pair).await?;
        let token_is_token0 = if token0 == settings.token {
            true
        } else if token1 == settings.token {
            false
        } else {
            return Err(OrchestratorError::Config(format!(
                "pair {:?} ({:?} / {:?}) does not contain token {:?}",
                settings.pair, token0, token1, settings.token
            )));
        };

        info!(
            "Price tracker initialised: token is token{} of {:?}",
            if token_is_token0 { 0 } else { 1 },
            settings.pair
        );

        let window = match store.get_recent_prices(settings.history_length).await {
            Ok(samples) => {
                let window = PriceWindow::from_points(
                    settings.history_length,
                    samples.into_iter().map(|s| PricePoint {
                        timestamp: s.timestamp,
                        price: s.price_bnb,
                    }),
                );
                info!("Loaded {} stored price samples", window.len());
                window
            }
            Err(e) => {
                error!("Failed to load price history, starting empty: {}", e);
                PriceWindow::new(settings.history_length)
            }
        };

        let resolver = TraderResolver::new(client.clone(), settings.pair, settings.router);

        Ok(Self {
            client,
            store,
            resolver,
            pair: settings.pair,
            token_is_token0,
            max_volume_blocks: settings.max_volume_blocks,
            window: Mutex::new(window),
        })
    }

    pub fn token_is_token0(&self) -> bool {
        self.token_is_token0
    }

    /// Orient raw pair amounts as (token side, BNB side)
    fn split<'a>(&self, amount0: &'a BigUint, amount1: &'a BigUint) -> (&'a BigUint, &'a BigUint) {
        if self.token_is_token0 {
            (amount0, amount1)
        } else {
            (amount1, amount0)
        }
    }

    /// Current price, or None when either reserve is zero
    pub async fn current_price(&self) -> Result<Option<CurrentPrice>> {
        let (reserve0, reserve1) = self.client.pair_reserves(self.pair).await?;
        let (reserve_token, reserve_bnb) = self.split(&reserve0, &reserve1);

        match price_from_reserves(reserve_bnb, reserve_token)? {
            Some(price) => Ok(Some(CurrentPrice {
                price,
                reserve_token: reserve_token.clone(),
                reserve_bnb: reserve_bnb.clone(),
            })),
            None => {
                error!(
                    "Invalid reserves on {:?}: token {}, BNB {}",
                    self.pair, reserve_token, reserve_bnb
                );
                Ok(None)
            }
        }
    }

    /// Sample the price into the window and the store. Returns false when no
    /// valid price was available.
    pub async fn update_price_history(&self) -> Result<bool> {
        let current = match self.current_price().await? {
            Some(current) => current,
            None => return Ok(false),
        };

        let timestamp = Utc::now();
        let history_length = {
            let mut window = self.window.lock().await;
            window.push(PricePoint {
                timestamp,
                price: current.price,
            });
            window.len()
        };

        let sample = PriceSample {
            timestamp,
            price_bnb: current.price,
            reserve_token: current.reserve_token,
            reserve_bnb: current.reserve_bnb,
        };
        match self.store.insert_price(&sample).await {
            Ok(()) => debug!(
                "Price updated: {:.12} BNB ({} samples)",
                current.price, history_length
            ),
            Err(e) => error!("Failed to store price sample: {}", e),
        }

        Ok(true)
    }

    /// Store pair Swap events newer than the last stored swap block, looking
    /// back at most `max_volume_blocks`. Returns the number of swaps stored.
    pub async fn track_volume(&self) -> Result<usize> {
        let last_block = self.store.get_last_swap_block().await?;
        let current_block = self.client.block_number().await?;
        let from_block = last_block
            .saturating_add(1)
            .max(current_block.saturating_sub(self.max_volume_blocks));

        if from_block > current_block {
            return Ok(0);
        }

        let filter = LogFilter {
            address: self.pair,
            topic0: SwapEvent::signature(),
            from_block,
            to_block: current_block,
        };
        let logs = self.client.get_logs(&filter).await?;
        debug!(
            "Found {} swap events from block {} to {}",
            logs.len(),
            from_block,
            current_block
        );

        let mut block_times: HashMap<u64, u64> = HashMap::new();
        let mut stored = 0;

        for log in &logs {
            let (position, swap) = match decode_positioned_swap(log) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Skipping swap log {:?}: {}", log.transaction_hash, e);
                    continue;
                }
            };

            let timestamp = match block_times.get(&position.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self.client.block_timestamp(position.block_number).await?;
                    block_times.insert(position.block_number, ts);
                    ts
                }
            };

            let sender = self
                .resolver
                .resolve_swap_sender(position.tx_hash, swap.sender)
                .await;
            let (_, bnb_in) = self.split(&swap.amount0_in, &swap.amount1_in);
            let (_, bnb_out) = self.split(&swap.amount0_out, &swap.amount1_out);
            let volume_bnb = bnb_in + bnb_out;

            let record = SwapEventRecord {
                tx_hash: format!("{:?}", position.tx_hash),
                log_index: position.log_index,
                block_number: position.block_number,
                timestamp,
                sender: format!("{:?}", sender),
                amount0_in: swap.amount0_in,
                amount1_in: swap.amount1_in,
                amount0_out: swap.amount0_out,
                amount1_out: swap.amount1_out,
                to_address: format!("{:?}", swap.to),
                volume_bnb,
            };

            match self.store.insert_swap_event(&record).await {
                Ok(true) => stored += 1,
                Ok(false) => debug!(
                    "Swap {}:{} already stored",
                    record.tx_hash, record.log_index
                ),
                Err(e) => warn!(
                    "Failed to store swap {}:{}: {}",
                    record.tx_hash, record.log_index, e
                ),
            }
        }

        if stored > 0 {
            info!("Tracked {} swap events, volume updated", stored);
        }

        Ok(stored)
    }

    /// Snapshot of the rolling window
    pub async fn window(&self) -> PriceWindow {
        self.window.lock().await.clone()
    }
}
