use autoswap_core::{price_from_reserves, TOKEN_DECIMALS};
use chain_client::{Address, ChainClient};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{ListenerError, Result};

const HISTORY_LIMIT: usize = 100;
/// Samples further than this from the requested time are ignored
const MAX_SAMPLE_AGE_SECONDS: u64 = 3600;
const DEFAULT_USD_PER_BNB: i64 = 300;

#[derive(Default)]
struct OracleState {
    /// WBNB position in the stable pair, resolved on first sample
    wbnb_is_token0: Option<bool>,
    /// (unix seconds, USD per BNB), oldest first
    history: VecDeque<(u64, Decimal)>,
}

/// BNB/USD rate from the WBNB/BUSD pair, sampled on every listener tick
pub struct BnbUsdOracle {
    client: Arc<dyn ChainClient>,
    pair: Address,
    wbnb: Address,
    state: Mutex<OracleState>,
}

impl BnbUsdOracle {
    pub fn new(client: Arc<dyn ChainClient>, pair: Address, wbnb: Address) -> Self {
        Self {
            client,
            pair,
            wbnb,
            state: Mutex::new(OracleState::default()),
        }
    }

    /// Read the pair reserves and record the current rate at `now`
    pub async fn sample(&self, now: u64) -> Result<Decimal> {
        let wbnb_is_token0 = self.wbnb_position().await?;
        let (reserve0, reserve1) = self.client.pair_reserves(self.pair).await?;
        let (wbnb, busd) = if wbnb_is_token0 {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        };

        // Both sides have 18 decimals, so the reserve ratio is the rate
        let rate = price_from_reserves(&busd, &wbnb)?
            .ok_or_else(|| ListenerError::Oracle("stable pair has zero reserves".to_string()))?;

        self.record(now, rate).await;
        debug!("BNB/USD sampled: {}", rate);
        Ok(rate)
    }

    async fn wbnb_position(&self) -> Result<bool> {
        if let Some(known) = self.state.lock().await.wbnb_is_token0 {
            return Ok(known);
        }

        let (token0, token1) = self.client.pair_tokens(self.pair).await?;
        let is_token0 = if token0 == self.wbnb {
            true
        } else if token1 == self.wbnb {
            false
        } else {
            return Err(ListenerError::Oracle(format!(
                "pair {:?} does not contain WBNB {:?}",
                self.pair, self.wbnb
            )));
        };

        self.state.lock().await.wbnb_is_token0 = Some(is_token0);
        Ok(is_token0)
    }

    pub async fn record(&self, timestamp: u64, usd_per_bnb: Decimal) {
        let mut state = self.state.lock().await;
        state.history.push_back((timestamp, usd_per_bnb));
        while state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }
    }

    /// Rate to apply at `timestamp`: the nearest sample within an hour, else
    /// the latest spot sample, else the default.
    pub async fn rate_at(&self, timestamp: u64) -> Decimal {
        let state = self.state.lock().await;

        let nearest = state
            .history
            .iter()
            .min_by_key(|(ts, _)| ts.abs_diff(timestamp))
            .copied();

        match nearest {
            Some((ts, rate)) if ts.abs_diff(timestamp) <= MAX_SAMPLE_AGE_SECONDS => rate,
            Some(_) => state
                .history
                .back()
                .map(|(_, rate)| *rate)
                .unwrap_or(Decimal::from(DEFAULT_USD_PER_BNB)),
            None => {
                warn!(
                    "No BNB/USD price observed yet, using default {} USD/BNB",
                    DEFAULT_USD_PER_BNB
                );
                Decimal::from(DEFAULT_USD_PER_BNB)
            }
        }
    }

    /// USD value of `bnb_wei` at `timestamp`, rounded to cents
    pub async fn usd_value_at(&self, bnb_wei: &BigUint, timestamp: u64) -> Result<Decimal> {
        let mantissa = bnb_wei
            .to_i128()
            .ok_or_else(|| ListenerError::Oracle(format!("BNB amount too large: {}", bnb_wei)))?;
        let bnb = Decimal::try_from_i128_with_scale(mantissa, TOKEN_DECIMALS)
            .map_err(|e| ListenerError::Oracle(e.to_string()))?;

        let rate = self.rate_at(timestamp).await;
        bnb.checked_mul(rate)
            .map(|usd| usd.round_dp(2))
            .ok_or_else(|| ListenerError::Oracle(format!("USD overflow for {} BNB", bnb)))
    }
}
