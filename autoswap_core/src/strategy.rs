//! Swap timing decision.
//!
//! `evaluate` is a pure function of the accumulated balance, the threshold and
//! the rolling price window. It never fails: a signal whose lookback is not
//! covered by the window counts as negative.

use num_bigint::BigUint;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::price_window::{PricePoint, PriceWindow};
use crate::units::{format_units, TOKEN_DECIMALS};

/// Below this many samples the decision falls back to the amount alone
pub const MIN_HISTORY_SAMPLES: usize = 15;
/// Positive signals needed to recommend a swap
pub const REQUIRED_SIGNALS: usize = 3;

const SHORT_MA: usize = 5;
const LONG_MA: usize = 15;
const SHORT_CHANGE: usize = 10;
const LONG_CHANGE: usize = 30;
const STATUS_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapSignals {
    /// MA5 above MA15
    pub uptrend: bool,
    /// Latest price above MA5
    #[serde(rename = "aboveMA")]
    pub above_ma: bool,
    /// Up more than 0.5% over 10 samples
    pub recent_gain: bool,
    /// Not down more than 2% over 30 samples
    pub not_dumping: bool,
    /// 10-sample change at least half the 30-sample change
    pub momentum: bool,
}

impl SwapSignals {
    pub const TOTAL: usize = 5;

    pub fn positive_count(&self) -> usize {
        [
            self.uptrend,
            self.above_ma,
            self.recent_gain,
            self.not_dumping,
            self.momentum,
        ]
        .iter()
        .filter(|s| **s)
        .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceData {
    pub current_price: Option<String>,
    pub ma5: Option<String>,
    pub ma15: Option<String>,
    #[serde(rename = "priceChange10min")]
    pub price_change_10min: Option<String>,
    #[serde(rename = "priceChange30min")]
    pub price_change_30min: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapDecision {
    pub should_swap: bool,
    pub reason: String,
    pub signals: Option<SwapSignals>,
    pub price_data: Option<PriceData>,
    pub accumulated_tokens: String,
    pub threshold: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyStatus {
    pub price_history_length: usize,
    pub current_price: Option<String>,
    pub ma5: Option<String>,
    pub ma15: Option<String>,
    #[serde(rename = "priceChange10min")]
    pub price_change_10min: Option<String>,
    #[serde(rename = "priceChange30min")]
    pub price_change_30min: Option<String>,
    pub price_history: Vec<PricePoint>,
}

fn format_price(value: Decimal) -> String {
    format!("{:.12}", value)
}

fn format_percent(value: Decimal) -> String {
    format!("{:.2}%", value)
}

fn price_data(window: &PriceWindow) -> PriceData {
    PriceData {
        current_price: window.latest().map(|p| format_price(p.price)),
        ma5: window.moving_average(SHORT_MA).map(format_price),
        ma15: window.moving_average(LONG_MA).map(format_price),
        price_change_10min: window.percent_change(SHORT_CHANGE).map(format_percent),
        price_change_30min: window.percent_change(LONG_CHANGE).map(format_percent),
    }
}

/// Compute the five timing signals from the window
pub fn compute_signals(window: &PriceWindow) -> SwapSignals {
    let latest = window.latest().map(|p| p.price);
    let ma5 = window.moving_average(SHORT_MA);
    let ma15 = window.moving_average(LONG_MA);
    let change10 = window.percent_change(SHORT_CHANGE);
    let change30 = window.percent_change(LONG_CHANGE);

    let half = Decimal::new(5, 1);
    let dump_floor = Decimal::from(-2);

    SwapSignals {
        uptrend: matches!((ma5, ma15), (Some(short), Some(long)) if short > long),
        above_ma: matches!((latest, ma5), (Some(price), Some(ma)) if price > ma),
        recent_gain: matches!(change10, Some(c) if c > half),
        not_dumping: matches!(change30, Some(c) if c > dump_floor),
        momentum: match (change10, change30) {
            (Some(c10), Some(c30)) => c30.checked_mul(half).map_or(false, |h| c10 >= h),
            _ => false,
        },
    }
}

/// Decide whether the accumulated balance should be swapped now
pub fn evaluate(accumulated: &BigUint, threshold: &BigUint, window: &PriceWindow) -> SwapDecision {
    let accumulated_tokens = format_units(accumulated, TOKEN_DECIMALS);
    let threshold_tokens = format_units(threshold, TOKEN_DECIMALS);

    if accumulated < threshold {
        return SwapDecision {
            should_swap: false,
            reason: "Accumulated amount below threshold".to_string(),
            signals: None,
            price_data: None,
            accumulated_tokens,
            threshold: threshold_tokens,
        };
    }

    if window.len() < MIN_HISTORY_SAMPLES {
        return SwapDecision {
            should_swap: true,
            reason: "Insufficient price history - swapping based on amount only".to_string(),
            signals: None,
            price_data: None,
            accumulated_tokens,
            threshold: threshold_tokens,
        };
    }

    let signals = compute_signals(window);
    let positive = signals.positive_count();
    let should_swap = positive >= REQUIRED_SIGNALS;

    let reason = if should_swap {
        format!(
            "{}/{} positive signals - good time to swap",
            positive,
            SwapSignals::TOTAL
        )
    } else {
        format!(
            "Only {}/{} positive signals - waiting for better price",
            positive,
            SwapSignals::TOTAL
        )
    };

    SwapDecision {
        should_swap,
        reason,
        signals: Some(signals),
        price_data: Some(price_data(window)),
        accumulated_tokens,
        threshold: threshold_tokens,
    }
}

/// Snapshot of the window for status reporting
pub fn strategy_status(window: &PriceWindow) -> StrategyStatus {
    let data = price_data(window);
    StrategyStatus {
        price_history_length: window.len(),
        current_price: data.current_price,
        ma5: data.ma5,
        ma15: data.ma15,
        price_change_10min: data.price_change_10min,
        price_change_30min: data.price_change_30min,
        price_history: window.recent(STATUS_HISTORY),
    }
}
