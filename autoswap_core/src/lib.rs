pub mod price_window;
pub mod strategy;
pub mod units;

pub use price_window::{PricePoint, PriceWindow};
pub use strategy::{
    evaluate, strategy_status, PriceData, StrategyStatus, SwapDecision, SwapSignals,
    MIN_HISTORY_SAMPLES, REQUIRED_SIGNALS,
};
pub use units::{format_units, parse_units, price_from_reserves, TOKEN_DECIMALS};

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum StrategyError {
    #[error("Invalid amount '{0}'")]
    InvalidAmount(String),
    #[error("Decimal conversion error: {0}")]
    DecimalConversion(String),
}

pub type Result<T> = std::result::Result<T, StrategyError>;
