pub mod autoswap_service;
pub mod price_tracker;

pub use autoswap_service::{AutoswapService, CheckOutcome, ServiceStatus, SwapExecutionResult};
pub use price_tracker::{CurrentPrice, PriceVolumeTracker};

use autoswap_core::{parse_units, StrategyError, TOKEN_DECIMALS};
use chain_client::{Address, ChainClientError};
use config_manager::{ConfigurationError, SystemConfig};
use num_bigint::BigUint;
use persistence_layer::PersistenceError;
use std::time::Duration;
use thiserror::Error;

/// Orchestrator errors
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("Chain client error: {0}")]
    ChainClient(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Swap execution error: {0}")]
    Swap(String),
}

impl From<ChainClientError> for OrchestratorError {
    fn from(err: ChainClientError) -> Self {
        OrchestratorError::ChainClient(err.to_string())
    }
}

impl From<PersistenceError> for OrchestratorError {
    fn from(err: PersistenceError) -> Self {
        OrchestratorError::Persistence(err.to_string())
    }
}

impl From<StrategyError> for OrchestratorError {
    fn from(err: StrategyError) -> Self {
        OrchestratorError::Strategy(err.to_string())
    }
}

impl From<ConfigurationError> for OrchestratorError {
    fn from(err: ConfigurationError) -> Self {
        OrchestratorError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

const RECEIPT_POLL_INTERVAL_MS: u64 = 3000;

/// Runtime settings for the price tracker and the autoswap loop
#[derive(Debug, Clone)]
pub struct AutoswapSettings {
    pub token: Address,
    pub pair: Address,
    pub router: Address,
    pub check_interval: Duration,
    /// Minimum contract balance in wei before a swap is considered
    pub swap_threshold: BigUint,
    pub history_length: usize,
    pub max_volume_blocks: u64,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

fn parse_address(value: &str, field: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|e| OrchestratorError::Config(format!("{}: {}", field, e)))
}

impl AutoswapSettings {
    pub fn from_config(config: &SystemConfig) -> Result<Self> {
        let contracts = &config.contracts;
        let autoswap = &config.autoswap;

        Ok(Self {
            token: parse_address(&contracts.token_address, "token_address")?,
            pair: parse_address(&contracts.pair_address, "pair_address")?,
            router: parse_address(&contracts.router_address, "router_address")?,
            check_interval: Duration::from_millis(autoswap.check_interval_ms),
            swap_threshold: parse_units(&autoswap.swap_threshold_tokens, TOKEN_DECIMALS)?,
            history_length: autoswap.history_length,
            max_volume_blocks: autoswap.max_volume_blocks,
            confirmation_timeout: Duration::from_secs(autoswap.confirmation_timeout_seconds),
            receipt_poll_interval: Duration::from_millis(RECEIPT_POLL_INTERVAL_MS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions_keep_message() {
        let err: OrchestratorError = ChainClientError::BlockNotFound(7).into();
        assert!(matches!(err, OrchestratorError::ChainClient(ref m) if m.contains('7')));

        let err: OrchestratorError = StrategyError::InvalidAmount("x".to_string()).into();
        assert!(matches!(err, OrchestratorError::Strategy(_)));
    }

    #[test]
    fn test_settings_from_default_config() {
        let mut config = SystemConfig::default();
        config.contracts.token_address = format!("0x{}", "11".repeat(20));
        config.contracts.pair_address = format!("0x{}", "22".repeat(20));
        config.autoswap.swap_threshold_tokens = "1500".to_string();

        let settings = AutoswapSettings::from_config(&config).unwrap();
        assert_eq!(settings.token, Address::repeat_byte(0x11));
        assert_eq!(
            settings.swap_threshold,
            BigUint::from(1500u32) * BigUint::from(10u8).pow(18)
        );
        assert_eq!(settings.history_length, config.autoswap.history_length);
    }

    #[test]
    fn test_settings_reject_bad_threshold() {
        let mut config = SystemConfig::default();
        config.contracts.token_address = format!("0x{}", "11".repeat(20));
        config.contracts.pair_address = format!("0x{}", "22".repeat(20));
        config.autoswap.swap_threshold_tokens = "lots".to_string();

        assert!(matches!(
            AutoswapSettings::from_config(&config),
            Err(OrchestratorError::Strategy(_))
        ));
    }
}
