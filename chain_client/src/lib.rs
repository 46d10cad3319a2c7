// EVM client for the token, farm and pair contracts

use async_trait::async_trait;
use ethers::abi::{Detokenize, Tokenize};
use ethers::contract::BaseContract;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{BlockNumber, TransactionRequest};
use num_bigint::BigUint;
use retry_utils::{retry_with_backoff, Classify, RetryConfig, RetryableError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub mod contracts;
pub mod signer;
pub mod types;

pub use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256, U64};
pub use signer::{SwapSigner, WalletSigner};
pub use types::{parse_logs, receipt_succeeded, LogFilter};

use contracts::{pair_abi, token_abi, u256_to_biguint, u256_to_u64};

#[derive(Error, Debug)]
pub enum ChainClientError {
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("ABI error: {0}")]
    Abi(String),
    #[error("Block {0} not found")]
    BlockNotFound(u64),
    #[error("Signer error: {0}")]
    Signer(String),
}

impl From<ProviderError> for ChainClientError {
    fn from(err: ProviderError) -> Self {
        match err.as_error_response() {
            Some(response) => ChainClientError::Rpc {
                code: response.code,
                message: response.message.clone(),
            },
            None => ChainClientError::Provider(err.to_string()),
        }
    }
}

impl Classify for ChainClientError {
    fn classify(&self) -> RetryableError {
        match self {
            ChainClientError::Provider(message) => {
                let message = message.to_lowercase();
                if message.contains("429") || message.contains("too many requests") {
                    RetryableError::RateLimit
                } else if message.contains("deserialization") || message.contains("invalid type") {
                    RetryableError::Fatal
                } else {
                    RetryableError::Transient
                }
            }
            ChainClientError::Rpc { code, message } => {
                let message = message.to_lowercase();
                if *code == -32005 || message.contains("limit") || message.contains("too many") {
                    RetryableError::RateLimit
                } else if message.contains("header not found") || message.contains("timeout") {
                    RetryableError::Transient
                } else {
                    RetryableError::Fatal
                }
            }
            // A block the node has not indexed yet may show up on the next attempt
            ChainClientError::BlockNotFound(_) => RetryableError::Transient,
            ChainClientError::InvalidResponse(_)
            | ChainClientError::Abi(_)
            | ChainClientError::Signer(_) => RetryableError::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainClientError>;

/// Read access to the chain. Everything the listener, tracker and
/// orchestrator need goes through this seam so tests can substitute it.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    /// Logs for one contract and topic0. Entries the node returns in a shape
    /// that does not parse are skipped, never failing the whole range.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>>;

    async fn block_timestamp(&self, number: u64) -> Result<u64>;

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>>;

    /// `getReserves()` on a v2 pair as (reserve0, reserve1)
    async fn pair_reserves(&self, pair: Address) -> Result<(BigUint, BigUint)>;

    /// `token0()` and `token1()` on a v2 pair
    async fn pair_tokens(&self, pair: Address) -> Result<(Address, Address)>;

    /// ERC-20 `balanceOf(holder)`
    async fn balance_of(&self, token: Address, holder: Address) -> Result<BigUint>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainClientConfig {
    pub rpc_url: String,
    /// Request timeout in seconds; a hung call surfaces as a transient error
    pub rpc_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for ChainClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://bsc-dataseed.binance.org".to_string(),
            rpc_timeout_seconds: 30,
            max_retries: 3,
            retry_base_delay_ms: 250,
        }
    }
}

/// JSON-RPC over HTTP through an ethers provider
#[derive(Clone)]
pub struct RpcChainClient {
    provider: Provider<Http>,
    retry: RetryConfig,
    pair: BaseContract,
    token: BaseContract,
}

impl RpcChainClient {
    pub fn new(config: &ChainClientConfig) -> Result<Self> {
        let url = reqwest::Url::parse(&config.rpc_url)
            .map_err(|e| ChainClientError::InvalidResponse(format!("rpc_url: {}", e)))?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_seconds))
            .build()
            .map_err(|e| ChainClientError::Provider(e.to_string()))?;

        Ok(Self {
            provider: Provider::new(Http::new_with_client(url, http_client)),
            retry: RetryConfig::new(config.max_retries, config.retry_base_delay_ms),
            pair: pair_abi()?,
            token: token_abi()?,
        })
    }

    /// Underlying provider, for building a signing client on the same endpoint
    pub fn provider(&self) -> Provider<Http> {
        self.provider.clone()
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let id = retry_with_backoff("eth_chainId", &self.retry, || {
            let provider = self.provider.clone();
            async move { provider.get_chainid().await.map_err(ChainClientError::from) }
        })
        .await?;
        u256_to_u64(id).ok_or_else(|| ChainClientError::InvalidResponse(format!("chain id {}", id)))
    }

    /// eth_call of `function` on `to` against the latest block
    async fn view<A, D>(&self, to: Address, contract: &BaseContract, function: &str, args: A) -> Result<D>
    where
        A: Tokenize,
        D: Detokenize,
    {
        let data = contract
            .encode(function, args)
            .map_err(|e| ChainClientError::Abi(e.to_string()))?;
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();

        let output = retry_with_backoff(function, &self.retry, || {
            let provider = self.provider.clone();
            let tx = tx.clone();
            async move { provider.call(&tx, None).await.map_err(ChainClientError::from) }
        })
        .await?;

        if output.is_empty() {
            warn!("{} on {:?} returned empty data", function, to);
        }
        contract
            .decode_output(function, output)
            .map_err(|e| ChainClientError::Abi(format!("{} on {:?}: {}", function, to, e)))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn block_number(&self) -> Result<u64> {
        let number = retry_with_backoff("eth_blockNumber", &self.retry, || {
            let provider = self.provider.clone();
            async move { provider.get_block_number().await.map_err(ChainClientError::from) }
        })
        .await?;
        Ok(number.as_u64())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let query = filter.to_filter();
        let values: Vec<Value> = retry_with_backoff("eth_getLogs", &self.retry, || {
            let provider = self.provider.clone();
            let query = query.clone();
            async move {
                provider
                    .request::<_, Vec<Value>>("eth_getLogs", [query])
                    .await
                    .map_err(ChainClientError::from)
            }
        })
        .await?;

        let (logs, skipped) = parse_logs(values);
        debug!(
            "eth_getLogs {:?} [{}, {}] returned {} logs ({} skipped)",
            filter.address,
            filter.from_block,
            filter.to_block,
            logs.len(),
            skipped
        );
        Ok(logs)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        let block = retry_with_backoff("eth_getBlockByNumber", &self.retry, || {
            let provider = self.provider.clone();
            async move {
                match provider.get_block(BlockNumber::Number(U64::from(number))).await {
                    Ok(Some(block)) => Ok(block),
                    Ok(None) => Err(ChainClientError::BlockNotFound(number)),
                    Err(e) => Err(ChainClientError::from(e)),
                }
            }
        })
        .await?;

        u256_to_u64(block.timestamp).ok_or_else(|| {
            ChainClientError::InvalidResponse(format!(
                "block {} timestamp {} out of range",
                number, block.timestamp
            ))
        })
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        retry_with_backoff("eth_getTransactionReceipt", &self.retry, || {
            let provider = self.provider.clone();
            async move {
                provider
                    .get_transaction_receipt(tx_hash)
                    .await
                    .map_err(ChainClientError::from)
            }
        })
        .await
    }

    async fn pair_reserves(&self, pair: Address) -> Result<(BigUint, BigUint)> {
        let (reserve0, reserve1, _): (U256, U256, U256) =
            self.view(pair, &self.pair, "getReserves", ()).await?;
        Ok((u256_to_biguint(reserve0), u256_to_biguint(reserve1)))
    }

    async fn pair_tokens(&self, pair: Address) -> Result<(Address, Address)> {
        let token0: Address = self.view(pair, &self.pair, "token0", ()).await?;
        let token1: Address = self.view(pair, &self.pair, "token1", ()).await?;
        Ok((token0, token1))
    }

    async fn balance_of(&self, token: Address, holder: Address) -> Result<BigUint> {
        let balance: U256 = self.view(token, &self.token, "balanceOf", holder).await?;
        Ok(u256_to_biguint(balance))
    }
}
