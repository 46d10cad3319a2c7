#![allow(dead_code)]

use async_trait::async_trait;
use chain_client::contracts::{biguint_to_u256, SwapEvent};
use chain_client::{
    Address, Bytes, ChainClient, ChainClientError, Log, LogFilter, SwapSigner,
    TransactionReceipt, H256, U256, U64,
};
use ethers::abi::{encode, Token};
use ethers::contract::EthEvent;
use job_orchestrator::AutoswapSettings;
use num_bigint::BigUint;
use persistence_layer::{
    CharityContribution, EventStore, FarmEventRecord, FeedItem, MemoryEventStore,
    PersistenceError, PriceSample, SwapEventRecord, TransferRecord,
};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE_TIMESTAMP: u64 = 1_700_000_000;

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn tx(n: u64) -> H256 {
    H256::from_low_u64_be(n)
}

/// Hash the mock signer returns for every swap
pub fn swap_tx() -> H256 {
    tx(0x5a9)
}

/// Hex form used in stored records
pub fn hex<T: Debug>(value: T) -> String {
    format!("{:?}", value)
}

pub fn token() -> Address {
    addr(0x10)
}
pub fn pair() -> Address {
    addr(0x30)
}
pub fn router() -> Address {
    addr(0x40)
}
pub fn wbnb() -> Address {
    addr(0x50)
}

pub fn tokens(whole: u64) -> BigUint {
    BigUint::from(whole) * BigUint::from(10u8).pow(18)
}

pub fn settings() -> AutoswapSettings {
    AutoswapSettings {
        token: token(),
        pair: pair(),
        router: router(),
        check_interval: Duration::from_millis(20),
        swap_threshold: tokens(1000),
        history_length: 60,
        max_volume_blocks: 1000,
        confirmation_timeout: Duration::from_millis(50),
        receipt_poll_interval: Duration::from_millis(5),
    }
}

pub fn swap_log(
    sender: Address,
    amounts: [BigUint; 4],
    block: u64,
    tx_hash: H256,
    index: u64,
) -> Log {
    let words: Vec<Token> = amounts
        .iter()
        .map(|amount| Token::Uint(biguint_to_u256(amount).unwrap()))
        .collect();
    Log {
        address: pair(),
        topics: vec![
            SwapEvent::signature(),
            H256::from(sender),
            H256::from(addr(0x77)),
        ],
        data: encode(&words).into(),
        block_number: Some(U64::from(block)),
        transaction_hash: Some(tx_hash),
        log_index: Some(U256::from(index)),
        removed: Some(false),
        ..Default::default()
    }
}

fn unavailable() -> ChainClientError {
    ChainClientError::Provider("503 Service Unavailable".to_string())
}

/// Pair, token and receipts for one trading pair
pub struct MockChain {
    pub head: AtomicU64,
    pub pair_tokens: Mutex<(Address, Address)>,
    pub reserves: Mutex<(BigUint, BigUint)>,
    pub balance: Mutex<BigUint>,
    pub fail_balance: AtomicBool,
    pub fail_get_logs: AtomicBool,
    logs: Mutex<Vec<Log>>,
    receipts: Mutex<HashMap<H256, TransactionReceipt>>,
    pub ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockChain {
    /// Token is token0; 1,000,000 tokens against 10 BNB
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            head: AtomicU64::new(2000),
            pair_tokens: Mutex::new((token(), wbnb())),
            reserves: Mutex::new((tokens(1_000_000), tokens(10))),
            balance: Mutex::new(BigUint::default()),
            fail_balance: AtomicBool::new(false),
            fail_get_logs: AtomicBool::new(false),
            logs: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            ranges: Mutex::new(Vec::new()),
        })
    }

    pub fn set_balance(&self, amount: BigUint) {
        *self.balance.lock().unwrap() = amount;
    }

    pub fn add_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn add_receipt(&self, tx_hash: H256, from: Address, status: u64) {
        self.receipts.lock().unwrap().insert(
            tx_hash,
            TransactionReceipt {
                transaction_hash: tx_hash,
                from,
                block_number: Some(U64::from(123)),
                status: Some(U64::from(status)),
                ..Default::default()
            },
        );
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> chain_client::Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, filter: &LogFilter) -> chain_client::Result<Vec<Log>> {
        self.ranges
            .lock()
            .unwrap()
            .push((filter.from_block, filter.to_block));

        if self.fail_get_logs.load(Ordering::SeqCst) {
            return Err(unavailable());
        }

        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.address == filter.address)
            .filter(|l| l.topics.first() == Some(&filter.topic0))
            .filter(|l| match l.block_number {
                Some(b) => b.as_u64() >= filter.from_block && b.as_u64() <= filter.to_block,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, number: u64) -> chain_client::Result<u64> {
        Ok(BASE_TIMESTAMP + number * 3)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> chain_client::Result<Option<TransactionReceipt>> {
        Ok(self.receipts.lock().unwrap().get(&tx_hash).cloned())
    }

    async fn pair_reserves(&self, _pair: Address) -> chain_client::Result<(BigUint, BigUint)> {
        Ok(self.reserves.lock().unwrap().clone())
    }

    async fn pair_tokens(&self, _pair: Address) -> chain_client::Result<(Address, Address)> {
        Ok(*self.pair_tokens.lock().unwrap())
    }

    async fn balance_of(&self, token: Address, _holder: Address) -> chain_client::Result<BigUint> {
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        if token != self::token() {
            return Err(ChainClientError::Rpc {
                code: 3,
                message: format!("unexpected call to {:?}", token),
            });
        }
        Ok(self.balance.lock().unwrap().clone())
    }
}

pub enum SignerMode {
    /// Mined with the given receipt status
    Mined(u64),
    /// Accepted but never mined
    Pending,
    Rejected,
}

pub struct MockSigner {
    pub chain: Arc<MockChain>,
    pub mode: SignerMode,
    pub sent: Mutex<Vec<(Address, Bytes)>>,
}

impl MockSigner {
    pub fn new(chain: Arc<MockChain>, mode: SignerMode) -> Self {
        Self {
            chain,
            mode,
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SwapSigner for MockSigner {
    fn address(&self) -> Address {
        addr(0xee)
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> chain_client::Result<H256> {
        if let SignerMode::Rejected = self.mode {
            return Err(ChainClientError::Rpc {
                code: -32000,
                message: "caller is not the owner".to_string(),
            });
        }

        self.sent.lock().unwrap().push((to, data));
        if let SignerMode::Mined(status) = self.mode {
            self.chain.add_receipt(swap_tx(), self.address(), status);
        }
        Ok(swap_tx())
    }
}

/// Memory store that refuses price samples
#[derive(Default)]
pub struct PriceFailStore {
    pub inner: MemoryEventStore,
}

#[async_trait]
impl EventStore for PriceFailStore {
    async fn get_last_block(&self) -> persistence_layer::Result<Option<u64>> {
        self.inner.get_last_block().await
    }
    async fn set_last_block(&self, block_number: u64) -> persistence_layer::Result<()> {
        self.inner.set_last_block(block_number).await
    }
    async fn insert_transfer(&self, t: &TransferRecord) -> persistence_layer::Result<bool> {
        self.inner.insert_transfer(t).await
    }
    async fn insert_charity(&self, c: &CharityContribution) -> persistence_layer::Result<bool> {
        self.inner.insert_charity(c).await
    }
    async fn insert_farm_event(&self, e: &FarmEventRecord) -> persistence_layer::Result<bool> {
        self.inner.insert_farm_event(e).await
    }
    async fn insert_swap_event(&self, s: &SwapEventRecord) -> persistence_layer::Result<bool> {
        self.inner.insert_swap_event(s).await
    }
    async fn insert_price(&self, _p: &PriceSample) -> persistence_layer::Result<()> {
        Err(PersistenceError::Unavailable("price table offline".to_string()))
    }
    async fn get_recent_prices(&self, limit: usize) -> persistence_layer::Result<Vec<PriceSample>> {
        self.inner.get_recent_prices(limit).await
    }
    async fn get_last_swap_block(&self) -> persistence_layer::Result<u64> {
        self.inner.get_last_swap_block().await
    }
    async fn insert_feed(&self, item: &FeedItem) -> persistence_layer::Result<()> {
        self.inner.insert_feed(item).await
    }
}
