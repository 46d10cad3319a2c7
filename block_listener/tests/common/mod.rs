#![allow(dead_code)]

use async_trait::async_trait;
use block_listener::{EventKind, ListenerSettings, WindowParams};
use chain_client::contracts::{biguint_to_u256, SwapEvent};
use chain_client::{
    Address, ChainClient, ChainClientError, Log, LogFilter, TransactionReceipt, H256, U256, U64,
};
use ethers::abi::{encode, Token};
use ethers::contract::EthEvent;
use num_bigint::BigUint;
use persistence_layer::{
    CharityContribution, EventStore, FarmEventRecord, FeedItem, MemoryEventStore,
    PersistenceError, PriceSample, SwapEventRecord, TransferRecord,
};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE_TIMESTAMP: u64 = 1_700_000_000;

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn tx(n: u64) -> H256 {
    H256::from_low_u64_be(n)
}

/// Full lowercase hex, as stored in ledger rows
pub fn hex<T: Debug>(value: T) -> String {
    format!("{:?}", value)
}

pub fn token() -> Address {
    addr(0x10)
}
pub fn masterchef() -> Address {
    addr(0x20)
}
pub fn pair() -> Address {
    addr(0x30)
}
pub fn router() -> Address {
    addr(0x40)
}

pub fn tokens(whole: u64) -> BigUint {
    BigUint::from(whole) * BigUint::from(10u8).pow(18)
}

pub fn settings() -> ListenerSettings {
    ListenerSettings {
        token: token(),
        masterchef: masterchef(),
        pair: pair(),
        router: router(),
        wbnb: addr(0x50),
        bnb_usd_pair: addr(0x60),
        window: WindowParams {
            confirmation_depth: 10,
            backfill_window: 50,
            max_batch_blocks: 100,
            start_block: 0,
        },
        poll_interval: Duration::from_millis(10),
        large_transfer_threshold: tokens(1000),
        leader_lock_ttl_seconds: 60,
    }
}

fn log(address: Address, topics: Vec<H256>, words: &[BigUint], block: u64, tx_hash: H256, index: u64) -> Log {
    let words: Vec<Token> = words
        .iter()
        .map(|w| Token::Uint(biguint_to_u256(w).unwrap()))
        .collect();
    Log {
        address,
        topics,
        data: encode(&words).into(),
        block_number: Some(U64::from(block)),
        transaction_hash: Some(tx_hash),
        log_index: Some(U256::from(index)),
        removed: Some(false),
        ..Default::default()
    }
}

pub fn transfer_log(from: Address, to: Address, value: BigUint, block: u64, tx_hash: H256, index: u64) -> Log {
    log(
        token(),
        vec![EventKind::Transfer.topic(), H256::from(from), H256::from(to)],
        &[value],
        block,
        tx_hash,
        index,
    )
}

pub fn deposit_log(user: Address, pool_id: u64, amount: BigUint, block: u64, tx_hash: H256, index: u64) -> Log {
    log(
        masterchef(),
        vec![
            EventKind::Deposit.topic(),
            H256::from(user),
            H256::from_low_u64_be(pool_id),
        ],
        &[amount],
        block,
        tx_hash,
        index,
    )
}

pub fn donated_log(tokens_sold: BigUint, bnb_sent: BigUint, to: Address, block: u64, tx_hash: H256, index: u64) -> Log {
    log(
        token(),
        vec![EventKind::Donated.topic(), H256::from(to)],
        &[tokens_sold, bnb_sent, BigUint::from(BASE_TIMESTAMP)],
        block,
        tx_hash,
        index,
    )
}

pub fn swap_log(sender: Address, block: u64, tx_hash: H256, index: u64) -> Log {
    log(
        pair(),
        vec![
            SwapEvent::signature(),
            H256::from(sender),
            H256::from(addr(0x77)),
        ],
        &[
            BigUint::from(0u8),
            tokens(1),
            tokens(5000),
            BigUint::from(0u8),
        ],
        block,
        tx_hash,
        index,
    )
}

/// In-memory chain with call counters
#[derive(Default)]
pub struct MockChain {
    pub head: AtomicU64,
    logs: Mutex<Vec<Log>>,
    receipts: Mutex<HashMap<H256, TransactionReceipt>>,
    failing_timestamps: Mutex<HashSet<u64>>,
    pub fail_get_logs: AtomicBool,
    pub receipt_calls: AtomicUsize,
    pub ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.head.store(head, Ordering::SeqCst);
        Arc::new(chain)
    }

    pub fn add_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn add_receipt(&self, tx_hash: H256, from: Address, logs: Vec<Log>) {
        self.receipts.lock().unwrap().insert(
            tx_hash,
            TransactionReceipt {
                transaction_hash: tx_hash,
                from,
                status: Some(U64::from(1)),
                logs,
                ..Default::default()
            },
        );
    }

    pub fn fail_timestamp(&self, block: u64) {
        self.failing_timestamps.lock().unwrap().insert(block);
    }

    pub fn receipt_calls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> chain_client::Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, filter: &LogFilter) -> chain_client::Result<Vec<Log>> {
        if self.fail_get_logs.load(Ordering::SeqCst) {
            return Err(ChainClientError::Provider("503 Service Unavailable".to_string()));
        }
        self.ranges
            .lock()
            .unwrap()
            .push((filter.from_block, filter.to_block));

        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.address == filter.address)
            .filter(|l| l.topics.first() == Some(&filter.topic0))
            .filter(|l| match l.block_number.map(|b| b.as_u64()) {
                Some(b) => b >= filter.from_block && b <= filter.to_block,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, number: u64) -> chain_client::Result<u64> {
        if self.failing_timestamps.lock().unwrap().contains(&number) {
            return Err(ChainClientError::BlockNotFound(number));
        }
        Ok(BASE_TIMESTAMP + number * 3)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> chain_client::Result<Option<TransactionReceipt>> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipts.lock().unwrap().get(&tx_hash).cloned())
    }

    async fn pair_reserves(&self, pair: Address) -> chain_client::Result<(BigUint, BigUint)> {
        Err(no_contract(pair))
    }

    async fn pair_tokens(&self, pair: Address) -> chain_client::Result<(Address, Address)> {
        Err(no_contract(pair))
    }

    async fn balance_of(&self, token: Address, _holder: Address) -> chain_client::Result<BigUint> {
        Err(no_contract(token))
    }
}

fn no_contract(address: Address) -> ChainClientError {
    ChainClientError::Rpc {
        code: 3,
        message: format!("no contract at {:?}", address),
    }
}

/// Memory store whose transfer inserts fail for selected transactions
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryEventStore,
    failing_transfers: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn fail_transfers_for(&self, tx_hash: H256) {
        self.failing_transfers.lock().unwrap().insert(hex(tx_hash));
    }

    pub fn heal(&self) {
        self.failing_transfers.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn get_last_block(&self) -> persistence_layer::Result<Option<u64>> {
        self.inner.get_last_block().await
    }
    async fn set_last_block(&self, block_number: u64) -> persistence_layer::Result<()> {
        self.inner.set_last_block(block_number).await
    }
    async fn insert_transfer(&self, transfer: &TransferRecord) -> persistence_layer::Result<bool> {
        let failing = self
            .failing_transfers
            .lock()
            .unwrap()
            .contains(&transfer.tx_hash);
        if failing {
            return Err(PersistenceError::Unavailable("injected failure".to_string()));
        }
        self.inner.insert_transfer(transfer).await
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
    async fn insert_price(&self, p: &PriceSample) -> persistence_layer::Result<()> {
        self.inner.insert_price(p).await
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
