//! Typed decoding of the contract events the listener ingests.
//!
//! Every required field is checked here; a log that fails any check becomes a
//! `DecodeError` and is dropped by the caller instead of reaching the store.

use chain_client::contracts::{
    decode_event, u256_to_biguint, u256_to_u64, DepositEvent, DonatedEvent, HarvestEvent,
    SwapEvent, TransferEvent, WithdrawEvent,
};
use chain_client::{Address, Log, H256, U256};
use ethers::contract::EthEvent;
use num_bigint::BigUint;
use persistence_layer::FarmEventType;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("log was removed by a reorg")]
    Removed,
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("unexpected topic0")]
    WrongTopic,
    #[error("malformed {0}")]
    Malformed(&'static str),
    #[error("abi decode failed: {0}")]
    Abi(String),
}

/// Event categories fetched on every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Transfer,
    Deposit,
    Withdraw,
    Harvest,
    Donated,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Transfer,
        EventKind::Deposit,
        EventKind::Withdraw,
        EventKind::Harvest,
        EventKind::Donated,
    ];

    pub fn topic(&self) -> H256 {
        match self {
            EventKind::Transfer => TransferEvent::signature(),
            EventKind::Deposit => DepositEvent::signature(),
            EventKind::Withdraw => WithdrawEvent::signature(),
            EventKind::Harvest => HarvestEvent::signature(),
            EventKind::Donated => DonatedEvent::signature(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Transfer => "transfer",
            EventKind::Deposit => "deposit",
            EventKind::Withdraw => "withdraw",
            EventKind::Harvest => "harvest",
            EventKind::Donated => "donated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    Transfer {
        from: Address,
        to: Address,
        value: BigUint,
    },
    Farm {
        event_type: FarmEventType,
        user: Address,
        pool_id: u64,
        amount: BigUint,
    },
    Donated {
        tokens_sold: BigUint,
        bnb_sent: BigUint,
        to: Address,
        /// Contract-reported timestamp; the block timestamp is authoritative
        timestamp: u64,
    },
}

/// A validated log with its chain position
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub tx_hash: H256,
    pub log_index: u64,
    pub block_number: u64,
    pub event: ChainEvent,
}

impl DecodedLog {
    /// Transaction hash as stored in ledger rows
    pub fn tx_hash_hex(&self) -> String {
        format!("{:?}", self.tx_hash)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapLog {
    pub sender: Address,
    pub amount0_in: BigUint,
    pub amount1_in: BigUint,
    pub amount0_out: BigUint,
    pub amount1_out: BigUint,
    pub to: Address,
}

/// Log position within the chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogPosition {
    pub tx_hash: H256,
    pub log_index: u64,
    pub block_number: u64,
}

fn check_topic(log: &Log, expected: H256) -> Result<(), DecodeError> {
    match log.topics.first() {
        Some(topic0) if *topic0 == expected => Ok(()),
        Some(_) => Err(DecodeError::WrongTopic),
        None => Err(DecodeError::MissingField("topic0")),
    }
}

fn decode<E: EthEvent>(log: &Log) -> Result<E, DecodeError> {
    check_topic(log, E::signature())?;
    decode_event(log).map_err(|e| DecodeError::Abi(e.to_string()))
}

fn narrow(value: U256, field: &'static str) -> Result<u64, DecodeError> {
    u256_to_u64(value).ok_or(DecodeError::Malformed(field))
}

/// Position fields pending logs lack
pub fn position(log: &Log) -> Result<LogPosition, DecodeError> {
    if log.removed == Some(true) {
        return Err(DecodeError::Removed);
    }
    let tx_hash = log
        .transaction_hash
        .ok_or(DecodeError::MissingField("transactionHash"))?;
    let log_index = log
        .log_index
        .ok_or(DecodeError::MissingField("logIndex"))
        .and_then(|index| narrow(index, "logIndex"))?;
    let block_number = log
        .block_number
        .ok_or(DecodeError::MissingField("blockNumber"))?
        .as_u64();
    Ok(LogPosition {
        tx_hash,
        log_index,
        block_number,
    })
}

fn farm_event(event_type: FarmEventType, user: Address, pid: U256, amount: U256) -> Result<ChainEvent, DecodeError> {
    Ok(ChainEvent::Farm {
        event_type,
        user,
        pool_id: narrow(pid, "pid")?,
        amount: u256_to_biguint(amount),
    })
}

pub fn decode_log(kind: EventKind, log: &Log) -> Result<DecodedLog, DecodeError> {
    let position = position(log)?;

    let event = match kind {
        EventKind::Transfer => {
            let event: TransferEvent = decode(log)?;
            ChainEvent::Transfer {
                from: event.from,
                to: event.to,
                value: u256_to_biguint(event.value),
            }
        }
        EventKind::Deposit => {
            let event: DepositEvent = decode(log)?;
            farm_event(FarmEventType::Deposit, event.user, event.pid, event.amount)?
        }
        EventKind::Withdraw => {
            let event: WithdrawEvent = decode(log)?;
            farm_event(FarmEventType::Withdraw, event.user, event.pid, event.amount)?
        }
        EventKind::Harvest => {
            let event: HarvestEvent = decode(log)?;
            farm_event(FarmEventType::Harvest, event.user, event.pid, event.amount)?
        }
        EventKind::Donated => {
            let event: DonatedEvent = decode(log)?;
            ChainEvent::Donated {
                tokens_sold: u256_to_biguint(event.tokens_sold),
                bnb_sent: u256_to_biguint(event.bnb_sent),
                to: event.to,
                timestamp: narrow(event.timestamp, "timestamp")?,
            }
        }
    };

    Ok(DecodedLog {
        tx_hash: position.tx_hash,
        log_index: position.log_index,
        block_number: position.block_number,
        event,
    })
}

/// Decode a pair `Swap` event body; position fields are not required here
pub fn decode_swap(log: &Log) -> Result<SwapLog, DecodeError> {
    let event: SwapEvent = decode(log)?;
    Ok(SwapLog {
        sender: event.sender,
        amount0_in: u256_to_biguint(event.amount0_in),
        amount1_in: u256_to_biguint(event.amount1_in),
        amount0_out: u256_to_biguint(event.amount0_out),
        amount1_out: u256_to_biguint(event.amount1_out),
        to: event.to,
    })
}

/// Swap with its chain position, for volume tracking
pub fn decode_positioned_swap(log: &Log) -> Result<(LogPosition, SwapLog), DecodeError> {
    let position = position(log)?;
    Ok((position, decode_swap(log)?))
}
