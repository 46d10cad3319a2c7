//! Contract ABIs: the events the listener ingests and the calls the tracker
//! and orchestrator make.

use ethers::abi::{parse_abi, RawLog};
use ethers::contract::{BaseContract, EthEvent, EthLogDecode};
use ethers::types::{Address, Bytes, Log, U256};
use num_bigint::BigUint;

use crate::{ChainClientError, Result};

#[derive(Clone, Debug, PartialEq, EthEvent)]
#[ethevent(name = "Transfer", abi = "Transfer(address,address,uint256)")]
pub struct TransferEvent {
    #[ethevent(indexed)]
    pub from: Address,
    #[ethevent(indexed)]
    pub to: Address,
    pub value: U256,
}

#[derive(Clone, Debug, PartialEq, EthEvent)]
#[ethevent(name = "Deposit", abi = "Deposit(address,uint256,uint256)")]
pub struct DepositEvent {
    #[ethevent(indexed)]
    pub user: Address,
    #[ethevent(indexed)]
    pub pid: U256,
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, EthEvent)]
#[ethevent(name = "Withdraw", abi = "Withdraw(address,uint256,uint256)")]
pub struct WithdrawEvent {
    #[ethevent(indexed)]
    pub user: Address,
    #[ethevent(indexed)]
    pub pid: U256,
    pub amount: U256,
}

/// `carry` is the reward left pending in the farm after the harvest
#[derive(Clone, Debug, PartialEq, EthEvent)]
#[ethevent(name = "Harvest", abi = "Harvest(address,uint256,uint256,uint256)")]
pub struct HarvestEvent {
    #[ethevent(indexed)]
    pub user: Address,
    #[ethevent(indexed)]
    pub pid: U256,
    pub amount: U256,
    pub carry: U256,
}

#[derive(Clone, Debug, PartialEq, EthEvent)]
#[ethevent(name = "Donated", abi = "Donated(uint256,uint256,address,uint256)")]
pub struct DonatedEvent {
    pub tokens_sold: U256,
    pub bnb_sent: U256,
    #[ethevent(indexed)]
    pub to: Address,
    pub timestamp: U256,
}

/// PancakeSwap v2 pair Swap event
#[derive(Clone, Debug, PartialEq, EthEvent)]
#[ethevent(name = "Swap", abi = "Swap(address,uint256,uint256,uint256,uint256,address)")]
pub struct SwapEvent {
    #[ethevent(indexed)]
    pub sender: Address,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
    #[ethevent(indexed)]
    pub to: Address,
}

const PAIR_ABI: &[&str] = &[
    "function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast)",
    "function token0() external view returns (address)",
    "function token1() external view returns (address)",
];

const TOKEN_ABI: &[&str] = &[
    "function balanceOf(address account) external view returns (uint256)",
    "function swapAndDonate(uint256 amount) external",
];

fn contract(abi: &[&str]) -> Result<BaseContract> {
    parse_abi(abi)
        .map(BaseContract::from)
        .map_err(|e| ChainClientError::Abi(e.to_string()))
}

pub fn pair_abi() -> Result<BaseContract> {
    contract(PAIR_ABI)
}

pub fn token_abi() -> Result<BaseContract> {
    contract(TOKEN_ABI)
}

/// Decode a log body as event `E`. Fails on a topic0 mismatch, a wrong
/// topic count or short data.
pub fn decode_event<E: EthLogDecode>(log: &Log) -> std::result::Result<E, ethers::abi::Error> {
    let raw_log = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    E::decode_log(&raw_log)
}

/// Calldata for `swapAndDonate(amount)` on the token contract
pub fn swap_and_donate_call(amount: &BigUint) -> Result<Bytes> {
    token_abi()?
        .encode("swapAndDonate", biguint_to_u256(amount)?)
        .map_err(|e| ChainClientError::Abi(e.to_string()))
}

pub fn u256_to_biguint(value: U256) -> BigUint {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    BigUint::from_bytes_be(&buf)
}

pub fn biguint_to_u256(value: &BigUint) -> Result<U256> {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return Err(ChainClientError::Abi(format!(
            "value does not fit in uint256: {}",
            value
        )));
    }
    Ok(U256::from_big_endian(&bytes))
}

/// Narrow an ABI integer that must fit in 64 bits
pub fn u256_to_u64(value: U256) -> Option<u64> {
    if value > U256::from(u64::MAX) {
        None
    } else {
        Some(value.low_u64())
    }
}
