use chain_client::{Address, ChainClient, H256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::decoder::decode_swap;

/// Maps the apparent counterparty of a transfer or swap to the account that
/// actually traded. Attribution is best-effort: every failure falls back to
/// the apparent address.
#[derive(Clone)]
pub struct TraderResolver {
    client: Arc<dyn ChainClient>,
    pair: Address,
    router: Address,
}

impl TraderResolver {
    pub fn new(client: Arc<dyn ChainClient>, pair: Address, router: Address) -> Self {
        Self {
            client,
            pair,
            router,
        }
    }

    /// Trader behind a token transfer. Only transfers out of the pair need a
    /// receipt lookup; anything else is returned unchanged.
    pub async fn resolve_transfer(&self, tx_hash: H256, apparent_from: Address) -> Address {
        if apparent_from != self.pair {
            return apparent_from;
        }

        let receipt = match self.client.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                warn!("No receipt for {:?}, keeping pair as trader", tx_hash);
                return apparent_from;
            }
            Err(e) => {
                warn!("Receipt lookup failed for {:?}: {}, keeping pair as trader", tx_hash, e);
                return apparent_from;
            }
        };

        let swap = receipt
            .logs
            .iter()
            .filter(|log| log.address == self.pair)
            .find_map(|log| decode_swap(log).ok());

        match swap {
            Some(swap) => {
                let trader = self.actor(swap.sender, receipt.from);
                debug!("Resolved trader for {:?}: {:?}", tx_hash, trader);
                trader
            }
            None => {
                warn!("No Swap log from pair in {:?}, keeping pair as trader", tx_hash);
                apparent_from
            }
        }
    }

    /// Economic actor for a pair Swap event. Router-originated swaps are
    /// attributed to the transaction signer; direct swaps keep their sender.
    pub async fn resolve_swap_sender(&self, tx_hash: H256, sender: Address) -> Address {
        if sender != self.router {
            return sender;
        }

        match self.client.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => receipt.from,
            Ok(None) => {
                warn!("No receipt for swap {:?}, keeping router as sender", tx_hash);
                sender
            }
            Err(e) => {
                warn!("Receipt lookup failed for swap {:?}: {}", tx_hash, e);
                sender
            }
        }
    }

    fn actor(&self, swap_sender: Address, signer: Address) -> Address {
        if swap_sender == self.router {
            signer
        } else {
            swap_sender
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_logs::{raw, tx};
    use async_trait::async_trait;
    use chain_client::contracts::SwapEvent;
    use chain_client::{ChainClientError, LogFilter, Log, TransactionReceipt, U64};
    use ethers::contract::EthEvent;
    use num_bigint::BigUint;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    const PAIR: u8 = 0xaa;
    const ROUTER: u8 = 0xbb;
    const SIGNER: u8 = 0x11;

    struct ReceiptClient {
        receipt: Option<TransactionReceipt>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChainClient for ReceiptClient {
        async fn block_number(&self) -> chain_client::Result<u64> {
            Ok(0)
        }
        async fn get_logs(&self, _filter: &LogFilter) -> chain_client::Result<Vec<Log>> {
            Ok(Vec::new())
        }
        async fn block_timestamp(&self, _number: u64) -> chain_client::Result<u64> {
            Ok(0)
        }
        async fn transaction_receipt(
            &self,
            _tx_hash: H256,
        ) -> chain_client::Result<Option<TransactionReceipt>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.receipt.clone())
        }
        async fn pair_reserves(&self, _pair: Address) -> chain_client::Result<(BigUint, BigUint)> {
            Err(ChainClientError::Abi("not supported".to_string()))
        }
        async fn pair_tokens(&self, _pair: Address) -> chain_client::Result<(Address, Address)> {
            Err(ChainClientError::Abi("not supported".to_string()))
        }
        async fn balance_of(&self, _token: Address, _holder: Address) -> chain_client::Result<BigUint> {
            Err(ChainClientError::Abi("not supported".to_string()))
        }
    }

    fn swap_log(sender: Address) -> Log {
        raw(
            addr(PAIR),
            vec![
                SwapEvent::signature(),
                H256::from(sender),
                H256::from(addr(0x22)),
            ],
            &[0, 10, 500, 0],
            950,
            tx(1),
            2,
        )
    }

    fn new_resolver(receipt: Option<TransactionReceipt>) -> (TraderResolver, Arc<ReceiptClient>) {
        let client = Arc::new(ReceiptClient {
            receipt,
            calls: AtomicUsize::new(0),
        });
        (
            TraderResolver::new(client.clone(), addr(PAIR), addr(ROUTER)),
            client,
        )
    }

    fn receipt_with(logs: Vec<Log>) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: tx(1),
            from: addr(SIGNER),
            block_number: Some(U64::from(950)),
            status: Some(U64::from(1)),
            logs,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_non_pair_sender_needs_no_rpc() {
        let (resolver, client) = new_resolver(None);
        assert_eq!(resolver.resolve_transfer(tx(1), addr(0x33)).await, addr(0x33));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_router_swap_resolves_to_signer() {
        let (resolver, client) = new_resolver(Some(receipt_with(vec![swap_log(addr(ROUTER))])));
        assert_eq!(resolver.resolve_transfer(tx(1), addr(PAIR)).await, addr(SIGNER));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_direct_swap_keeps_sender() {
        let (resolver, _) = new_resolver(Some(receipt_with(vec![swap_log(addr(0x44))])));
        assert_eq!(resolver.resolve_transfer(tx(1), addr(PAIR)).await, addr(0x44));
    }

    #[tokio::test]
    async fn test_missing_swap_log_falls_back() {
        let (without_swap, _) = new_resolver(Some(receipt_with(Vec::new())));
        assert_eq!(without_swap.resolve_transfer(tx(1), addr(PAIR)).await, addr(PAIR));

        let (without_receipt, client) = new_resolver(None);
        assert_eq!(without_receipt.resolve_transfer(tx(1), addr(PAIR)).await, addr(PAIR));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_swap_log_from_other_pair_is_ignored() {
        let mut foreign = swap_log(addr(ROUTER));
        foreign.address = addr(0x99);
        let (resolver, _) = new_resolver(Some(receipt_with(vec![foreign])));
        assert_eq!(resolver.resolve_transfer(tx(1), addr(PAIR)).await, addr(PAIR));
    }

    #[tokio::test]
    async fn test_swap_sender_attribution() {
        let (resolver, client) = new_resolver(Some(receipt_with(Vec::new())));
        assert_eq!(resolver.resolve_swap_sender(tx(1), addr(0x55)).await, addr(0x55));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.resolve_swap_sender(tx(1), addr(ROUTER)).await, addr(SIGNER));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
