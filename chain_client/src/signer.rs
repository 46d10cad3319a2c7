use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, MiddlewareError, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, TransactionRequest, H256};
use std::str::FromStr;
use tracing::info;

use crate::{ChainClientError, Result};

/// Submits state-changing transactions on behalf of the operator account.
#[async_trait]
pub trait SwapSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Broadcast a call to `to` and return the transaction hash.
    /// Implementations must not resubmit on failure.
    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<H256>;
}

/// Locally held key signing raw transactions for the configured chain
pub struct WalletSigner {
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
}

impl WalletSigner {
    pub fn new(provider: Provider<Http>, private_key: &str, chain_id: u64) -> Result<Self> {
        let wallet = LocalWallet::from_str(private_key.trim())
            .map_err(|e| ChainClientError::Signer(format!("invalid private key: {}", e)))?
            .with_chain_id(chain_id);

        Ok(Self {
            client: SignerMiddleware::new(provider, wallet),
        })
    }
}

#[async_trait]
impl SwapSigner for WalletSigner {
    fn address(&self) -> Address {
        self.client.address()
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<H256> {
        let tx = TransactionRequest::new()
            .from(self.address())
            .to(to)
            .data(data);

        // Sent once, never retried
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| match e.as_error_response() {
                Some(response) => ChainClientError::Rpc {
                    code: response.code,
                    message: response.message.clone(),
                },
                None => ChainClientError::Signer(e.to_string()),
            })?;
        let tx_hash = pending.tx_hash();

        info!(
            "Submitted transaction {:?} from {:?} to {:?}",
            tx_hash,
            self.address(),
            to
        );
        Ok(tx_hash)
    }
}
