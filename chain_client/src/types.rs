use ethers::types::{Address, Filter, Log, TransactionReceipt, H256};
use serde_json::Value;
use tracing::warn;

/// eth_getLogs filter for a single contract and event signature
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: H256,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    pub fn to_filter(&self) -> Filter {
        Filter::new()
            .address(self.address)
            .topic0(self.topic0)
            .from_block(self.from_block)
            .to_block(self.to_block)
    }
}

/// Parse every entry of an eth_getLogs result on its own. Entries that do
/// not deserialize are skipped with a warning; the count is returned.
pub fn parse_logs(values: Vec<Value>) -> (Vec<Log>, usize) {
    let mut logs = Vec::with_capacity(values.len());
    let mut skipped = 0;

    for value in values {
        let tx_hash = value
            .get("transactionHash")
            .and_then(Value::as_str)
            .unwrap_or("<none>")
            .to_string();
        match serde_json::from_value::<Log>(value) {
            Ok(log) => logs.push(log),
            Err(e) => {
                warn!("Skipping malformed log in tx {}: {}", tx_hash, e);
                skipped += 1;
            }
        }
    }

    (logs, skipped)
}

/// Status 1 is success; receipts without a status predate Byzantium
pub fn receipt_succeeded(receipt: &TransactionReceipt) -> bool {
    receipt.status.map_or(true, |status| status.as_u64() == 1)
}
