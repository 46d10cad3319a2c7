//! Autoswap lifecycle: periodic evaluation, status reporting and
//! operator-triggered swap execution.
//!
//! The periodic loop only ever recommends a swap. Sending `swapAndDonate`
//! requires an explicit call to [`AutoswapService::execute_swap`] with a
//! signer for the token owner.

use autoswap_core::{format_units, strategy_status, StrategyStatus, SwapDecision, TOKEN_DECIMALS};
use chain_client::contracts::swap_and_donate_call;
use chain_client::{receipt_succeeded, ChainClient, SwapSigner, TransactionReceipt, H256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::price_tracker::PriceVolumeTracker;
use crate::{AutoswapSettings, OrchestratorError, Result};

/// Result of one periodic check
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CheckOutcome {
    SwapRecommended { evaluation: SwapDecision },
    NoSwap { evaluation: SwapDecision },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapExecutionResult {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub tokens_swapped: Option<String>,
    pub error: Option<String>,
}

impl SwapExecutionResult {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            tx_hash: None,
            block_number: None,
            tokens_swapped: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub is_running: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_swap: Option<DateTime<Utc>>,
    pub total_swaps_executed: u64,
    /// Milliseconds between checks
    pub monitoring_interval: u64,
    pub strategy: StrategyStatus,
}

#[derive(Debug, Default)]
struct ServiceState {
    last_check: Option<DateTime<Utc>>,
    last_swap: Option<DateTime<Utc>>,
    total_swaps_executed: u64,
}

struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct AutoswapService {
    client: Arc<dyn ChainClient>,
    tracker: Arc<PriceVolumeTracker>,
    settings: AutoswapSettings,
    is_running: Arc<Mutex<bool>>,
    state: Arc<Mutex<ServiceState>>,
    loop_handle: Mutex<Option<LoopHandle>>,
}

impl AutoswapService {
    pub fn new(
        client: Arc<dyn ChainClient>,
        tracker: Arc<PriceVolumeTracker>,
        settings: AutoswapSettings,
    ) -> Self {
        Self {
            client,
            tracker,
            settings,
            is_running: Arc::new(Mutex::new(false)),
            state: Arc::new(Mutex::new(ServiceState::default())),
            loop_handle: Mutex::new(None),
        }
    }

    /// Start periodic checks. The first check runs immediately.
    pub async fn start(self: &Arc<Self>) {
        let mut is_running = self.is_running.lock().await;
        if *is_running {
            warn!("Autoswap service already running");
            return;
        }
        *is_running = true;

        info!(
            "Starting autoswap service (check every {}s)",
            self.settings.check_interval.as_secs()
        );

        let (stop, mut stopped) = watch::channel(false);
        let service = self.clone();
        let task = tokio::spawn(async move {
            loop {
                if *stopped.borrow() {
                    break;
                }

                service.check_and_swap().await;

                tokio::select! {
                    _ = tokio::time::sleep(service.settings.check_interval) => {}
                    _ = stopped.changed() => {}
                }
            }
            debug!("Autoswap loop exited");
        });

        // Stored before the running flag is released so a concurrent stop
        // always finds the handle
        *self.loop_handle.lock().await = Some(LoopHandle { stop, task });
        drop(is_running);
    }

    /// Stop periodic checks, letting a check in progress finish
    pub async fn stop(&self) {
        let mut is_running = self.is_running.lock().await;
        if !*is_running {
            warn!("Autoswap service not running");
            return;
        }
        *is_running = false;
        let handle = self.loop_handle.lock().await.take();
        drop(is_running);

        info!("Stopping autoswap service");

        if let Some(handle) = handle {
            let _ = handle.stop.send(true);
            if let Err(e) = handle.task.await {
                error!("Autoswap loop ended abnormally: {}", e);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.lock().await
    }

    /// One periodic check: background volume sync, then evaluation.
    /// Never sends a transaction.
    pub async fn check_and_swap(&self) -> CheckOutcome {
        self.state.lock().await.last_check = Some(Utc::now());

        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            if let Err(e) = tracker.track_volume().await {
                error!("Error tracking volume in background: {}", e);
            }
        });

        match self.evaluate().await {
            Ok(evaluation) => {
                info!(
                    "Autoswap evaluation complete: should_swap={}, reason={}",
                    evaluation.should_swap, evaluation.reason
                );
                if evaluation.should_swap {
                    info!(
                        "Swap conditions met for {} tokens, awaiting manual execution",
                        evaluation.accumulated_tokens
                    );
                    CheckOutcome::SwapRecommended { evaluation }
                } else {
                    CheckOutcome::NoSwap { evaluation }
                }
            }
            Err(e) => {
                error!("Error in autoswap check: {}", e);
                CheckOutcome::Error {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Sample the price and evaluate the current contract balance
    pub async fn evaluate(&self) -> Result<SwapDecision> {
        let token = self.settings.token;
        let balance = self.client.balance_of(token, token).await?;
        debug!(
            "Contract holds {} tokens",
            format_units(&balance, TOKEN_DECIMALS)
        );

        match self.tracker.update_price_history().await {
            Ok(true) => {}
            Ok(false) => warn!("No valid price this check, evaluating on existing history"),
            Err(e) => warn!("Price sample failed: {}", e),
        }

        let window = self.tracker.window().await;
        Ok(autoswap_core::evaluate(
            &balance,
            &self.settings.swap_threshold,
            &window,
        ))
    }

    /// Swap the whole contract balance through `swapAndDonate`. Failures are
    /// reported in the result and never retried.
    pub async fn execute_swap(&self, signer: &dyn SwapSigner) -> SwapExecutionResult {
        info!("Executing manual swap from {:?}", signer.address());
        match self.send_swap(signer).await {
            Ok(result) => result,
            Err(e) => {
                error!("Error executing swap: {}", e);
                SwapExecutionResult::failed(e.to_string())
            }
        }
    }

    async fn send_swap(&self, signer: &dyn SwapSigner) -> Result<SwapExecutionResult> {
        let token = self.settings.token;
        let balance = self.client.balance_of(token, token).await?;
        let tokens_swapped = format_units(&balance, TOKEN_DECIMALS);
        info!("Swap amount: {} tokens", tokens_swapped);

        let calldata = swap_and_donate_call(&balance)?;
        let tx_hash = signer.send_transaction(token, calldata).await?;
        info!("Swap transaction sent: {:?}", tx_hash);

        let receipt = self.wait_for_receipt(tx_hash).await?;
        let block_number = receipt.block_number.map(|number| number.as_u64());
        if !receipt_succeeded(&receipt) {
            error!("Swap transaction {:?} reverted", tx_hash);
            return Ok(SwapExecutionResult {
                success: false,
                tx_hash: Some(format!("{:?}", tx_hash)),
                block_number,
                tokens_swapped: Some(tokens_swapped),
                error: Some("transaction reverted".to_string()),
            });
        }

        let total = {
            let mut state = self.state.lock().await;
            state.last_swap = Some(Utc::now());
            state.total_swaps_executed += 1;
            state.total_swaps_executed
        };

        info!(
            "Swap executed: {:?} in block {:?} ({} swaps so far)",
            receipt.transaction_hash, block_number, total
        );

        Ok(SwapExecutionResult {
            success: true,
            tx_hash: Some(format!("{:?}", receipt.transaction_hash)),
            block_number,
            tokens_swapped: Some(tokens_swapped),
            error: None,
        })
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt> {
        let deadline = Instant::now() + self.settings.confirmation_timeout;

        loop {
            match self.client.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => debug!("Swap {:?} not mined yet", tx_hash),
                Err(e) => warn!("Receipt poll for {:?} failed: {}", tx_hash, e),
            }

            if Instant::now() >= deadline {
                return Err(OrchestratorError::Swap(format!(
                    "transaction {:?} not confirmed within {}s",
                    tx_hash,
                    self.settings.confirmation_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.settings.receipt_poll_interval).await;
        }
    }

    pub async fn get_status(&self) -> ServiceStatus {
        let is_running = *self.is_running.lock().await;
        let state = self.state.lock().await;
        let window = self.tracker.window().await;

        ServiceStatus {
            is_running,
            last_check: state.last_check,
            last_swap: state.last_swap,
            total_swaps_executed: state.total_swaps_executed,
            monitoring_interval: u64::try_from(self.settings.check_interval.as_millis())
                .unwrap_or(u64::MAX),
            strategy: strategy_status(&window),
        }
    }
}
