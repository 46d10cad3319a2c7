use anyhow::{bail, Context, Result};
use block_listener::{BlockListener, ListenerSettings};
use chain_client::{ChainClient, ChainClientConfig, RpcChainClient, WalletSigner};
use config_manager::SystemConfig;
use job_orchestrator::{AutoswapService, AutoswapSettings, PriceVolumeTracker};
use persistence_layer::{EventStore, MemoryEventStore, PostgresClient, RedisClient};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Environment variable holding the token owner's private key for execute-swap
const OWNER_KEY_ENV: &str = "TRACKER_OWNER_PRIVATE_KEY";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,charity_tracker=debug".into()),
        )
        .init();

    let config = SystemConfig::load().context("loading configuration")?;
    config.validate().context("validating configuration")?;
    info!("Configuration loaded successfully");

    let rpc = RpcChainClient::new(&ChainClientConfig {
        rpc_url: config.chain.rpc_url.clone(),
        rpc_timeout_seconds: config.chain.rpc_timeout_seconds,
        max_retries: config.chain.max_retries,
        retry_base_delay_ms: config.chain.retry_base_delay_ms,
    })?;

    match rpc.chain_id().await {
        Ok(id) if id == config.chain.chain_id => info!("Connected to chain {}", id),
        Ok(id) => warn!(
            "RPC reports chain {} but {} is configured",
            id, config.chain.chain_id
        ),
        Err(e) => warn!("Could not read chain id: {}", e),
    }

    let store = open_store(&config).await?;
    let client: Arc<dyn ChainClient> = Arc::new(rpc.clone());

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("run") => run_daemon(config, client, store).await,
        Some("execute-swap") => {
            let key = std::env::var(OWNER_KEY_ENV)
                .with_context(|| format!("{} must hold the token owner's private key", OWNER_KEY_ENV))?;
            let signer = WalletSigner::new(rpc.provider(), &key, config.chain.chain_id)
                .context("loading owner wallet")?;
            execute_swap(config, client, store, signer).await
        }
        Some(other) => bail!("unknown command '{}' (expected run or execute-swap)", other),
    }
}

async fn open_store(config: &SystemConfig) -> Result<Arc<dyn EventStore>> {
    if !config.database.enabled {
        warn!("Database disabled, using in-memory store (data is lost on restart)");
        return Ok(Arc::new(MemoryEventStore::new()));
    }

    let postgres = PostgresClient::new(&config.database.postgres_url)
        .await
        .context("connecting to PostgreSQL")?;
    postgres.ensure_schema().await.context("creating schema")?;
    info!("PostgreSQL store ready");
    Ok(Arc::new(postgres))
}

async fn run_daemon(
    config: SystemConfig,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn EventStore>,
) -> Result<()> {
    let mut listener = BlockListener::new(
        client.clone(),
        store.clone(),
        ListenerSettings::from_config(&config)?,
    );

    if config.redis.enabled {
        let redis = RedisClient::new(&config.redis.url)
            .await
            .context("connecting to Redis")?;
        info!("Leader lock enabled");
        listener = listener.with_leader_lock(redis);
    }

    listener.initialize_cursor().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = Arc::new(listener);
    let listener_task = tokio::spawn({
        let listener = listener.clone();
        async move { listener.run(shutdown_rx).await }
    });

    let autoswap = if config.autoswap.enabled {
        match start_autoswap(&config, client, store).await {
            Ok(service) => Some(service),
            Err(e) => {
                error!("Autoswap unavailable, continuing with ingestion only: {}", e);
                None
            }
        }
    } else {
        info!("Autoswap disabled");
        None
    };

    info!("Charity tracker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    if let Some(service) = &autoswap {
        service.stop().await;
    }
    let _ = shutdown_tx.send(true);
    if let Err(e) = listener_task.await {
        error!("Listener task ended abnormally: {}", e);
    }

    info!("Charity tracker stopped");
    Ok(())
}

async fn start_autoswap(
    config: &SystemConfig,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn EventStore>,
) -> Result<Arc<AutoswapService>> {
    let settings = AutoswapSettings::from_config(config)?;
    let tracker = PriceVolumeTracker::init(client.clone(), store, &settings).await?;
    let service = Arc::new(AutoswapService::new(client, Arc::new(tracker), settings));
    service.start().await;
    Ok(service)
}

async fn execute_swap(
    config: SystemConfig,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn EventStore>,
    signer: WalletSigner,
) -> Result<()> {
    let settings = AutoswapSettings::from_config(&config)?;
    let tracker = PriceVolumeTracker::init(client.clone(), store, &settings).await?;
    let service = AutoswapService::new(client, Arc::new(tracker), settings);

    let result = service.execute_swap(&signer).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        bail!(
            "swap failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}
