//! PerpDEX Liquidation Bot
//!
//! Indexes PerpdexExchange position and liquidity events to discover
//! candidates, then liquidates traders below maintenance margin.
//! Features:
//! - Window-aligned log scanning with a Redis range cache
//! - Estimate-gated submission with bounded receipt polling
//! - Bounded concurrent liquidation attempts per cycle
//! - Liveness polling; exits non-zero so a supervisor can restart it

use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use perpdex_chain::{
    gas_strategy, load_exchange_artifact, AlloyChainClient, ChainClient, EventTable, LogFetcher,
    TransactionSender,
};
use perpdex_core::{
    CacheBackend, EventIndexer, KvStore, LiquidationEngine, Liquidator, LiquidatorConfig,
    MemoryStore, RangeCache, RedisStore, TransactionExecutor,
};

/// Environment variable names.
mod env {
    pub const NETWORK_NAME: &str = "WEB3_NETWORK_NAME";
    pub const PROVIDER_URI: &str = "WEB3_PROVIDER_URI";
    pub const PRIVATE_KEY: &str = "USER_PRIVATE_KEY";
    pub const REDIS_URL: &str = "REDIS_URL";
    pub const EXCHANGE_ADDRESS: &str = "PERPDEX_EXCHANGE_ADDRESS";
    pub const ABI_DIR: &str = "PERPDEX_CONTRACT_ABI_JSON_DIRPATH";
    pub const CHAIN_ID: &str = "CHAIN_ID";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    // BOT_PROFILE selects the profile, LIQUIDATOR_CONFIG overlays it
    let bot_config = LiquidatorConfig::load()?;
    bot_config.log_config();

    let env_config = load_env(&bot_config)?;
    info!(
        network = %env_config.network,
        exchange = %env_config.exchange,
        "Starting PerpDEX liquidator"
    );

    let liquidator = initialize_components(env_config, &bot_config).await?;
    liquidator.start()?;

    let mut ticker = tokio::time::interval(bot_config.scanner.health_interval());
    loop {
        ticker.tick().await;
        if !liquidator.health_check() {
            error!("Liquidator main loop is not running, exiting");
            anyhow::bail!("liquidator unhealthy");
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,perpdex_core=debug,perpdex_chain=debug"));
    let json = std::env::var(env::LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Deployment settings loaded from the environment.
struct EnvConfig {
    network: String,
    rpc_url: String,
    private_key: String,
    redis_url: Option<String>,
    exchange: Address,
    /// Built from the artifact ABI when an ABI directory is set
    events: EventTable,
    chain_id: Option<u64>,
}

fn load_env(bot_config: &LiquidatorConfig) -> Result<EnvConfig> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("Missing env var: {}", name))
    };

    let artifact = match std::env::var(env::ABI_DIR) {
        Ok(dir) => Some(load_exchange_artifact(&dir)?),
        Err(_) => None,
    };

    let exchange: Address = match (std::env::var(env::EXCHANGE_ADDRESS), &artifact) {
        (Ok(raw), _) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid address for {}: {}", env::EXCHANGE_ADDRESS, e))?,
        (Err(_), Some(artifact)) => artifact.address,
        (Err(_), None) => anyhow::bail!("Set {} or {}", env::EXCHANGE_ADDRESS, env::ABI_DIR),
    };

    // The deployed ABI wins over the built-in layouts
    let events = match &artifact {
        Some(artifact) => {
            let table = EventTable::from_abi(&artifact.abi);
            if table.is_empty() {
                anyhow::bail!("Artifact in {} declares no events", env::ABI_DIR);
            }
            table
        }
        None => EventTable::perpdex_exchange(),
    };
    info!(events = ?events.names().collect::<Vec<_>>(), "Event table loaded");

    let redis_url = match bot_config.indexer.cache_backend {
        CacheBackend::Redis => Some(get_env(env::REDIS_URL)?),
        CacheBackend::Memory => None,
    };

    let chain_id = match std::env::var(env::CHAIN_ID) {
        Ok(raw) => Some(
            raw.trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", env::CHAIN_ID, raw))?,
        ),
        Err(_) => None,
    };

    Ok(EnvConfig {
        network: get_env(env::NETWORK_NAME)?,
        rpc_url: get_env(env::PROVIDER_URI)?,
        private_key: get_env(env::PRIVATE_KEY)?,
        redis_url,
        exchange,
        events,
        chain_id,
    })
}

async fn initialize_components(
    config: EnvConfig,
    bot_config: &LiquidatorConfig,
) -> Result<Arc<Liquidator>> {
    info!("Initializing components...");

    let chain_id = match config.chain_id {
        Some(id) => id,
        None => AlloyChainClient::query_chain_id(&config.rpc_url).await?,
    };

    // Transaction sender (signing, nonces, gas pricing)
    let sender = TransactionSender::new(
        &config.private_key,
        &config.rpc_url,
        chain_id,
        gas_strategy(&bot_config.gas),
    )
    .await?;

    let chain: Arc<dyn ChainClient> =
        Arc::new(AlloyChainClient::connect(&config.rpc_url, sender).await?);

    // Key/value store for the range cache and cursor
    let store: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisStore::connect(url, &config.network, &bot_config.indexer.indexer_id)
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            info!("Using in-memory cache");
            Arc::new(MemoryStore::new())
        }
    };

    // Event pipeline: fetcher → range cache → indexer
    let fetcher = Arc::new(LogFetcher::new(
        chain.clone(),
        config.exchange,
        config.events,
    ));
    let cache = RangeCache::new(
        store.clone(),
        fetcher,
        bot_config.indexer.window_size,
        bot_config.indexer.cache_failure,
    );
    let indexer = EventIndexer::new(chain.clone(), cache, store, &bot_config.indexer).await?;

    // Liquidation engine
    let executor = TransactionExecutor::new(chain.clone(), &bot_config.executor);
    let engine = Arc::new(LiquidationEngine::new(
        chain,
        executor,
        config.exchange,
        &bot_config.engine,
    ));

    info!("All components initialized");

    Ok(Arc::new(Liquidator::new(
        indexer,
        engine,
        &bot_config.engine,
        &bot_config.scanner,
    )))
}
