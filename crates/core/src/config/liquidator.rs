//! Runtime configuration with profile support.
//!
//! A profile (`default`, `testing`, `production`) is picked by `BOT_PROFILE`;
//! a TOML file can then override any subset of its fields.

use perpdex_chain::GasConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::{CacheBackend, CacheFailurePolicy};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidatorConfig {
    /// Profile name (for logging)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub gas: GasConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Event indexing and range cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Blocks per `eth_getLogs` window
    #[serde(default = "default_window_size")]
    pub window_size: u64,

    /// Window boundaries sit at `window_offset + k * window_size`
    #[serde(default)]
    pub window_offset: u64,

    /// First block to scan
    #[serde(default)]
    pub start_block: u64,

    #[serde(default)]
    pub cache_backend: CacheBackend,

    #[serde(default)]
    pub cache_failure: CacheFailurePolicy,

    /// Restore the scan cursor from the cache store on startup
    #[serde(default)]
    pub persist_cursor: bool,

    /// Second component of the cache namespace
    #[serde(default = "default_indexer_id")]
    pub indexer_id: String,
}

fn default_window_size() -> u64 {
    1000
}
fn default_indexer_id() -> String {
    "PerpdexEventIndexer".to_string()
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_offset: 0,
            start_block: 0,
            cache_backend: CacheBackend::default(),
            cache_failure: CacheFailurePolicy::default(),
            persist_cursor: false,
            indexer_id: default_indexer_id(),
        }
    }
}

/// Liquidation decisions and concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fraction of `maxTrade` used for the taker unwind (basis points)
    #[serde(default = "default_trade_reduction_bps")]
    pub trade_reduction_bps: u32,

    /// Liquidation attempts allowed to run at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_trade_reduction_bps() -> u32 {
    8000
}
fn default_max_in_flight() -> usize {
    32
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trade_reduction_bps: default_trade_reduction_bps(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Transaction submission and confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Receipt polls before a transaction is reported unconfirmed
    #[serde(default = "default_receipt_attempts")]
    pub receipt_attempts: u32,

    /// Per-poll receipt timeout (seconds)
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,

    /// Gas limit = estimate × multiplier
    #[serde(default = "default_gas_limit_multiplier")]
    pub gas_limit_multiplier: f64,
}

fn default_receipt_attempts() -> u32 {
    10
}
fn default_receipt_timeout() -> u64 {
    10
}
fn default_gas_limit_multiplier() -> f64 {
    1.2
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            receipt_attempts: default_receipt_attempts(),
            receipt_timeout_secs: default_receipt_timeout(),
            gas_limit_multiplier: default_gas_limit_multiplier(),
        }
    }
}

impl ExecutorConfig {
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

/// Main loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Sleep between scan cycles (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Liveness poll from the host process (seconds)
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    1000
}
fn default_health_interval() -> u64 {
    5
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            health_interval_secs: default_health_interval(),
        }
    }
}

impl ScannerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

impl Default for LiquidatorConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            indexer: IndexerConfig::default(),
            engine: EngineConfig::default(),
            executor: ExecutorConfig::default(),
            scanner: ScannerConfig::default(),
            gas: GasConfig::default(),
        }
    }
}

impl LiquidatorConfig {
    /// Local node profile: in-memory cache, small windows, short waits.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            indexer: IndexerConfig {
                window_size: 100,
                cache_backend: CacheBackend::Memory,
                ..Default::default()
            },
            engine: EngineConfig {
                max_in_flight: 4,
                ..Default::default()
            },
            executor: ExecutorConfig {
                receipt_attempts: 3,
                receipt_timeout_secs: 2,
                gas_limit_multiplier: 1.5,
            },
            scanner: ScannerConfig {
                poll_interval_ms: 500,
                health_interval_secs: 2,
            },
            gas: GasConfig::default(),
        }
    }

    /// Long-running deployment: durable cursor, cache failures are fatal.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            indexer: IndexerConfig {
                cache_failure: CacheFailurePolicy::Fatal,
                persist_cursor: true,
                ..Default::default()
            },
            engine: EngineConfig {
                max_in_flight: 64,
                ..Default::default()
            },
            executor: ExecutorConfig::default(),
            scanner: ScannerConfig::default(),
            gas: GasConfig::default(),
        }
    }

    /// Profile named by `BOT_PROFILE`, or default.
    /// Supported values: testing, production
    pub fn from_env() -> Self {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::for_profile(&profile)
    }

    pub fn for_profile(profile: &str) -> Self {
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Liquidator configuration loaded");
        tracing::info!(
            window_size = self.indexer.window_size,
            window_offset = self.indexer.window_offset,
            start_block = self.indexer.start_block,
            cache_backend = ?self.indexer.cache_backend,
            cache_failure = ?self.indexer.cache_failure,
            persist_cursor = self.indexer.persist_cursor,
            "Indexer"
        );
        tracing::info!(
            trade_reduction_bps = self.engine.trade_reduction_bps,
            max_in_flight = self.engine.max_in_flight,
            "Engine"
        );
        tracing::info!(
            receipt_attempts = self.executor.receipt_attempts,
            receipt_timeout_secs = self.executor.receipt_timeout_secs,
            gas_limit_multiplier = self.executor.gas_limit_multiplier,
            pricing_model = ?self.gas.pricing_model,
            "Executor"
        );
    }
}
