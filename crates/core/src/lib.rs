//! PerpDEX liquidator core logic.
//!
//! This crate provides:
//! - A range cache over Redis (or memory) for immutable block windows
//! - The incremental event indexer that discovers (trader, market) candidates
//! - The liquidation engine: solvency check, maker unwind, taker unwind
//! - The estimate → submit → confirm transaction executor
//! - The orchestrator loop with bounded in-flight attempts and liveness
//!
//! Chain access goes through [`perpdex_chain::ChainClient`], so everything
//! here runs against a scripted client in tests.

pub mod cache;
pub mod config;
mod engine;
mod error;
mod executor;
mod indexer;
mod orchestrator;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{
    range_key, CacheBackend, CacheFailurePolicy, KvStore, MemoryStore, RangeCache, RedisStore,
};
pub use config::{
    expand_env, EngineConfig, ExecutorConfig, IndexerConfig, LiquidatorConfig, ScannerConfig,
};
pub use engine::{scale_bps, LiquidationEngine, LiquidationOutcome, SkipReason, UnwindOutcome};
pub use error::{CacheError, IndexerError};
pub use executor::{ExecutionOutcome, TransactionExecutor};
pub use indexer::{floor_align, CandidateMap, EventIndexer, ScanReport, CURSOR_KEY};
pub use orchestrator::{DispatchReport, Liquidator};
