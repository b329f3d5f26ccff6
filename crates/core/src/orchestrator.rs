//! Main loop: index, then launch liquidation attempts.
//!
//! Attempts run as detached tasks so slow confirmations never stall the
//! scan. At most `max_in_flight` run at once, and a pair already in flight
//! is not launched again. Pairs left without a permit are first in line on
//! the next cycle, so every candidate is reached within
//! `ceil(pairs / max_in_flight)` cycles.

use alloy::primitives::Address;
use anyhow::{bail, Result};
use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, ScannerConfig};
use crate::engine::{LiquidationEngine, LiquidationOutcome};
use crate::error::IndexerError;
use crate::indexer::EventIndexer;

type Pair = (Address, Address);

/// Result of launching one cycle's candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub launched: usize,
    /// Already in flight from an earlier cycle
    pub busy: usize,
    /// No permit left this cycle
    pub deferred: usize,
}

/// Removes a pair from the in-flight set when its task ends.
struct InFlightGuard {
    pairs: Arc<DashSet<Pair>>,
    pair: Pair,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.pairs.remove(&self.pair);
    }
}

/// Ties the indexer and the engine together and reports liveness.
pub struct Liquidator {
    /// Taken by the main loop on `start`
    indexer: Mutex<Option<EventIndexer>>,
    engine: Arc<LiquidationEngine>,
    /// One permit per running attempt
    permits: Arc<Semaphore>,
    /// Pairs with an attempt running
    in_flight: Arc<DashSet<Pair>>,
    /// First pair deferred last cycle; the next dispatch starts there
    resume_from: Mutex<Option<Pair>>,
    poll_interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Liquidator {
    /// # Arguments
    /// * `indexer` - Moved into the main loop on `start`
    /// * `engine` - Shared by every attempt task
    /// * `engine_config` - `max_in_flight` sizes the permit pool
    /// * `scanner_config` - Sleep between cycles
    pub fn new(
        indexer: EventIndexer,
        engine: Arc<LiquidationEngine>,
        engine_config: &EngineConfig,
        scanner_config: &ScannerConfig,
    ) -> Self {
        Self {
            indexer: Mutex::new(Some(indexer)),
            engine,
            permits: Arc::new(Semaphore::new(engine_config.max_in_flight)),
            in_flight: Arc::new(DashSet::new()),
            resume_from: Mutex::new(None),
            poll_interval: scanner_config.poll_interval(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the main loop on the current runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let Some(indexer) = self.indexer.lock().take() else {
            bail!("Liquidator already started");
        };
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(indexer).await });
        *self.task.lock() = Some(handle);
        info!(exchange = %self.engine.exchange(), "Liquidator started");
        Ok(())
    }

    /// True while the main loop is running.
    pub fn health_check(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Attempts currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn run(self: Arc<Self>, mut indexer: EventIndexer) {
        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let scanned = indexer
                .scan()
                .await
                .map(|(candidates, report)| (candidates.pairs(), report));
            match scanned {
                Ok((pairs, report)) => {
                    let dispatch = self.dispatch(pairs);
                    info!(
                        cycle,
                        head = report.head,
                        cursor = ?indexer.cursor(),
                        windows = report.windows,
                        new_pairs = report.new_pairs,
                        candidates = indexer.candidates().pair_count(),
                        launched = dispatch.launched,
                        busy = dispatch.busy,
                        deferred = dispatch.deferred,
                        "Cycle complete"
                    );
                }
                Err(IndexerError::Chain(e)) if e.is_retryable() => {
                    warn!(cycle, error = %e, "Scan failed, retrying next cycle");
                }
                Err(e) => {
                    error!(cycle, error = %e, "Scan loop stopped");
                    return;
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Launch an attempt per pair, bounded by the permit pool.
    ///
    /// Pairs are walked in address order starting at the first pair that
    /// was deferred last time, wrapping around.
    pub fn dispatch(&self, mut pairs: Vec<Pair>) -> DispatchReport {
        let mut report = DispatchReport::default();

        pairs.sort_unstable();
        let start = match *self.resume_from.lock() {
            Some(resume) => pairs.partition_point(|pair| *pair < resume),
            None => 0,
        };
        pairs.rotate_left(start);

        let mut first_deferred = None;
        for pair in pairs {
            if self.in_flight.contains(&pair) {
                report.busy += 1;
                continue;
            }
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                report.deferred += 1;
                first_deferred.get_or_insert(pair);
                continue;
            };
            self.in_flight.insert(pair);
            let guard = InFlightGuard {
                pairs: Arc::clone(&self.in_flight),
                pair,
            };
            let engine = Arc::clone(&self.engine);

            tokio::spawn(async move {
                let _guard = guard;
                let _permit = permit;
                let (trader, market) = pair;
                match engine.liquidate(trader, market).await {
                    LiquidationOutcome::SufficientMargin => {}
                    outcome => debug!(trader = %trader, market = %market, ?outcome, "Attempt finished"),
                }
            });
            report.launched += 1;
        }

        *self.resume_from.lock() = first_deferred;
        report
    }
}
