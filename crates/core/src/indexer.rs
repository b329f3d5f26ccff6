//! Incremental event indexer.
//!
//! Walks from the scan cursor to the chain head in aligned windows and
//! folds position and liquidity events into a market → traders map. The
//! map only ever grows: a trader seen once is rechecked every cycle.

use alloy::primitives::Address;
use perpdex_chain::{ChainClient, DecodedEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheFailurePolicy, KvStore, RangeCache};
use crate::config::IndexerConfig;
use crate::error::{CacheError, IndexerError};

/// Store key of the persisted cursor.
pub const CURSOR_KEY: &str = "cursor";

/// Events that reveal a taker position in `(market, trader)`.
const POSITION_EVENTS: [&str; 2] = ["PositionChanged", "PositionLiquidated"];
/// Events that reveal a maker position in `(market, trader)`. Deployments
/// name the add event either way.
const LIQUIDITY_EVENTS: [&str; 3] = ["AddLiquidity", "LiquidityAdded", "LiquidityRemoved"];

/// Round `x` down to the nearest window boundary, where boundaries sit at
/// `offset + k * window`. Saturates at block 0.
pub fn floor_align(x: u64, window: u64, offset: u64) -> u64 {
    let window = window.max(1);
    if x >= offset {
        offset + (x - offset) / window * window
    } else {
        let back = (offset - x).div_ceil(window) * window;
        offset.saturating_sub(back)
    }
}

/// Last block of the window containing `x`.
fn window_end(x: u64, window: u64, offset: u64) -> u64 {
    let window = window.max(1);
    if x >= offset {
        floor_align(x, window, offset) + window - 1
    } else {
        // First boundary strictly above `x`.
        let boundary = offset - (offset - x - 1) / window * window;
        boundary - 1
    }
}

/// Market → traders observed with positions there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateMap {
    markets: HashMap<Address, HashSet<Address>>,
}

impl CandidateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `trader` under `market`. Returns false if it was already there.
    pub fn insert(&mut self, market: Address, trader: Address) -> bool {
        self.markets.entry(market).or_default().insert(trader)
    }

    /// Every `(trader, market)` pair.
    pub fn pairs(&self) -> Vec<(Address, Address)> {
        self.markets
            .iter()
            .flat_map(|(market, traders)| traders.iter().map(move |trader| (*trader, *market)))
            .collect()
    }

    pub fn pair_count(&self) -> usize {
        self.markets.values().map(HashSet::len).sum()
    }

    /// Fold one event. Returns true if it added a new pair.
    pub fn fold(&mut self, event: &DecodedEvent) -> bool {
        let name = event.name.as_str();
        if !POSITION_EVENTS.contains(&name) && !LIQUIDITY_EVENTS.contains(&name) {
            return false;
        }
        match (event.address_arg("market"), event.address_arg("trader")) {
            (Some(market), Some(trader)) => self.insert(market, trader),
            _ => {
                debug!(event = name, block = event.block_number, "Event without market/trader");
                false
            }
        }
    }
}

/// Summary of one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub head: u64,
    pub windows: usize,
    pub events: usize,
    pub new_pairs: usize,
    /// A window failed and the pass stopped early
    pub interrupted: bool,
}

/// Owns the scan cursor and the candidate map.
pub struct EventIndexer {
    chain: Arc<dyn ChainClient>,
    cache: RangeCache,
    /// Store for the persisted cursor, when enabled
    cursor_store: Option<Arc<dyn KvStore>>,
    on_failure: CacheFailurePolicy,
    window_size: u64,
    window_offset: u64,
    start_block: u64,
    /// Highest fully processed block
    last_block: Option<u64>,
    candidates: CandidateMap,
}

impl EventIndexer {
    /// Build an indexer. With `persist_cursor` the cursor is restored from
    /// `store`.
    ///
    /// # Arguments
    /// * `chain` - Source of the chain head
    /// * `cache` - Range cache in front of the log fetcher
    /// * `store` - Cursor store, used only when `config.persist_cursor` is set
    /// * `config` - Window geometry, start block and failure policy
    pub async fn new(
        chain: Arc<dyn ChainClient>,
        cache: RangeCache,
        store: Arc<dyn KvStore>,
        config: &IndexerConfig,
    ) -> Result<Self, IndexerError> {
        let mut indexer = Self {
            chain,
            cache,
            cursor_store: config.persist_cursor.then_some(store),
            on_failure: config.cache_failure,
            window_size: config.window_size,
            window_offset: config.window_offset,
            start_block: config.start_block,
            last_block: None,
            candidates: CandidateMap::new(),
        };
        indexer.last_block = indexer.load_cursor().await?;

        info!(
            start_block = indexer.start_block,
            cursor = ?indexer.last_block,
            window_size = indexer.window_size,
            persist_cursor = config.persist_cursor,
            "Event indexer initialized"
        );
        Ok(indexer)
    }

    pub fn cursor(&self) -> Option<u64> {
        self.last_block
    }

    pub fn candidates(&self) -> &CandidateMap {
        &self.candidates
    }

    fn next_block(&self) -> u64 {
        match self.last_block {
            Some(block) => (block + 1).max(self.start_block),
            None => self.start_block,
        }
    }

    /// The window `[from, to]` that covers `next`, clipped at `head`.
    pub fn window_for(&self, next: u64, head: u64) -> (u64, u64) {
        let from = floor_align(next, self.window_size, self.window_offset);
        let to = window_end(next, self.window_size, self.window_offset).min(head);
        (from, to)
    }

    async fn load_cursor(&self) -> Result<Option<u64>, IndexerError> {
        let Some(store) = &self.cursor_store else {
            return Ok(None);
        };
        match store.get(CURSOR_KEY).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<u64>(&bytes) {
                Ok(block) => Ok(Some(block)),
                Err(e) => {
                    self.on_failure.absorb(e.into(), "cursor decode")?;
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(e) => {
                self.on_failure.absorb(e, "cursor get")?;
                Ok(None)
            }
        }
    }

    async fn save_cursor(&self, block: u64) -> Result<(), CacheError> {
        let Some(store) = &self.cursor_store else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&block)?;
        match store.set(CURSOR_KEY, bytes).await {
            Ok(()) => Ok(()),
            Err(e) => self.on_failure.absorb(e, "cursor set"),
        }
    }

    /// Scan from the cursor to the head and fold new events.
    ///
    /// A window that fails to fetch stops the pass; the cursor stays at the
    /// last good window so the failed one is retried next time.
    #[instrument(skip(self), fields(cursor = ?self.last_block))]
    pub async fn scan(&mut self) -> Result<(&CandidateMap, ScanReport), IndexerError> {
        // The tip may not be queryable on nodes a block behind consensus.
        let Some(head) = self.chain.block_number().await?.checked_sub(1) else {
            return Ok((&self.candidates, ScanReport::default()));
        };
        let first = self.next_block();
        let mut report = ScanReport {
            head,
            ..Default::default()
        };

        let mut events: Vec<DecodedEvent> = Vec::new();
        let mut processed_to = self.last_block;
        let mut next = first;

        while next <= head {
            let (from, to) = self.window_for(next, head);
            match self.cache.get_or_fetch(from, to).await {
                Ok(batch) => {
                    events.extend(batch);
                    report.windows += 1;
                    processed_to = Some(to);
                    next = to + 1;
                }
                Err(IndexerError::Chain(e)) => {
                    warn!(from_block = from, to_block = to, head, error = %e, "Window fetch failed");
                    report.interrupted = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        for event in events.iter().filter(|e| e.block_number >= first) {
            report.events += 1;
            if self.candidates.fold(event) {
                report.new_pairs += 1;
            }
        }

        if processed_to > self.last_block {
            self.last_block = processed_to;
            if let Some(block) = processed_to {
                self.save_cursor(block).await?;
            }
        }

        debug!(
            head,
            cursor = ?self.last_block,
            windows = report.windows,
            events = report.events,
            new_pairs = report.new_pairs,
            "Scan pass complete"
        );
        Ok((&self.candidates, report))
    }
}
