//! Range cache for decoded events.
//!
//! Blocks below the head never change, so a full window's event set is
//! stored once and replayed on every later scan (including after restarts).
//! The trailing partial window is always fetched live.

use async_trait::async_trait;
use dashmap::DashMap;
use perpdex_chain::{DecodedEvent, EventSource};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{CacheError, IndexerError};

/// Minimal key/value capability the indexer needs.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;
}

/// Which store backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Redis,
    Memory,
}

/// What to do when the store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheFailurePolicy {
    /// Warn and serve the window from the chain.
    #[default]
    LiveFetch,
    /// Fail the scan pass.
    Fatal,
}

impl CacheFailurePolicy {
    /// Map a store failure to `Ok(())` (keep going) or the error.
    pub fn absorb(self, err: CacheError, context: &'static str) -> Result<(), CacheError> {
        match self {
            Self::LiveFetch => {
                warn!(error = %err, context, "Cache unavailable, continuing without it");
                Ok(())
            }
            Self::Fatal => Err(err),
        }
    }
}

/// Redis store with every key prefixed by `{network}:{indexer_id}:`.
#[derive(Clone)]
pub struct RedisStore {
    /// Reconnects on its own after a dropped connection
    conn: ConnectionManager,
    /// `{network}:{indexer_id}:`
    namespace: String,
}

impl RedisStore {
    pub async fn connect(url: &str, network: &str, indexer_id: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let namespace = format!("{}:{}:", network, indexer_id);
        info!(namespace = %namespace, "Connected to Redis");
        Ok(Self { conn, namespace })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.key(key), value).await?;
        Ok(())
    }
}

/// In-process store for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Cache key of a window.
pub fn range_key(from_block: u64, to_block: u64) -> String {
    format!("event_indexer:{}:{}", from_block, to_block)
}

/// Memoizes full windows of decoded events.
pub struct RangeCache {
    store: Arc<dyn KvStore>,
    /// Where misses and partial windows are served from
    source: Arc<dyn EventSource>,
    /// Only ranges exactly this wide are stored
    window_size: u64,
    on_failure: CacheFailurePolicy,
}

impl RangeCache {
    /// Create a range cache.
    ///
    /// # Arguments
    /// * `store` - Backing key/value store (Redis or memory)
    /// * `source` - Live event source, normally a `LogFetcher`
    /// * `window_size` - Width of a cacheable window, in blocks
    /// * `on_failure` - Whether store failures are absorbed or returned
    pub fn new(
        store: Arc<dyn KvStore>,
        source: Arc<dyn EventSource>,
        window_size: u64,
        on_failure: CacheFailurePolicy,
    ) -> Self {
        Self {
            store,
            source,
            window_size,
            on_failure,
        }
    }

    /// Whether `[from_block, to_block]` is exactly one window wide.
    pub fn is_full_window(&self, from_block: u64, to_block: u64) -> bool {
        to_block >= from_block && to_block - from_block + 1 == self.window_size
    }

    /// Events in `[from_block, to_block]`, from the store when possible.
    pub async fn get_or_fetch(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DecodedEvent>, IndexerError> {
        if !self.is_full_window(from_block, to_block) {
            debug!(from_block, to_block, "Partial window, cache bypassed");
            return Ok(self.source.fetch(from_block, to_block).await?);
        }

        let key = range_key(from_block, to_block);
        match self.store.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<DecodedEvent>>(&bytes) {
                Ok(events) => {
                    debug!(from_block, to_block, events = events.len(), "Cache hit");
                    return Ok(events);
                }
                Err(e) => self.on_failure.absorb(e.into(), "decode")?,
            },
            Ok(None) => debug!(from_block, to_block, "Cache miss"),
            Err(e) => self.on_failure.absorb(e, "get")?,
        }

        let events = self.source.fetch(from_block, to_block).await?;
        match serde_json::to_vec(&events) {
            Ok(bytes) => {
                if let Err(e) = self.store.set(&key, bytes).await {
                    self.on_failure.absorb(e, "set")?;
                }
            }
            Err(e) => self.on_failure.absorb(e.into(), "encode")?,
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_event, FailingStore, ScriptedSource};

    fn cache_over(
        store: Arc<dyn KvStore>,
        source: Arc<ScriptedSource>,
        on_failure: CacheFailurePolicy,
    ) -> RangeCache {
        RangeCache::new(store, source, 1000, on_failure)
    }

    #[tokio::test]
    async fn test_full_window_fetched_once() {
        let source = Arc::new(ScriptedSource::new(vec![sample_event(5, 0)]));
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(store.clone(), source.clone(), CacheFailurePolicy::LiveFetch);

        for _ in 0..10 {
            let events = cache.get_or_fetch(0, 999).await.unwrap();
            assert_eq!(events, vec![sample_event(5, 0)]);
        }

        assert_eq!(source.fetch_count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_window_always_live() {
        let source = Arc::new(ScriptedSource::new(vec![sample_event(5, 0)]));
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(store.clone(), source.clone(), CacheFailurePolicy::LiveFetch);

        for _ in 0..10 {
            cache.get_or_fetch(0, 9).await.unwrap();
        }

        assert_eq!(source.fetch_count(), 10);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_downgrades_to_live_fetch() {
        let source = Arc::new(ScriptedSource::new(vec![sample_event(5, 0)]));
        let cache = cache_over(Arc::new(FailingStore), source.clone(), CacheFailurePolicy::LiveFetch);

        let events = cache.get_or_fetch(0, 999).await.unwrap();
        assert_eq!(events.len(), 1);
        cache.get_or_fetch(0, 999).await.unwrap();
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal_when_configured() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let cache = cache_over(Arc::new(FailingStore), source.clone(), CacheFailurePolicy::Fatal);

        let err = cache.get_or_fetch(0, 999).await.unwrap_err();
        assert!(matches!(err, IndexerError::Cache(CacheError::Backend(_))));
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_refetched_and_overwritten() {
        let source = Arc::new(ScriptedSource::new(vec![sample_event(7, 1)]));
        let store = Arc::new(MemoryStore::new());
        store.set(&range_key(0, 999), b"not json".to_vec()).await.unwrap();
        let cache = cache_over(store.clone(), source.clone(), CacheFailurePolicy::LiveFetch);

        assert_eq!(cache.get_or_fetch(0, 999).await.unwrap().len(), 1);
        assert_eq!(cache.get_or_fetch(0, 999).await.unwrap().len(), 1);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let source = Arc::new(ScriptedSource::failing());
        let store = Arc::new(MemoryStore::new());
        let cache = cache_over(store.clone(), source.clone(), CacheFailurePolicy::LiveFetch);

        assert!(matches!(
            cache.get_or_fetch(0, 999).await,
            Err(IndexerError::Chain(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_range_key_format() {
        assert_eq!(range_key(1000, 1999), "event_indexer:1000:1999");
    }

    #[test]
    fn test_policy_names() {
        let policy: CacheFailurePolicy = serde_json::from_str("\"live-fetch\"").unwrap();
        assert_eq!(policy, CacheFailurePolicy::LiveFetch);
        let policy: CacheFailurePolicy = serde_json::from_str("\"fatal\"").unwrap();
        assert_eq!(policy, CacheFailurePolicy::Fatal);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_round_trip() {
        let store = RedisStore::connect("redis://127.0.0.1/", "localhost", "test")
            .await
            .unwrap();
        store.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
