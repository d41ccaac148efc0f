//! CachingClient: local mirror in front of a KvStore

use std::sync::Arc;

use mirrorstore::{ConnectionParams, KvStore, RedisStore, Result};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::SetupError;
use crate::mirror::{Lookup, Mirror};
use crate::populate::{self, PopulationState};
use crate::stats::CacheStats;

/// Default page size hint for the population scan
pub const DEFAULT_SCAN_BATCH: usize = 500;

/// Tuning for a [`CachingClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Start the background population pass on construction
    pub populate_on_start: bool,
    /// Page size hint for the population scan
    pub scan_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            populate_on_start: true,
            scan_batch: DEFAULT_SCAN_BATCH,
        }
    }
}

/// Read-through, write-through mirror of a key-value store
///
/// The mirror is unbounded and never expires entries on its own. Writes are
/// last-writer-wins; there is no transaction spanning mirror and store.
/// Values read from the store are only mirrored if no `set` or `delete` of
/// the same key happened while the read was in flight.
pub struct CachingClient<S: KvStore> {
    /// Source of truth
    store: Arc<S>,

    /// Local copy of string values
    mirror: Arc<Mirror>,

    /// Cache statistics
    stats: Arc<CacheStats>,

    /// Population pass progress
    population: watch::Receiver<PopulationState>,
}

impl CachingClient<RedisStore> {
    /// Validate `params`, connect to Redis, and start the population pass
    ///
    /// Returns as soon as the connection is up; population continues in the
    /// background. Must be called from within a Tokio runtime.
    ///
    /// # Returns
    /// * `Result<CachingClient<RedisStore>, SetupError>` - Client, or a fatal setup error
    pub async fn connect(
        params: &ConnectionParams,
        config: CacheConfig,
    ) -> std::result::Result<Self, SetupError> {
        let endpoint = params.resolve()?;
        info!("Connecting to store at {}", endpoint);

        let store = RedisStore::connect(&endpoint)
            .await
            .map_err(SetupError::Connect)?;

        Ok(Self::with_config(store, config))
    }
}

impl<S: KvStore> CachingClient<S> {
    /// Wrap `store` with the default configuration
    pub fn new(store: S) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    /// Wrap `store`, starting the population pass if configured
    ///
    /// Must be called from within a Tokio runtime when population is enabled.
    pub fn with_config(store: S, config: CacheConfig) -> Self {
        let store = Arc::new(store);
        let mirror = Arc::new(Mirror::default());
        let stats = Arc::new(CacheStats::new());

        let population = if config.populate_on_start {
            let (tx, rx) = watch::channel(PopulationState::Running);
            tokio::spawn(populate::run(
                Arc::clone(&store),
                Arc::clone(&mirror),
                Arc::clone(&stats),
                config.scan_batch,
                tx,
            ));
            rx
        } else {
            watch::channel(PopulationState::Disabled).1
        };

        Self {
            store,
            mirror,
            stats,
            population,
        }
    }

    /// Ping the store, mapping failure to a fatal setup error
    pub async fn ensure_live(&self) -> std::result::Result<(), SetupError> {
        self.store.ping().await.map_err(SetupError::Liveness)
    }

    /// Get a value, from the mirror if present, else from the store
    ///
    /// A value found in the store is mirrored before it is returned, unless
    /// the key was written or deleted during the store read. Store errors
    /// are returned unchanged.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let seen = match self.mirror.lookup(key) {
            Lookup::Hit(value) => {
                self.stats.record_hit();
                return Ok(Some(value));
            }
            Lookup::Miss(epoch) => epoch,
        };

        self.stats.record_miss();
        let value = self.store.get(key).await?;

        if let Some(value) = &value {
            if self.mirror.fill(key.to_string(), value.clone(), seen) {
                self.stats.record_insert();
            }
        }

        Ok(value)
    }

    /// Set a value in the mirror and the store
    ///
    /// An empty key or value is rejected with `Ok(false)` and touches
    /// neither side. If the store write fails or reports failure, the
    /// mirrored entry is dropped again.
    ///
    /// # Returns
    /// * `Result<bool>` - The store's success indicator
    pub async fn set(&self, key: &str, value: &str) -> Result<bool> {
        if key.is_empty() || value.is_empty() {
            return Ok(false);
        }

        self.mirror.write(key, value);
        self.stats.record_insert();

        let result = self.store.set(key, value).await;
        // Only drop the entry if no later write replaced it
        if !matches!(result, Ok(true)) && self.mirror.invalidate(key, value) {
            self.stats.record_removal();
        }
        result
    }

    /// Delete a key from the mirror and the store
    ///
    /// The store delete is issued whether or not the key was mirrored.
    ///
    /// # Returns
    /// * `Result<u64>` - Number of keys the store removed
    pub async fn delete(&self, key: &str) -> Result<u64> {
        if self.mirror.remove(key) {
            self.stats.record_removal();
        }

        self.store.delete(key).await
    }

    /// Whether `key` is currently mirrored
    pub fn is_cached(&self, key: &str) -> bool {
        self.mirror.contains(key)
    }

    /// Number of mirrored entries
    pub fn cache_len(&self) -> usize {
        self.mirror.len()
    }

    /// Empty the mirror and reset statistics (the store is unchanged)
    pub fn clear_cache(&self) {
        self.mirror.clear();
        self.stats.reset();
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Current population state
    pub fn population(&self) -> PopulationState {
        self.population.borrow().clone()
    }

    /// Wait until the population pass stops making progress
    pub async fn wait_for_population(&self) -> PopulationState {
        let mut rx = self.population.clone();
        if rx.wait_for(PopulationState::is_finished).await.is_err() {
            debug!("Population task ended without a final state");
        }
        let state = rx.borrow().clone();
        state
    }

    /// The wrapped store
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mirrorstore::{Error, KeyType, MemoryStore, ScanPage};
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    fn without_population<S: KvStore>(store: S) -> CachingClient<S> {
        CachingClient::with_config(
            store,
            CacheConfig {
                populate_on_start: false,
                ..CacheConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_set_then_get_hits_mirror() {
        let client = without_population(MemoryStore::new());

        assert!(client.set("k", "v").await.unwrap());
        assert_eq!(client.get("k").await.unwrap(), Some("v".to_string()));

        assert_eq!(client.store().ops().sets(), 1);
        assert_eq!(client.store().ops().gets(), 0);
        assert_eq!(client.store().peek("k"), Some("v".to_string()));
        assert_eq!(client.stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_get_miss_fills_mirror() {
        let store = MemoryStore::new();
        store.insert_string("k", "remote");
        let client = without_population(store);

        assert!(!client.is_cached("k"));
        assert_eq!(client.get("k").await.unwrap(), Some("remote".to_string()));
        assert!(client.is_cached("k"));
        assert_eq!(client.get("k").await.unwrap(), Some("remote".to_string()));

        assert_eq!(client.store().ops().gets(), 1);
        assert_eq!(client.stats().misses(), 1);
        assert_eq!(client.stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_get_absent_is_not_mirrored() {
        let client = without_population(MemoryStore::new());

        assert_eq!(client.get("missing").await.unwrap(), None);
        assert_eq!(client.get("missing").await.unwrap(), None);

        assert_eq!(client.cache_len(), 0);
        assert_eq!(client.store().ops().gets(), 2);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_stale() {
        let client = without_population(MemoryStore::new());
        client.set("k", "v").await.unwrap();

        assert_eq!(client.delete("k").await.unwrap(), 1);
        assert!(!client.is_cached("k"));
        assert_eq!(client.get("k").await.unwrap(), None);
        assert_eq!(client.store().ops().gets(), 1);
    }

    #[tokio::test]
    async fn test_delete_uncached_key_still_hits_store() {
        let store = MemoryStore::new();
        store.insert_string("k", "v");
        let client = without_population(store);

        assert_eq!(client.delete("k").await.unwrap(), 1);
        assert_eq!(client.delete("k").await.unwrap(), 0);
        assert_eq!(client.store().ops().deletes(), 2);
        assert_eq!(client.stats().removals(), 0);
    }

    #[tokio::test]
    async fn test_set_rejects_empty_key_or_value() {
        let client = without_population(MemoryStore::new());

        assert!(!client.set("", "v").await.unwrap());
        assert!(!client.set("k", "").await.unwrap());

        assert_eq!(client.cache_len(), 0);
        assert_eq!(client.store().ops().total(), 0);
        assert!(client.store().is_empty());
    }

    #[tokio::test]
    async fn test_failed_set_drops_mirrored_value() {
        let client = without_population(MemoryStore::new());
        client.store().set_unavailable(true);

        let result = client.set("k", "v").await;
        assert!(matches!(result, Err(Error::Unavailable)));
        assert!(!client.is_cached("k"));
        assert_eq!(client.stats().removals(), 1);
    }

    #[tokio::test]
    async fn test_operation_errors_propagate() {
        let client = without_population(MemoryStore::new());
        client.set("cached", "v").await.unwrap();
        client.store().set_unavailable(true);

        assert!(matches!(client.get("other").await, Err(Error::Unavailable)));
        assert!(matches!(client.delete("cached").await, Err(Error::Unavailable)));
        // The mirror was already updated before the store call failed
        assert!(!client.is_cached("cached"));
    }

    #[tokio::test]
    async fn test_population_scenario() {
        let store = MemoryStore::new();
        store.insert_string("a", "1");
        store.insert_string("b", "2");
        store.insert_list("c", ["x", "y"]);

        let client = CachingClient::new(store);
        let state = client.wait_for_population().await;
        assert_eq!(state, PopulationState::Done { cached: 2 });

        let gets_after_population = client.store().ops().gets();
        assert_eq!(client.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(client.get("b").await.unwrap(), Some("2".to_string()));
        assert_eq!(client.store().ops().gets(), gets_after_population);

        assert!(!client.is_cached("c"));
        assert!(matches!(client.get("c").await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_population_failure_is_absorbed() {
        let store = MemoryStore::new();
        store.insert_string("a", "1");
        store.set_unavailable(true);

        let client = CachingClient::new(store);
        let state = client.wait_for_population().await;
        assert!(matches!(state, PopulationState::Failed { cached: 0, .. }));
        assert_eq!(client.cache_len(), 0);

        client.store().set_unavailable(false);
        assert_eq!(client.get("a").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_population_disabled() {
        let store = MemoryStore::new();
        store.insert_string("a", "1");
        let client = without_population(store);

        assert_eq!(client.population(), PopulationState::Disabled);
        assert_eq!(client.wait_for_population().await, PopulationState::Disabled);
        assert_eq!(client.cache_len(), 0);
        assert_eq!(client.store().ops().scans(), 0);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let client = without_population(MemoryStore::new());
        client.set("a", "1").await.unwrap();
        client.get("a").await.unwrap();

        client.clear_cache();

        assert_eq!(client.cache_len(), 0);
        assert_eq!(client.stats().hits(), 0);
        assert_eq!(client.store().peek("a"), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_ensure_live() {
        let client = without_population(MemoryStore::new());
        assert!(client.ensure_live().await.is_ok());

        client.store().set_unavailable(true);
        assert!(matches!(
            client.ensure_live().await,
            Err(SetupError::Liveness(Error::Unavailable))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_http_host_before_connecting() {
        let params = ConnectionParams::new("http://example.com").with_port(6379);
        let result = CachingClient::connect(&params, CacheConfig::default()).await;

        assert!(matches!(result, Err(SetupError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_is_a_setup_error() {
        let params = ConnectionParams::new("127.0.0.1:1");
        let result = CachingClient::connect(&params, CacheConfig::default()).await;

        assert!(matches!(result, Err(SetupError::Connect(_))));
    }

    /// Store whose `get` on one key pauses after reading, until released
    struct GatedStore {
        inner: MemoryStore,
        gate: Mutex<Option<Gate>>,
    }

    struct Gate {
        key: String,
        reached: oneshot::Sender<()>,
        release: oneshot::Receiver<()>,
    }

    struct GateHandle {
        reached: oneshot::Receiver<()>,
        release: oneshot::Sender<()>,
    }

    impl GatedStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                gate: Mutex::new(None),
            }
        }

        fn hold_get(&self, key: &str) -> GateHandle {
            let (reached_tx, reached_rx) = oneshot::channel();
            let (release_tx, release_rx) = oneshot::channel();
            *self.gate.lock() = Some(Gate {
                key: key.to_string(),
                reached: reached_tx,
                release: release_rx,
            });
            GateHandle {
                reached: reached_rx,
                release: release_tx,
            }
        }
    }

    #[async_trait]
    impl KvStore for GatedStore {
        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            let value = self.inner.get(key).await?;

            let gate = {
                let mut slot = self.gate.lock();
                if slot.as_ref().map_or(false, |gate| gate.key == key) {
                    slot.take()
                } else {
                    None
                }
            };
            if let Some(gate) = gate {
                let _ = gate.reached.send(());
                let _ = gate.release.await;
            }

            Ok(value)
        }

        async fn set(&self, key: &str, value: &str) -> Result<bool> {
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<u64> {
            self.inner.delete(key).await
        }

        async fn key_type(&self, key: &str) -> Result<KeyType> {
            self.inner.key_type(key).await
        }

        async fn scan(&self, cursor: u64, count: usize) -> Result<ScanPage> {
            self.inner.scan(cursor, count).await
        }
    }

    fn gated(key: &str, value: &str) -> (GatedStore, GateHandle) {
        let inner = MemoryStore::new();
        inner.insert_string(key, value);
        let store = GatedStore::new(inner);
        let handle = store.hold_get(key);
        (store, handle)
    }

    #[tokio::test]
    async fn test_read_fill_does_not_overwrite_concurrent_set() {
        let (store, handle) = gated("k", "old");
        let client = Arc::new(without_population(store));

        let reader = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.get("k").await }
        });
        handle.reached.await.unwrap();

        assert!(client.set("k", "new").await.unwrap());
        handle.release.send(()).unwrap();

        // The in-flight read answers with what it saw
        assert_eq!(reader.await.unwrap().unwrap(), Some("old".to_string()));
        assert_eq!(client.store().inner.peek("k"), Some("new".to_string()));
        assert_eq!(client.get("k").await.unwrap(), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_read_fill_does_not_resurrect_concurrent_delete() {
        let (store, handle) = gated("k", "old");
        let client = Arc::new(without_population(store));

        let reader = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.get("k").await }
        });
        handle.reached.await.unwrap();

        assert_eq!(client.delete("k").await.unwrap(), 1);
        handle.release.send(()).unwrap();
        reader.await.unwrap().unwrap();

        assert!(!client.is_cached("k"));
        assert_eq!(client.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_population_does_not_resurrect_concurrent_delete() {
        let (store, handle) = gated("k", "old");
        let client = CachingClient::new(store);

        handle.reached.await.unwrap();
        assert_eq!(client.delete("k").await.unwrap(), 1);
        handle.release.send(()).unwrap();

        assert_eq!(
            client.wait_for_population().await,
            PopulationState::Done { cached: 0 }
        );
        assert_eq!(client.store().inner.peek("k"), None);
        assert_eq!(client.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_population_does_not_overwrite_concurrent_set() {
        let (store, handle) = gated("k", "old");
        let client = CachingClient::new(store);

        handle.reached.await.unwrap();
        assert!(client.set("k", "new").await.unwrap());
        handle.release.send(()).unwrap();

        assert_eq!(
            client.wait_for_population().await,
            PopulationState::Done { cached: 0 }
        );
        assert_eq!(client.get("k").await.unwrap(), Some("new".to_string()));
    }
}
