//! `TenantConnectorRegistry` (spec §4.3).
//!
//! A single coarse `parking_lot::RwLock` guards the cache, mirroring
//! the concurrency shape of the teacher's `ConnectorRegistry` (read
//! lock for the hit path, write lock for mutation), with TTL expiry, a
//! config-driven factory, and periodic cleanup added on top. Cold-cache
//! construction is serialized per key through a `tokio::sync::Mutex`
//! held for the duration of config resolution and `connect()` — the
//! `parking_lot` guard on the cache itself is never held across an
//! `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::warn;

use super::config_provider::ConnectorConfigProvider;
use super::connector::{Connector, ConnectorType};
use super::entry::CacheEntry;
use super::factory::ConnectorFactory;
use crate::config::RegistryConfig;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    factory_creations: AtomicU64,
    factory_failures: AtomicU64,
    connection_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub factory_creations: u64,
    pub factory_failures: u64,
    pub connection_errors: u64,
    pub last_eviction: Option<DateTime<Utc>>,
    pub last_factory_create: Option<DateTime<Utc>>,
    /// Live cache entry count, per spec §6's `GetStats` + `Count` +
    /// `HitRate` snapshot for `/cache/stats`.
    pub count: usize,
    pub hit_rate: f64,
}

struct Inner {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    allowed_types: Option<HashSet<ConnectorType>>,
    config_provider: Arc<dyn ConnectorConfigProvider>,
    factory: Arc<dyn ConnectorFactory>,
    counters: Counters,
    last_eviction: Mutex<Option<DateTime<Utc>>>,
    last_factory_create: Mutex<Option<DateTime<Utc>>>,
    cleanup_notify: Notify,
    tasks: Mutex<JoinSet<()>>,
    /// One async mutex per key ever requested, used to serialize
    /// cold-cache construction (config resolution, `factory.create`,
    /// `connect()`) so concurrent misses on the same key coalesce into
    /// one construction instead of racing. `tokio::sync::Mutex` is
    /// held across `.await` by design, unlike `entries`. Entries here
    /// are never removed; the map's size is bounded by the number of
    /// distinct `(tenant, connector)` pairs ever looked up, not by
    /// request volume.
    construction_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn cache_key(tenant: &str, name: &str) -> String {
    format!("{tenant}:{name}")
}

/// At-most-one live connector per `(tenant, connector-name)`. See spec
/// §4.3.
#[derive(Clone)]
pub struct TenantConnectorRegistry(Arc<Inner>);

impl TenantConnectorRegistry {
    pub fn new(
        config: RegistryConfig,
        config_provider: Arc<dyn ConnectorConfigProvider>,
        factory: Arc<dyn ConnectorFactory>,
        allowed_types: Option<HashSet<ConnectorType>>,
    ) -> Self {
        Self(Arc::new(Inner {
            entries: RwLock::new(HashMap::new()),
            ttl: config.ttl,
            allowed_types,
            config_provider,
            factory,
            counters: Counters::default(),
            last_eviction: Mutex::new(None),
            last_factory_create: Mutex::new(None),
            cleanup_notify: Notify::new(),
            tasks: Mutex::new(JoinSet::new()),
            construction_locks: Mutex::new(HashMap::new()),
        }))
    }

    fn fresh_hit(&self, key: &str, now: DateTime<Utc>) -> Option<Arc<dyn Connector>> {
        let entries = self.0.entries.read();
        let entry = entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        entry.touch(now);
        self.0.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.connector.clone())
    }

    /// Looks up a cached, unexpired connector or lazily constructs one,
    /// per spec §4.3. Never holds `entries` across an `.await`: the hot
    /// path only ever takes a brief read lock, and construction for a
    /// given key is serialized through a per-key `construction_locks`
    /// entry rather than by holding the cache's own lock during config
    /// resolution and `connect()`.
    pub async fn get_connector(&self, tenant: &str, name: &str) -> CoreResult<Arc<dyn Connector>> {
        let key = cache_key(tenant, name);
        let now = Utc::now();

        if let Some(connector) = self.fresh_hit(&key, now) {
            return Ok(connector);
        }

        let key_lock = {
            let mut locks = self.0.construction_locks.lock();
            locks.entry(key.clone()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
        };
        let _guard = key_lock.lock().await;

        // Re-check: another task may have finished constructing this
        // entry while we waited for the per-key lock.
        let now = Utc::now();
        if let Some(connector) = self.fresh_hit(&key, now) {
            return Ok(connector);
        }

        self.create_and_cache(tenant, name, &key, now).await
    }

    async fn create_and_cache(&self, tenant: &str, name: &str, key: &str, now: DateTime<Utc>) -> CoreResult<Arc<dyn Connector>> {
        let config = self
            .0
            .config_provider
            .get_config(tenant, name)
            .await
            .ok_or_else(|| CoreError::ConnectorConfigMissing {
                tenant: tenant.to_string(),
                connector: name.to_string(),
            })?;

        let connector_type = ConnectorType::parse(&config.connector_type)
            .ok_or_else(|| CoreError::UnknownConnectorType(config.connector_type.clone()))?;

        if let Some(allowed) = &self.0.allowed_types {
            if !allowed.contains(&connector_type) {
                return Err(CoreError::UnknownConnectorType(config.connector_type.clone()));
            }
        }

        let mut connector = match self.0.factory.create(connector_type, &config) {
            Ok(c) => c,
            Err(e) => {
                self.0.counters.factory_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        if let Err(e) = connector.connect().await {
            self.0.counters.connection_errors.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let expires_at = now + chrono::Duration::from_std(self.0.ttl).unwrap_or_default();
        let handle: Arc<dyn Connector> = Arc::from(connector);
        let entry = CacheEntry::new(handle.clone(), now, expires_at);
        self.0.entries.write().insert(key.to_string(), entry);

        self.0.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.0.counters.factory_creations.fetch_add(1, Ordering::Relaxed);
        *self.0.last_factory_create.lock() = Some(now);

        Ok(handle)
    }

    pub async fn refresh_tenant(&self, tenant: &str) -> usize {
        let prefix = format!("{tenant}:");
        self.evict_matching(|key, _| key.starts_with(&prefix)).await
    }

    pub async fn refresh_connector(&self, tenant: &str, name: &str) -> usize {
        let key = cache_key(tenant, name);
        self.evict_matching(|k, _| k == key).await
    }

    pub async fn refresh_all(&self) -> usize {
        self.evict_matching(|_, _| true).await
    }

    pub async fn cleanup(&self) -> usize {
        let now = Utc::now();
        self.evict_matching(move |_, entry: &CacheEntry| entry.is_expired(now)).await
    }

    async fn evict_matching(&self, predicate: impl Fn(&str, &CacheEntry) -> bool) -> usize {
        let evicted: Vec<Arc<dyn Connector>> = {
            let mut entries = self.0.entries.write();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(k, e)| predicate(k, e))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).map(|e| e.connector).collect()
        };

        let count = evicted.len();
        for connector in evicted {
            if let Err(e) = connector.disconnect().await {
                warn!(error = %e, "connector disconnect failed during eviction");
            }
        }

        if count > 0 {
            self.0.counters.evictions.fetch_add(count as u64, Ordering::Relaxed);
            *self.0.last_eviction.lock() = Some(Utc::now());
        }
        count
    }

    /// Spawns a background task that calls `cleanup` on every tick until
    /// `shutdown`/`disconnect_all` notifies it to stop.
    pub fn start_periodic_cleanup(&self, interval: Duration) {
        let registry = self.clone();
        let mut tasks = self.0.tasks.lock();
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.cleanup().await;
                    }
                    _ = registry.0.cleanup_notify.notified() => {
                        return;
                    }
                }
            }
        });
    }

    pub fn count(&self) -> usize {
        self.0.entries.read().len()
    }

    pub fn count_by_tenant(&self, tenant: &str) -> usize {
        let prefix = format!("{tenant}:");
        self.0.entries.read().keys().filter(|k| k.starts_with(&prefix)).count()
    }

    pub fn get_connectors_by_tenant(&self, tenant: &str) -> Vec<String> {
        let prefix = format!("{tenant}:");
        self.0
            .entries
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            hits: self.0.counters.hits.load(Ordering::Relaxed),
            misses: self.0.counters.misses.load(Ordering::Relaxed),
            evictions: self.0.counters.evictions.load(Ordering::Relaxed),
            factory_creations: self.0.counters.factory_creations.load(Ordering::Relaxed),
            factory_failures: self.0.counters.factory_failures.load(Ordering::Relaxed),
            connection_errors: self.0.counters.connection_errors.load(Ordering::Relaxed),
            last_eviction: *self.0.last_eviction.lock(),
            last_factory_create: *self.0.last_factory_create.lock(),
            count: self.count(),
            hit_rate: self.hit_rate(),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.0.counters.hits.load(Ordering::Relaxed);
        let misses = self.0.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Disconnects every cached connector and empties the cache; used at
    /// process shutdown. Also stops any running periodic cleanup task.
    pub async fn disconnect_all(&self) {
        self.0.cleanup_notify.notify_waiters();
        self.evict_matching(|_, _| true).await;

        let mut set = {
            let mut tasks = self.0.tasks.lock();
            std::mem::take(&mut *tasks)
        };
        while set.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64 as TestAtomicU64, Ordering as TestOrdering};

    use super::*;
    use crate::registry::config_provider::StaticConnectorConfigProvider;

    #[derive(Debug)]
    struct CountingConnector {
        connect_delay: Duration,
    }

    #[async_trait::async_trait]
    impl Connector for CountingConnector {
        async fn connect(&mut self) -> CoreResult<()> {
            if !self.connect_delay.is_zero() {
                tokio::time::sleep(self.connect_delay).await;
            }
            Ok(())
        }

        async fn disconnect(&self) -> CoreResult<()> {
            Ok(())
        }

        async fn health_check(&self) -> CoreResult<bool> {
            Ok(true)
        }
    }

    struct CountingFactory {
        creations: TestAtomicU64,
        connect_delay: Duration,
    }

    impl ConnectorFactory for CountingFactory {
        fn create(&self, _connector_type: ConnectorType, _config: &super::super::connector::ConnectorConfig) -> CoreResult<Box<dyn Connector>> {
            self.creations.fetch_add(1, TestOrdering::Relaxed);
            Ok(Box::new(CountingConnector {
                connect_delay: self.connect_delay,
            }))
        }
    }

    fn config() -> super::super::connector::ConnectorConfig {
        super::super::connector::ConnectorConfig {
            connector_type: "postgres".to_string(),
            endpoint: "localhost".to_string(),
            credentials: HashMap::new(),
            settings: HashMap::new(),
        }
    }

    fn registry_with(factory: Arc<CountingFactory>, ttl: Duration) -> TenantConnectorRegistry {
        let provider = Arc::new(StaticConnectorConfigProvider::new());
        provider.set_config("t", "c", config());
        TenantConnectorRegistry::new(RegistryConfig { ttl }, provider, factory, None)
    }

    #[tokio::test]
    async fn concurrent_cold_gets_coalesce_to_one_factory_creation() {
        let factory = Arc::new(CountingFactory {
            creations: TestAtomicU64::new(0),
            connect_delay: Duration::from_millis(50),
        });
        let registry = registry_with(factory.clone(), Duration::from_secs(30));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.get_connector("t", "c").await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(factory.creations.load(TestOrdering::Relaxed), 1);
        let stats = registry.stats();
        assert_eq!(stats.factory_creations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 99);
    }

    #[tokio::test]
    async fn unknown_tenant_returns_config_missing() {
        let factory = Arc::new(CountingFactory {
            creations: TestAtomicU64::new(0),
            connect_delay: Duration::ZERO,
        });
        let provider = Arc::new(StaticConnectorConfigProvider::new());
        let registry = TenantConnectorRegistry::new(RegistryConfig { ttl: Duration::from_secs(30) }, provider, factory, None);

        let err = registry.get_connector("ghost", "c").await.unwrap_err();
        assert!(matches!(err, CoreError::ConnectorConfigMissing { .. }));
    }

    #[tokio::test]
    async fn refresh_connector_is_idempotent() {
        let factory = Arc::new(CountingFactory {
            creations: TestAtomicU64::new(0),
            connect_delay: Duration::ZERO,
        });
        let registry = registry_with(factory, Duration::from_secs(30));
        registry.get_connector("t", "c").await.unwrap();

        assert_eq!(registry.refresh_connector("t", "c").await, 1);
        assert_eq!(registry.refresh_connector("t", "c").await, 0);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn refresh_tenant_leaves_other_tenants_untouched() {
        let factory = Arc::new(CountingFactory {
            creations: TestAtomicU64::new(0),
            connect_delay: Duration::ZERO,
        });
        let provider = Arc::new(StaticConnectorConfigProvider::new());
        provider.set_config("t1", "c", config());
        provider.set_config("t2", "c", config());
        let registry = TenantConnectorRegistry::new(RegistryConfig { ttl: Duration::from_secs(30) }, provider, factory, None);

        registry.get_connector("t1", "c").await.unwrap();
        registry.get_connector("t2", "c").await.unwrap();

        registry.refresh_tenant("t1").await;
        assert_eq!(registry.count_by_tenant("t1"), 0);
        assert_eq!(registry.count_by_tenant("t2"), 1);
    }

    #[tokio::test]
    async fn periodic_cleanup_evicts_expired_entries() {
        let factory = Arc::new(CountingFactory {
            creations: TestAtomicU64::new(0),
            connect_delay: Duration::ZERO,
        });
        let registry = registry_with(factory, Duration::from_millis(50));
        registry.get_connector("t", "c").await.unwrap();
        assert_eq!(registry.count(), 1);

        registry.start_periodic_cleanup(Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(registry.count(), 0);
        assert!(registry.stats().evictions >= 1);
    }

    #[tokio::test]
    async fn hit_rate_is_zero_with_no_requests() {
        let factory = Arc::new(CountingFactory {
            creations: TestAtomicU64::new(0),
            connect_delay: Duration::ZERO,
        });
        let registry = registry_with(factory, Duration::from_secs(30));
        assert_eq!(registry.hit_rate(), 0.0);
    }
}
