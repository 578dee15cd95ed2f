//! Single-slot TTL cache shared across concurrent requests.
//!
//! The lock is never held across the refresh future, so readers are not blocked by an
//! in-flight refresh. Two callers that both see a stale entry may both refresh; the last
//! writer wins.

use super::provider::{ListProvider, ProviderRecord, Record};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// One captured payload and the instant it was captured.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub captured_at: Instant,
    pub payload: T,
}

/// Time-boxed, single-entry cache. Empty on construction.
pub struct FreshnessCache<T> {
    ttl: Duration,
    slot: RwLock<Option<CacheEntry<T>>>,
}

impl<T: Clone> FreshnessCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Returns the cached payload if it is younger than the TTL.
    pub fn fresh(&self) -> Option<T> {
        let guard = self.slot.read().ok()?;
        guard
            .as_ref()
            .filter(|e| e.captured_at.elapsed() < self.ttl)
            .map(|e| e.payload.clone())
    }

    /// Overwrites the slot with a newly captured payload.
    pub fn store(&self, payload: T) {
        if let Ok(mut guard) = self.slot.write() {
            *guard = Some(CacheEntry {
                captured_at: Instant::now(),
                payload,
            });
        }
    }

    /// Returns a fresh payload, or runs `refresh` and stores its result when it succeeds.
    /// Failed refreshes are returned to the caller without touching the slot.
    pub async fn get_or_refresh<E, F, Fut>(&self, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.fresh() {
            tracing::debug!(target: "relay::cache", "Cache hit");
            return Ok(hit);
        }
        tracing::debug!(target: "relay::cache", "Cache miss, refreshing");
        let value = refresh().await?;
        self.store(value.clone());
        Ok(value)
    }
}

/// Wraps a list provider with a [`FreshnessCache`]; only successful listings are cached.
pub struct CachedListProvider {
    inner: Arc<dyn ListProvider>,
    cache: FreshnessCache<Vec<Record>>,
}

impl CachedListProvider {
    pub fn new(inner: Arc<dyn ListProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: FreshnessCache::new(ttl),
        }
    }
}

#[async_trait::async_trait]
impl ListProvider for CachedListProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list(&self) -> ProviderRecord<Vec<Record>> {
        let result = self
            .cache
            .get_or_refresh(|| async {
                match self.inner.list().await {
                    ProviderRecord::Ok(records) => Ok(records),
                    ProviderRecord::Failed { error } => Err(error),
                }
            })
            .await;
        match result {
            Ok(records) => ProviderRecord::Ok(records),
            Err(error) => ProviderRecord::Failed { error },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPeers {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingPeers {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait::async_trait]
    impl ListProvider for CountingPeers {
        fn name(&self) -> &str {
            "peers"
        }

        async fn list(&self) -> ProviderRecord<Vec<Record>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return ProviderRecord::failed("describe-instances failed");
            }
            let mut r = Record::new();
            r.insert("instance_id".into(), json!(format!("i-{n}")));
            ProviderRecord::Ok(vec![r])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn calls_within_ttl_share_one_fetch() {
        let inner = Arc::new(CountingPeers::new(false));
        let cached = CachedListProvider::new(inner.clone(), Duration::from_secs(20));

        let first = cached.list().await;
        tokio::time::advance(Duration::from_secs(19)).await;
        let second = cached.list().await;

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_triggers_refresh() {
        let inner = Arc::new(CountingPeers::new(false));
        let cached = CachedListProvider::new(inner.clone(), Duration::from_secs(20));

        let first = cached.list().await;
        tokio::time::advance(Duration::from_secs(21)).await;
        let second = cached.list().await;

        assert_ne!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let inner = Arc::new(CountingPeers::new(true));
        let cached = CachedListProvider::new(inner.clone(), Duration::from_secs(20));

        assert!(cached.list().await.is_failed());
        assert!(cached.list().await.is_failed());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_is_empty_until_stored() {
        let cache: FreshnessCache<u32> = FreshnessCache::new(Duration::from_secs(5));
        assert_eq!(cache.fresh(), None);
        cache.store(7);
        assert_eq!(cache.fresh(), Some(7));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.fresh(), None);
    }
}
