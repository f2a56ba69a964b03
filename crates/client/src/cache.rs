//! Per-facility TTL result cache with single-flight misses.
//!
//! A key is either `Ready` (value plus expiry) or `Pending` (a shared
//! in-flight computation). Callers arriving while a key is pending await the
//! same computation, so the producer runs once per miss no matter how many
//! callers ask. Failures are handed to every waiter of that attempt and then
//! evicted; nothing but successful values is ever stored.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Minimum time between sweeps of expired entries.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

enum Slot<V, E> {
    Ready {
        value: V,
        expires_at: Instant,
    },
    Pending {
        generation: u64,
        future: SharedResult<V, E>,
    },
}

impl<V, E> Slot<V, E> {
    fn is_attempt(&self, attempt: u64) -> bool {
        matches!(self, Slot::Pending { generation, .. } if *generation == attempt)
    }
}

/// A namespaced result cache.
pub struct ResultCache<V, E> {
    namespace: String,
    entries: Arc<DashMap<String, Slot<V, E>>>,
    generations: AtomicU64,
    last_purge: Mutex<Instant>,
}

impl<V, E> ResultCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
            last_purge: Mutex::new(Instant::now()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Return the cached value for `key`, or compute it with `producer`.
    ///
    /// `producer` is only invoked on a miss or after expiry, and at most once
    /// for all callers that miss the same key before it settles.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.purge_if_due();
        let future = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let in_flight = match occupied.get() {
                    Slot::Ready { value, expires_at } if *expires_at > Instant::now() => {
                        tracing::trace!(namespace = %self.namespace, key, "cache hit");
                        return Ok(value.clone());
                    }
                    Slot::Pending { future, .. } => Some(future.clone()),
                    Slot::Ready { .. } => None,
                };
                match in_flight {
                    Some(future) => {
                        tracing::trace!(namespace = %self.namespace, key, "joining in-flight request");
                        future
                    }
                    None => {
                        tracing::debug!(namespace = %self.namespace, key, "cache entry expired");
                        let (generation, future) = self.launch(key, ttl, producer());
                        occupied.insert(Slot::Pending {
                            generation,
                            future: future.clone(),
                        });
                        future
                    }
                }
            }
            Entry::Vacant(vacant) => {
                tracing::trace!(namespace = %self.namespace, key, "cache miss");
                let (generation, future) = self.launch(key, ttl, producer());
                vacant.insert(Slot::Pending {
                    generation,
                    future: future.clone(),
                });
                future
            }
        };

        future.await
    }

    fn launch<Fut>(&self, key: &str, ttl: Duration, fut: Fut) -> (u64, SharedResult<V, E>)
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let entries = Arc::clone(&self.entries);
        let key = key.to_string();

        let future = async move {
            let result = fut.await;
            match &result {
                Ok(value) => {
                    // Invalidated while in flight: hand the value out but do not store it.
                    if let Some(mut slot) = entries.get_mut(&key) {
                        if slot.is_attempt(generation) {
                            *slot = Slot::Ready {
                                value: value.clone(),
                                expires_at: Instant::now() + ttl,
                            };
                        }
                    }
                }
                Err(_) => {
                    entries.remove_if(&key, |_, slot| slot.is_attempt(generation));
                }
            }
            result
        }
        .boxed()
        .shared();

        (generation, future)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
        tracing::debug!(namespace = %self.namespace, "cache cleared");
    }

    /// Remove expired values and in-flight slots every waiter has abandoned,
    /// returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| match slot {
            Slot::Ready { expires_at, .. } => *expires_at > now,
            Slot::Pending { future, .. } => future.strong_count().is_some_and(|count| count > 1),
        });
        before.saturating_sub(self.entries.len())
    }

    fn purge_if_due(&self) {
        let now = Instant::now();
        {
            let mut last = self
                .last_purge
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if now.duration_since(*last) < PURGE_INTERVAL {
                return;
            }
            *last = now;
        }
        let dropped = self.purge_expired();
        if dropped > 0 {
            tracing::debug!(namespace = %self.namespace, dropped, "purged stale cache entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry of caches, one per facility.
pub struct CacheRegistry<V, E> {
    caches: DashMap<String, Arc<ResultCache<V, E>>>,
}

impl<V, E> Default for CacheRegistry<V, E> {
    fn default() -> Self {
        Self {
            caches: DashMap::new(),
        }
    }
}

impl<V, E> CacheRegistry<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache for `facility`, created on first use.
    pub fn for_facility(&self, facility: &str) -> Arc<ResultCache<V, E>> {
        let namespace = format!("icat:{facility}");
        self.caches
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(ResultCache::new(namespace)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
