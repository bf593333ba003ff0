//! In-memory result cache with TTL, a stale-while-revalidate window, LRU
//! eviction and single-flight producers.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheConfig;

type Flight<V> = Shared<BoxFuture<'static, V>>;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
}

struct State<V> {
    entries: LruCache<String, Entry<V>>,
    in_flight: HashMap<String, Flight<V>>,
}

struct Inner<V> {
    state: Mutex<State<V>>,
    ttl: Duration,
    stale_ttl: Duration,
}

/// Key → value cache where a key never has two producers running at once.
///
/// - Fresh (`age < ttl`): returned as is.
/// - Stale (`ttl <= age < ttl + stale_ttl`): returned immediately while one
///   background refresh replaces it.
/// - Older or missing: callers wait on a single shared producer.
///
/// Producers run on their own task, so a caller giving up does not cancel
/// the work and the next caller finds the stored result.
pub struct SingleFlightCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for SingleFlightCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> SingleFlightCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, ttl: Duration, stale_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    entries: LruCache::new(capacity),
                    in_flight: HashMap::new(),
                }),
                ttl,
                stale_ttl,
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl, config.stale_ttl)
    }

    /// Return the cached value for `key`, or run `producer` (at most once
    /// across concurrent callers) and cache what it yields.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, producer: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut state = self.inner.state.lock().await;
            let now = Instant::now();
            let cached = state
                .entries
                .get(key)
                .map(|e| (e.value.clone(), now.saturating_duration_since(e.stored_at)));

            match cached {
                Some((value, age)) if age < self.inner.ttl => {
                    debug!(key, "cache hit");
                    return value;
                }
                Some((value, age)) if age < self.inner.ttl + self.inner.stale_ttl => {
                    if !state.in_flight.contains_key(key) {
                        debug!(key, "serving stale entry, refreshing in background");
                        let flight = self.start_flight(&mut state, key, producer());
                        tokio::spawn(flight);
                    } else {
                        debug!(key, "serving stale entry, refresh already running");
                    }
                    return value;
                }
                Some(_) => {
                    state.entries.pop(key);
                }
                None => {}
            }

            match state.in_flight.get(key) {
                Some(flight) => {
                    debug!(key, "joining in-flight producer");
                    flight.clone()
                }
                None => {
                    debug!(key, "cache miss");
                    let flight = self.start_flight(&mut state, key, producer());
                    tokio::spawn(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    fn start_flight<Fut>(&self, state: &mut State<V>, key: &str, work: Fut) -> Flight<V>
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let flight = async move {
            let outcome = AssertUnwindSafe(work).catch_unwind().await;
            let mut state = inner.state.lock().await;
            state.in_flight.remove(&owned_key);
            match outcome {
                Ok(value) => {
                    state.entries.put(
                        owned_key,
                        Entry {
                            value: value.clone(),
                            stored_at: Instant::now(),
                        },
                    );
                    value
                }
                Err(panic) => {
                    drop(state);
                    warn!(key = %owned_key, "cache producer panicked");
                    std::panic::resume_unwind(panic)
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(key.to_string(), flight.clone());
        flight
    }

    /// Drop entries past their stale window. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let now = Instant::now();
        let horizon = self.inner.ttl + self.inner.stale_ttl;

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.stored_at) >= horizon)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            state.entries.pop(key);
        }
        expired.len()
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.inner.state.lock().await.entries.pop(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.entries.len()
    }

    /// Prune on a fixed interval until the returned handle is dropped.
    pub fn spawn_pruner(&self, every: Duration) -> PrunerHandle {
        let cache = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.prune_expired().await;
                if removed > 0 {
                    debug!(removed, "pruned expired cache entries");
                }
            }
        });
        PrunerHandle { handle }
    }
}

/// Owns the periodic pruning task; dropping it stops the task.
pub struct PrunerHandle {
    handle: JoinHandle<()>,
}

impl PrunerHandle {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for PrunerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
