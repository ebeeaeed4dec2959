//! Request coalescing with bounded-staleness expiry.
//!
//! The [`CoalescingCache`] maps keys to pending-or-resolved generations. For
//! every key of a batch it hands out a [`ValueFuture`]; concurrent requests
//! for the same still-fresh key share a single generation, so a request storm
//! against a slow backing source runs the expensive computation exactly once.
//!
//! Staleness is measured strictly from entry creation and is never refreshed
//! on access. A lookup arriving before expiry reuses the in-flight or
//! resolved entry even when that entry's generation only finishes after
//! expiry. That is an accepted bounded-staleness tradeoff, not a bug.

use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use rustc_hash::FxHashMap;
use tokio::sync::watch;

use crate::config::CoalescingConfig;
use crate::time::Instant;

mod cache_error;

pub use cache_error::{CacheError, CacheResult};


/// Produces values for cache keys.
///
/// The returned future is spawned onto the runtime as an independent task, so
/// it must be `'static` and own everything it needs. Distinct keys generate
/// fully in parallel; one key's slow generation never blocks lookups for
/// other keys.
pub trait Generator: Send + Sync + 'static {
    /// The cache key a generation is bound to.
    type Key: Eq + Hash + Clone + Send + Sync + 'static;
    /// The value produced by a generation.
    ///
    /// Values are cloned out to every waiting future, so this is typically an
    /// `Arc` or another cheaply clonable type.
    type Value: Clone + Send + Sync + 'static;

    /// Produces the value for `key`.
    ///
    /// Errors are ordinary resolutions: they are delivered to every waiter of
    /// this generation and cached until the entry goes stale.
    fn generate(&self, key: &Self::Key) -> BoxFuture<'static, CacheResult<Self::Value>>;
}

/// One generation attempt for a key.
///
/// Created on a miss or on staleness, resolved exactly once by the spawned
/// generation task, read-only afterwards. A stale waiter is superseded in the
/// map by a fresh one, never explicitly destroyed; it lives for as long as
/// futures still reference it.
struct Waiter<V> {
    created_at: Instant,
    rx: watch::Receiver<Option<CacheResult<V>>>,
}

/// A shared read handle on one pending-or-resolved cache generation.
///
/// All requesters that observed the same entry hold handles to the same
/// underlying waiter.
pub struct ValueFuture<V> {
    waiter: Arc<Waiter<V>>,
}

impl<V> Clone for ValueFuture<V> {
    fn clone(&self) -> Self {
        ValueFuture {
            waiter: Arc::clone(&self.waiter),
        }
    }
}

impl<V> fmt::Debug for ValueFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueFuture")
            .field("resolved", &self.waiter.rx.borrow().is_some())
            .finish()
    }
}

impl<V: Clone> ValueFuture<V> {
    /// Suspends the calling task until the bound generation resolves.
    ///
    /// Resolution happens exactly once per generation; afterwards every
    /// current and future handle returns immediately with the same result.
    /// There is no cancellation or timeout: a generation that never finishes
    /// blocks all of its waiters indefinitely. A generation task that *died*
    /// without resolving (a panic, or runtime shutdown) resolves its waiters
    /// with [`CacheError::InternalError`] instead.
    pub async fn wait(&self) -> CacheResult<V> {
        let mut rx = self.waiter.rx.clone();
        match rx.wait_for(|resolution| resolution.is_some()).await {
            Ok(resolution) => resolution
                .clone()
                .unwrap_or(Err(CacheError::InternalError)),
            Err(_) => Err(CacheError::InternalError),
        }
    }
}

/// A deduplicating, TTL-based cache of generated values.
///
/// Concurrent requests for the same still-fresh key share a single
/// generation, even while that generation is still in flight. A short
/// critical section protects only the lookup/insert step of the key map; the
/// generation itself runs as an independent spawned task.
///
/// Stale entries are superseded on lookup, never proactively evicted.
pub struct CoalescingCache<G: Generator> {
    generator: Arc<G>,
    ttl: Duration,
    waiters: Mutex<FxHashMap<G::Key, Arc<Waiter<G::Value>>>>,
}

impl<G: Generator> fmt::Debug for CoalescingCache<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let waiters = self.waiters.try_lock().map(|w| w.len()).unwrap_or_default();
        f.debug_struct("CoalescingCache")
            .field("ttl", &self.ttl)
            .field("waiters", &waiters)
            .finish()
    }
}

impl<G: Generator> CoalescingCache<G> {
    /// Creates a cache over `generator` whose entries go stale after `ttl`.
    ///
    /// Callers needing fast retry after a failed generation must configure a
    /// correspondingly short `ttl`, since failures are cached like successes.
    pub fn new(generator: G, ttl: Duration) -> Self {
        CoalescingCache {
            generator: Arc::new(generator),
            ttl,
            waiters: Mutex::new(FxHashMap::default()),
        }
    }

    /// Creates a cache from a [`CoalescingConfig`].
    pub fn from_config(generator: G, config: &CoalescingConfig) -> Self {
        Self::new(generator, config.ttl)
    }

    /// Requests a batch of keys, returning one future per key, in key order.
    ///
    /// This never suspends. Per key, a still-fresh entry is reused verbatim,
    /// including one whose generation is still in flight; otherwise a fresh
    /// entry is published and exactly one generation task is spawned for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request_batch(&self, keys: &[G::Key]) -> Vec<ValueFuture<G::Value>> {
        let mut waiters = self.waiters.lock().unwrap();
        keys.iter()
            .map(|key| ValueFuture {
                waiter: self.lookup_or_spawn(&mut waiters, key),
            })
            .collect()
    }

    /// Requests a single key.
    ///
    /// Equivalent to a one-element [`request_batch`](Self::request_batch).
    pub fn request(&self, key: &G::Key) -> ValueFuture<G::Value> {
        let mut waiters = self.waiters.lock().unwrap();
        ValueFuture {
            waiter: self.lookup_or_spawn(&mut waiters, key),
        }
    }

    fn lookup_or_spawn(
        &self,
        waiters: &mut FxHashMap<G::Key, Arc<Waiter<G::Value>>>,
        key: &G::Key,
    ) -> Arc<Waiter<G::Value>> {
        // Reuse the current entry unless it is missing or stale. An entry
        // whose generation is still in flight is reused as well, which is
        // what dedupes concurrent generation.
        if let Some(waiter) = waiters.get(key) {
            if waiter.created_at.elapsed() <= self.ttl {
                return Arc::clone(waiter);
            }
        }

        let (tx, rx) = watch::channel(None);
        let waiter = Arc::new(Waiter {
            created_at: Instant::now(),
            rx,
        });
        waiters.insert(key.clone(), Arc::clone(&waiter));

        tracing::trace!("Spawning generation for a missing or stale cache entry");

        let generator = Arc::clone(&self.generator);
        let key = key.clone();
        tokio::spawn(async move {
            let result = generator.generate(&key).await;
            // All receivers may be gone already, in which case the
            // resolution is simply dropped.
            tx.send(Some(result)).ok();
        });

        waiter
    }
}
