//! Read-through TTL cache in front of the key-hosting service.
//!
//! ## Single-flight
//!
//! Concurrent misses for the same alias collapse into one external fetch.
//! The first caller registers an in-flight slot and spawns the fetch as its
//! own task; later callers subscribe to the slot's broadcast channel. The
//! fetch task stores the result and clears the slot while holding the slot's
//! map entry, so a caller either finds the stored entry or joins the
//! broadcast, never neither.
//!
//! Because the fetch runs in its own task, a caller that goes away (for
//! example a dropped HTTP request) does not strand the other waiters.
//!
//! ## Expiry
//!
//! Entries live for a fixed TTL from the moment they are stored. Expired
//! entries are dropped on access and by [`KeyCache::sweep`]. Failed fetches
//! are never cached.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::provider::KeyFetcher;

type FetchOutcome = Result<Arc<str>, ProviderError>;

/// Configuration for the key cache.
#[derive(Debug, Clone)]
pub struct KeyCacheConfig {
    /// Lifetime of a cached entry (default: 2 minutes).
    pub ttl: Duration,
    /// Upper bound on one key fetch (default: 10 seconds).
    pub fetch_timeout: Duration,
    /// Interval of the background expiry sweep (default: 10 minutes).
    pub sweep_interval: Duration,
    /// Fetches one role lookup may have running at once (default: 8).
    pub max_concurrent_fetches: usize,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            fetch_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(600),
            max_concurrent_fetches: 8,
        }
    }
}

impl KeyCacheConfig {
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit.max(1);
        self
    }
}

/// Cached key text for one alias.
struct CacheEntry {
    keys: Arc<str>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(keys: Arc<str>, ttl: Duration) -> Self {
        Self {
            keys,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct InFlight {
    id: u64,
    tx: broadcast::Sender<FetchOutcome>,
}

struct Inner {
    fetcher: Arc<dyn KeyFetcher>,
    entries: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, InFlight>,
    config: KeyCacheConfig,
    next_fetch_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
}

impl Inner {
    fn live_entry(&self, alias: &str) -> Option<Arc<str>> {
        let now = Instant::now();
        let entry = self.entries.get(alias)?;
        if entry.is_live(now) {
            return Some(Arc::clone(&entry.keys));
        }
        drop(entry);
        self.entries.remove_if(alias, |_, e| !e.is_live(now));
        None
    }
}

/// Clears the in-flight slot if the fetch task ends without publishing,
/// so waiters observe a closed channel instead of hanging.
struct FlightGuard {
    inner: Arc<Inner>,
    alias: String,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .remove_if(&self.alias, |_, flight| flight.id == self.id);
    }
}

/// TTL cache of `authorized_keys` text keyed by external alias.
#[derive(Clone)]
pub struct KeyCache {
    inner: Arc<Inner>,
}

impl KeyCache {
    pub fn new(fetcher: Arc<dyn KeyFetcher>, config: KeyCacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                config,
                next_fetch_id: AtomicU64::new(1),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                fetches: AtomicU64::new(0),
                fetch_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Get the key text for `alias`, fetching it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the fetch failure (shared by every caller that joined the same
    /// miss). Failures are not cached.
    pub async fn get(&self, alias: &str) -> Result<String, ProviderError> {
        if let Some(keys) = self.inner.live_entry(alias) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(alias, "Key cache hit");
            return Ok(keys.to_string());
        }

        let mut rx = match self.inner.in_flight.entry(alias.to_string()) {
            Entry::Occupied(flight) => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(alias, "Joining in-flight key fetch");
                flight.get().tx.subscribe()
            }
            Entry::Vacant(slot) => {
                // The previous fetch may have published between our lookup and
                // taking the slot.
                if let Some(keys) = self.inner.live_entry(alias) {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(keys.to_string());
                }
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(alias, "Key cache miss");

                let (tx, rx) = broadcast::channel(1);
                let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                slot.insert(InFlight { id, tx: tx.clone() });
                self.spawn_fetch(alias.to_string(), id, tx);
                rx
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome.map(|keys| keys.to_string()),
            Err(_) => Err(ProviderError::Aborted),
        }
    }

    fn spawn_fetch(&self, alias: String, id: u64, tx: broadcast::Sender<FetchOutcome>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = FlightGuard {
                inner: Arc::clone(&inner),
                alias: alias.clone(),
                id,
            };

            inner.fetches.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            let timeout = inner.config.fetch_timeout;
            let outcome: FetchOutcome =
                match tokio::time::timeout(timeout, inner.fetcher.fetch_keys(&alias)).await {
                    Ok(Ok(keys)) => Ok(Arc::from(keys)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ProviderError::Timeout(timeout)),
                };

            match &outcome {
                Ok(keys) => tracing::debug!(
                    alias = %alias,
                    bytes = keys.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Fetched authorized_keys"
                ),
                Err(e) => {
                    inner.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(alias = %alias, error = %e, "authorized_keys unretrievable");
                }
            }

            // Publish while holding the slot. A slot owned by another fetch (or
            // no slot at all) means the alias was invalidated meanwhile: hand
            // the result to our waiters but do not store it.
            if let Entry::Occupied(slot) = inner.in_flight.entry(alias.clone())
                && slot.get().id == id
            {
                if let Ok(keys) = &outcome {
                    inner
                        .entries
                        .insert(alias.clone(), CacheEntry::new(Arc::clone(keys), inner.config.ttl));
                }
                slot.remove();
            }

            let _ = tx.send(outcome);
        });
    }

    /// Drop any cached entry for `alias`; the next `get` is a forced miss.
    ///
    /// Returns whether a cached entry was removed. Invalidating an absent
    /// alias is a no-op.
    pub fn invalidate(&self, alias: &str) -> bool {
        // Detach the in-flight fetch first so it cannot store after we clear.
        let detached = self.inner.in_flight.remove(alias).is_some();
        let removed = self.inner.entries.remove(alias).is_some();
        tracing::debug!(alias, removed, detached, "Key cache invalidated");
        removed
    }

    /// Remove expired entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.inner.entries.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        if removed > 0 {
            tracing::debug!(removed, "Swept expired key cache entries");
        }
        removed
    }

    /// Sweep expired entries every `sweep_interval` until `shutdown`.
    pub async fn run_sweeper(&self, shutdown: CancellationToken) {
        let period = self.inner.config.sweep_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
    }

    /// Spawn [`Self::run_sweeper`] on the current runtime.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move { cache.run_sweeper(shutdown).await })
    }

    pub fn config(&self) -> &KeyCacheConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> KeyCacheStats {
        KeyCacheStats {
            entries: self.inner.entries.len(),
            in_flight: self.inner.in_flight.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            fetch_failures: self.inner.fetch_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}

/// Statistics for the key cache.
#[derive(Debug, Clone, Default)]
pub struct KeyCacheStats {
    /// Entries currently stored (expired ones included until swept).
    pub entries: usize,
    /// Fetches currently running.
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    /// External fetches started.
    pub fetches: u64,
    pub fetch_failures: u64,
}

impl KeyCacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
