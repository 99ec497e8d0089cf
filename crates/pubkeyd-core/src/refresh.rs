//! Directory snapshot lifecycle.
//!
//! The [`RefreshCoordinator`] owns the published [`DirectorySnapshot`]. It is
//! held behind an `ArcSwap`, so readers take a snapshot with a single atomic
//! load and never wait for a refresh. Refresh cycles are serialized by an
//! async mutex; a failed cycle leaves the published snapshot untouched.
//!
//! Refreshes are driven by [`RefreshCoordinator::run`], which wakes up on a
//! fixed interval and on [`RefreshCoordinator::trigger`]. Demand triggers are
//! coalesced: while one cycle is running at most one more can be pending.
//!
//! ```ignore
//! let coordinator = Arc::new(RefreshCoordinator::bootstrap(provider, RefreshConfig::default()).await?);
//! let handle = coordinator.spawn(shutdown.clone());
//!
//! let snapshot = coordinator.current();
//! coordinator.trigger();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, PubkeyResult};
use crate::provider::DirectoryProvider;
use crate::snapshot::DirectorySnapshot;

/// Configuration for directory refreshes.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval between scheduled refreshes (default: 15 minutes).
    pub interval: Duration,
    /// Upper bound on one directory fetch (default: 60 seconds).
    pub fetch_timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(900),
            fetch_timeout: Duration::from_secs(60),
        }
    }
}

impl RefreshConfig {
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Counters describing refresh activity.
#[derive(Debug, Clone, Default)]
pub struct RefreshStats {
    /// Refresh cycles started.
    pub attempts: u64,
    /// Cycles that installed a new snapshot.
    pub successes: u64,
    /// Cycles that failed and kept the previous snapshot.
    pub failures: u64,
    /// Demand triggers received.
    pub triggers: u64,
    /// Demand triggers absorbed by an already pending cycle.
    pub coalesced_triggers: u64,
    /// Wall-clock time of the last successful refresh.
    pub last_success: Option<OffsetDateTime>,
}

/// Owner of the published directory snapshot.
pub struct RefreshCoordinator {
    provider: Arc<dyn DirectoryProvider>,
    current: ArcSwap<DirectorySnapshot>,
    /// Serializes refresh cycles.
    refresh_lock: Mutex<()>,
    /// Holds at most one permit, which is what bounds pending demand cycles.
    demand: Notify,
    pending: AtomicBool,
    config: RefreshConfig,

    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    triggers: AtomicU64,
    coalesced_triggers: AtomicU64,
    /// Unix timestamp of the last success, 0 if none.
    last_success: AtomicI64,
}

impl RefreshCoordinator {
    /// Create a coordinator publishing `initial` without contacting the
    /// provider.
    pub fn with_snapshot(
        provider: Arc<dyn DirectoryProvider>,
        config: RefreshConfig,
        initial: DirectorySnapshot,
    ) -> Self {
        Self {
            provider,
            current: ArcSwap::from_pointee(initial),
            refresh_lock: Mutex::new(()),
            demand: Notify::new(),
            pending: AtomicBool::new(false),
            config,
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            triggers: AtomicU64::new(0),
            coalesced_triggers: AtomicU64::new(0),
            last_success: AtomicI64::new(0),
        }
    }

    /// Create a coordinator and perform the first refresh synchronously.
    ///
    /// # Errors
    ///
    /// Returns the provider failure if the initial directory load fails. The
    /// service must not start serving in that case.
    pub async fn bootstrap(
        provider: Arc<dyn DirectoryProvider>,
        config: RefreshConfig,
    ) -> PubkeyResult<Self> {
        let coordinator = Self::with_snapshot(provider, config, DirectorySnapshot::empty());
        coordinator.refresh_now().await?;
        Ok(coordinator)
    }

    /// The latest published snapshot (single atomic load, never blocks).
    pub fn current(&self) -> Arc<DirectorySnapshot> {
        self.current.load_full()
    }

    /// Run one refresh cycle now.
    ///
    /// Waits for a cycle already in progress to finish first. On failure the
    /// published snapshot is left exactly as it was.
    pub async fn refresh_now(&self) -> PubkeyResult<()> {
        let _cycle = self.refresh_lock.lock().await;
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let fetched =
            tokio::time::timeout(self.config.fetch_timeout, self.provider.fetch_directory()).await;

        let listing = match fetched {
            Ok(Ok(listing)) => listing,
            Ok(Err(e)) => return Err(self.record_failure(e).into()),
            Err(_) => {
                return Err(self
                    .record_failure(ProviderError::Timeout(self.config.fetch_timeout))
                    .into());
            }
        };

        let snapshot = DirectorySnapshot::from(listing);
        tracing::info!(
            identities = snapshot.identity_count(),
            eligible = snapshot.eligible_count(),
            roles = snapshot.role_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Directory snapshot refreshed"
        );

        self.current.store(Arc::new(snapshot));
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.last_success
            .store(OffsetDateTime::now_utc().unix_timestamp(), Ordering::Relaxed);
        Ok(())
    }

    fn record_failure(&self, error: ProviderError) -> ProviderError {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(error = %error, "Directory refresh failed, keeping previous snapshot");
        error
    }

    /// Request an out-of-band refresh without waiting for it.
    ///
    /// If a demand cycle is already pending the trigger is absorbed by it.
    pub fn trigger(&self) {
        self.triggers.fetch_add(1, Ordering::Relaxed);
        if self.pending.swap(true, Ordering::AcqRel) {
            self.coalesced_triggers.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Directory refresh already pending, trigger coalesced");
        }
        self.demand.notify_one();
    }

    /// Drive scheduled and demanded refreshes until `shutdown` is cancelled.
    ///
    /// The first scheduled cycle fires one interval after the loop starts;
    /// the initial load is expected to come from [`Self::bootstrap`].
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = period.as_secs(),
            "Directory refresh loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Directory refresh loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    tracing::debug!("Scheduled directory refresh");
                }
                _ = self.demand.notified() => {
                    self.pending.store(false, Ordering::Release);
                    tracing::debug!("On-demand directory refresh");
                }
            }

            // Failures are already logged; the previous snapshot stays published.
            let _ = self.refresh_now().await;
        }
    }

    /// Spawn [`Self::run`] on the current runtime.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run(shutdown).await })
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn stats(&self) -> RefreshStats {
        let last = self.last_success.load(Ordering::Relaxed);
        RefreshStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            triggers: self.triggers.load(Ordering::Relaxed),
            coalesced_triggers: self.coalesced_triggers.load(Ordering::Relaxed),
            last_success: (last != 0)
                .then(|| OffsetDateTime::from_unix_timestamp(last).ok())
                .flatten(),
        }
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("config", &self.config)
            .field("identities", &self.current.load().identity_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PubkeyError;
    use crate::provider::DirectoryListing;
    use crate::snapshot::AliasLookup;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    // -------------------------------------------------------------------------
    // Mock Provider
    // -------------------------------------------------------------------------

    struct ScriptedProvider {
        responses: std::sync::Mutex<VecDeque<Result<DirectoryListing, ProviderError>>>,
        fallback: DirectoryListing,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn new(fallback: DirectoryListing) -> Self {
            Self {
                responses: std::sync::Mutex::new(VecDeque::new()),
                fallback,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                gate: None,
                delay: None,
            }
        }

        fn then(self, response: Result<DirectoryListing, ProviderError>) -> Self {
            self.responses.lock().unwrap().push_back(response);
            self
        }

        fn gated(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DirectoryProvider for ScriptedProvider {
        async fn fetch_directory(&self) -> Result<DirectoryListing, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn listing() -> DirectoryListing {
        DirectoryListing::new()
            .with_identity("alice", "alice-gh")
            .with_member("admins", "alice")
    }

    fn quiet_config() -> RefreshConfig {
        RefreshConfig::default()
            .with_interval(Duration::from_secs(3600))
            .with_fetch_timeout(Duration::from_secs(5))
    }

    async fn wait_for_calls(provider: &ScriptedProvider, calls: usize) {
        while provider.calls() < calls {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_bootstrap_installs_first_snapshot() {
        let provider = Arc::new(ScriptedProvider::new(listing()));
        let coordinator = RefreshCoordinator::bootstrap(provider.clone(), quiet_config())
            .await
            .unwrap();

        assert_eq!(provider.calls(), 1);
        let snapshot = coordinator.current();
        assert_eq!(snapshot.alias_of("alice"), AliasLookup::Eligible("alice-gh"));

        let stats = coordinator.stats();
        assert_eq!(stats.successes, 1);
        assert!(stats.last_success.is_some());
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_reported() {
        let provider = Arc::new(
            ScriptedProvider::new(listing()).then(Err(ProviderError::network("connection refused"))),
        );
        let err = RefreshCoordinator::bootstrap(provider, quiet_config())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PubkeyError::UpstreamUnavailable(ProviderError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let provider = Arc::new(
            ScriptedProvider::new(listing())
                .then(Ok(listing()))
                .then(Err(ProviderError::Http(500))),
        );
        let coordinator = RefreshCoordinator::bootstrap(provider, quiet_config())
            .await
            .unwrap();

        let before = coordinator.current();
        let err = coordinator.refresh_now().await.unwrap_err();
        assert!(err.is_upstream());

        let after = coordinator.current();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);

        let stats = coordinator.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn test_successful_refresh_replaces_snapshot() {
        let provider = Arc::new(
            ScriptedProvider::new(listing())
                .then(Ok(listing()))
                .then(Ok(DirectoryListing::new().with_identity("bob", "bob-gh"))),
        );
        let coordinator = RefreshCoordinator::bootstrap(provider, quiet_config())
            .await
            .unwrap();

        let old = coordinator.current();
        coordinator.refresh_now().await.unwrap();
        let new = coordinator.current();

        // Readers holding the old snapshot keep a consistent view.
        assert_eq!(old.alias_of("alice"), AliasLookup::Eligible("alice-gh"));
        assert_eq!(new.alias_of("alice"), AliasLookup::Unknown);
        assert_eq!(new.alias_of("bob"), AliasLookup::Eligible("bob-gh"));
        assert!(new.members_of("admins").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_times_out() {
        let provider = Arc::new(ScriptedProvider::new(listing()).delayed(Duration::from_secs(30)));
        let coordinator = RefreshCoordinator::with_snapshot(
            provider,
            quiet_config(),
            DirectorySnapshot::from(listing()),
        );

        let before = coordinator.current();
        let err = coordinator.refresh_now().await.unwrap_err();
        assert_eq!(
            err,
            PubkeyError::UpstreamUnavailable(ProviderError::Timeout(Duration::from_secs(5)))
        );
        assert!(Arc::ptr_eq(&before, &coordinator.current()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_runs_on_interval() {
        let provider = Arc::new(ScriptedProvider::new(listing()));
        let coordinator = Arc::new(RefreshCoordinator::with_snapshot(
            provider.clone(),
            quiet_config().with_interval(Duration::from_secs(60)),
            DirectorySnapshot::empty(),
        ));
        let shutdown = CancellationToken::new();
        let handle = coordinator.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.calls(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(provider.calls(), 1);
        assert_eq!(
            coordinator.current().alias_of("alice"),
            AliasLookup::Eligible("alice-gh")
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.calls(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_scheduled_refresh_is_not_fatal() {
        let provider = Arc::new(
            ScriptedProvider::new(listing()).then(Err(ProviderError::network("dns failure"))),
        );
        let coordinator = Arc::new(RefreshCoordinator::with_snapshot(
            provider.clone(),
            quiet_config().with_interval(Duration::from_secs(60)),
            DirectorySnapshot::empty(),
        ));
        let shutdown = CancellationToken::new();
        let handle = coordinator.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(provider.calls(), 1);
        assert_eq!(coordinator.current().identity_count(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.calls(), 2);
        assert_eq!(coordinator.current().identity_count(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_demand_triggers_are_coalesced() {
        let gate = Arc::new(Semaphore::new(0));
        let provider = Arc::new(ScriptedProvider::new(listing()).gated(gate.clone()));
        let coordinator = Arc::new(RefreshCoordinator::with_snapshot(
            provider.clone(),
            quiet_config(),
            DirectorySnapshot::empty(),
        ));
        let shutdown = CancellationToken::new();
        let handle = coordinator.spawn(shutdown.clone());

        coordinator.trigger();
        wait_for_calls(&provider, 1).await;

        // First cycle is blocked in the provider; pile up more triggers.
        coordinator.trigger();
        coordinator.trigger();
        coordinator.trigger();

        gate.add_permits(16);
        wait_for_calls(&provider, 2).await;

        // No further cycles beyond the single pending one.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(provider.calls(), 2);

        let stats = coordinator.stats();
        assert_eq!(stats.triggers, 4);
        assert_eq!(stats.coalesced_triggers, 2);
        assert_eq!(stats.successes, 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_run_one_at_a_time() {
        let gate = Arc::new(Semaphore::new(0));
        let provider = Arc::new(ScriptedProvider::new(listing()).gated(gate.clone()));
        let coordinator = Arc::new(RefreshCoordinator::with_snapshot(
            provider.clone(),
            quiet_config(),
            DirectorySnapshot::empty(),
        ));

        let spawn_refresh = || {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh_now().await })
        };
        let first = spawn_refresh();
        let second = spawn_refresh();
        wait_for_calls(&provider, 1).await;

        // The second cycle waits on the lock held by the first.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(provider.calls(), 1);

        // Releasing the holder lets the waiter in.
        gate.add_permits(1);
        wait_for_calls(&provider, 2).await;

        gate.add_permits(1);
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(provider.peak_in_flight(), 1);
        assert_eq!(coordinator.stats().successes, 2);
    }

    #[tokio::test]
    async fn test_readers_do_not_wait_for_refresh() {
        let gate = Arc::new(Semaphore::new(0));
        let provider = Arc::new(ScriptedProvider::new(listing()).gated(gate.clone()));
        let coordinator = Arc::new(RefreshCoordinator::with_snapshot(
            provider.clone(),
            quiet_config(),
            DirectorySnapshot::from(listing()),
        ));

        let refreshing = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh_now().await })
        };
        wait_for_calls(&provider, 1).await;

        // Refresh is in flight; reads still see the last good snapshot.
        assert_eq!(
            coordinator.current().alias_of("alice"),
            AliasLookup::Eligible("alice-gh")
        );

        gate.add_permits(1);
        refreshing.await.unwrap().unwrap();
    }
}
