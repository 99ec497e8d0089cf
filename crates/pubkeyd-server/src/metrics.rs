//! Prometheus metrics for pubkeyd.
//!
//! Request counters are recorded by the handlers as requests complete.
//! Directory and key cache figures are kept by the core as plain atomics and
//! mirrored into the recorder when `/metrics` is scraped.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use pubkeyd_core::{DirectorySnapshot, KeyCacheStats, RefreshStats, Resolver};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Directory metrics
    pub const KNOWN_USERS: &str = "pubkeyd_known_users";
    pub const KNOWN_ROLES: &str = "pubkeyd_known_roles";
    pub const DIRECTORY_REFRESHES_TOTAL: &str = "pubkeyd_directory_refreshes_total";
    pub const DIRECTORY_REFRESH_FAILURES_TOTAL: &str = "pubkeyd_directory_refresh_failures_total";

    // Request metrics
    pub const AUTHORIZED_KEYS_REQUESTS_TOTAL: &str = "pubkeyd_authorized_keys_requests_total";
    pub const ROLE_AUTHORIZED_KEYS_REQUESTS_TOTAL: &str =
        "pubkeyd_role_authorized_keys_requests_total";
    pub const GITHUB_NAME_REQUESTS_TOTAL: &str = "pubkeyd_github_name_requests_total";

    // Key cache metrics
    pub const KEY_CACHE_ENTRIES: &str = "pubkeyd_key_cache_entries";
    pub const KEY_CACHE_HITS_TOTAL: &str = "pubkeyd_key_cache_hits_total";
    pub const KEY_CACHE_MISSES_TOTAL: &str = "pubkeyd_key_cache_misses_total";
    pub const KEY_CACHE_HIT_RATE: &str = "pubkeyd_key_cache_hit_rate_percent";
    pub const KEY_FETCH_FAILURES_TOTAL: &str = "pubkeyd_key_fetch_failures_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics is served by the router.
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Count one handled request against a per-route counter.
pub fn record_request(metric: &'static str, method: &str, status: u16) {
    counter!(
        metric,
        "code" => status.to_string(),
        "method" => method.to_string()
    )
    .increment(1);
}

pub fn record_directory_stats(stats: &RefreshStats, snapshot: &DirectorySnapshot) {
    gauge!(names::KNOWN_USERS).set(snapshot.eligible_count() as f64);
    gauge!(names::KNOWN_ROLES).set(snapshot.role_count() as f64);
    counter!(names::DIRECTORY_REFRESHES_TOTAL).absolute(stats.successes);
    counter!(names::DIRECTORY_REFRESH_FAILURES_TOTAL).absolute(stats.failures);
}

pub fn record_key_cache_stats(stats: &KeyCacheStats) {
    gauge!(names::KEY_CACHE_ENTRIES).set(stats.entries as f64);
    counter!(names::KEY_CACHE_HITS_TOTAL).absolute(stats.hits);
    counter!(names::KEY_CACHE_MISSES_TOTAL).absolute(stats.misses);
    gauge!(names::KEY_CACHE_HIT_RATE).set(stats.hit_rate());
    counter!(names::KEY_FETCH_FAILURES_TOTAL).absolute(stats.fetch_failures);
}

/// Mirror the resolver's directory and cache state into the recorder.
pub fn sync_core_stats(resolver: &Resolver) {
    let directory = resolver.directory();
    record_directory_stats(&directory.stats(), &directory.current());
    record_key_cache_stats(&resolver.key_cache().stats());
}
