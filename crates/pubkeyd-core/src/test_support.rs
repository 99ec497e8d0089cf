//! Test doubles shared by the unit tests in this crate.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::{DirectoryListing, DirectoryProvider, KeyFetcher};

/// Directory provider returning whatever listing it currently holds.
pub struct StaticDirectory {
    listing: Mutex<DirectoryListing>,
}

impl StaticDirectory {
    pub fn new(listing: DirectoryListing) -> Self {
        Self {
            listing: Mutex::new(listing),
        }
    }

    pub fn replace(&self, listing: DirectoryListing) {
        *self.listing.lock().unwrap() = listing;
    }
}

#[async_trait]
impl DirectoryProvider for StaticDirectory {
    async fn fetch_directory(&self) -> Result<DirectoryListing, ProviderError> {
        Ok(self.listing.lock().unwrap().clone())
    }
}

/// Key fetcher that counts calls and can be told to fail or stall.
///
/// Each successful fetch returns `"ssh-ed25519 <alias>-<n>\n"` where `n` is the
/// per-alias call number, so tests can tell fresh fetches from cached ones.
#[derive(Default)]
pub struct MockKeyFetcher {
    calls: AtomicUsize,
    per_alias: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    delay: Option<Duration>,
}

impl MockKeyFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_for(self, alias: &str) -> Self {
        self.failing.lock().unwrap().insert(alias.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, alias: &str) -> usize {
        self.per_alias
            .lock()
            .unwrap()
            .get(alias)
            .copied()
            .unwrap_or(0)
    }

    pub fn keys_for(alias: &str, n: usize) -> String {
        format!("ssh-ed25519 {alias}-{n}\n")
    }
}

#[async_trait]
impl KeyFetcher for MockKeyFetcher {
    async fn fetch_keys(&self, alias: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = {
            let mut per_alias = self.per_alias.lock().unwrap();
            let n = per_alias.entry(alias.to_string()).or_insert(0);
            *n += 1;
            *n
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(alias) {
            return Err(ProviderError::Http(502));
        }
        Ok(Self::keys_for(alias, n))
    }
}
