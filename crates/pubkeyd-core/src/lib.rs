//! Core of the pubkeyd service.
//!
//! - [`snapshot`]: immutable identity/role directory view
//! - [`refresh`]: publishes snapshots on a schedule and on demand
//! - [`key_cache`]: TTL cache of per-alias keys with single-flight misses
//! - [`resolver`]: maps identities and roles to `authorized_keys` text
//!
//! Upstream systems are reached through the [`DirectoryProvider`] and
//! [`KeyFetcher`] traits; concrete clients live in the server crate.

pub mod error;
pub mod key_cache;
pub mod provider;
pub mod refresh;
pub mod resolver;
pub mod snapshot;

#[cfg(test)]
mod test_support;

pub use error::{LookupKind, ProviderError, PubkeyError, PubkeyResult};
pub use key_cache::{KeyCache, KeyCacheConfig, KeyCacheStats};
pub use provider::{DirectoryListing, DirectoryProvider, KeyFetcher};
pub use refresh::{RefreshConfig, RefreshCoordinator, RefreshStats};
pub use resolver::{MAX_NAME_LEN, Resolver, validate_identity, validate_role};
pub use snapshot::{AliasLookup, DirectorySnapshot};
