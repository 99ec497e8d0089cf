//! Capabilities the core consumes from the outside world.
//!
//! - [`DirectoryProvider`] - returns the full identity directory in one call
//! - [`KeyFetcher`] - returns the raw `authorized_keys` text for one alias
//!
//! Implementations own their transport, credentials and pagination. The core
//! bounds every call with its own timeout, so implementations may block for
//! as long as their transport allows.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ProviderError;

/// One complete answer from the directory provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    /// Internal identity -> external alias. An empty alias marks the
    /// identity as known but not eligible for key lookups.
    pub aliases: HashMap<String, String>,
    /// Role name -> member identities in provider iteration order.
    pub roles: HashMap<String, Vec<String>>,
}

impl DirectoryListing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an identity with its alias (possibly empty).
    pub fn with_identity(mut self, id: impl Into<String>, alias: impl Into<String>) -> Self {
        self.aliases.insert(id.into(), alias.into());
        self
    }

    /// Append a member to a role, creating the role if needed.
    pub fn with_member(mut self, role: impl Into<String>, id: impl Into<String>) -> Self {
        self.roles.entry(role.into()).or_default().push(id.into());
        self
    }
}

/// Source of the identity directory.
#[async_trait]
pub trait DirectoryProvider: Send + Sync {
    /// Fetch the whole directory. No incremental protocol is assumed.
    async fn fetch_directory(&self) -> Result<DirectoryListing, ProviderError>;
}

/// Source of public key material.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Fetch the `authorized_keys` formatted text for an external alias.
    async fn fetch_keys(&self, alias: &str) -> Result<String, ProviderError>;
}
