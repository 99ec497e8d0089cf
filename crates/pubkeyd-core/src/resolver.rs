//! Identity and role resolution.
//!
//! Each request takes the current snapshot once, maps the requested name to
//! zero or more aliases and asks the [`KeyCache`] for their keys. Role
//! lookups are partial-success: members whose keys cannot be fetched are
//! skipped, and the request only fails when every attempted alias failed.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};

use crate::error::{PubkeyError, PubkeyResult};
use crate::key_cache::KeyCache;
use crate::refresh::RefreshCoordinator;
use crate::snapshot::AliasLookup;

/// Longest identity or role name accepted.
pub const MAX_NAME_LEN: usize = 256;

/// Check an identity name: non-empty, bounded, no whitespace or control
/// characters.
pub fn validate_identity(id: &str) -> PubkeyResult<()> {
    validate_name("identity", id, |c| c.is_whitespace() || c.is_control())
}

/// Check a role name: non-empty, bounded, no control characters. Spaces are
/// allowed since directory role names commonly contain them.
pub fn validate_role(role: &str) -> PubkeyResult<()> {
    validate_name("role", role, char::is_control)
}

fn validate_name(kind: &str, name: &str, forbidden: impl Fn(char) -> bool) -> PubkeyResult<()> {
    if name.is_empty() {
        return Err(PubkeyError::invalid_input(format!("{kind} name must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(PubkeyError::invalid_input(format!(
            "{kind} name exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if name.chars().any(forbidden) {
        return Err(PubkeyError::invalid_input(format!(
            "{kind} name contains forbidden characters"
        )));
    }
    Ok(())
}

/// Resolves identities and roles to `authorized_keys` text.
#[derive(Clone)]
pub struct Resolver {
    directory: Arc<RefreshCoordinator>,
    keys: KeyCache,
}

impl Resolver {
    pub fn new(directory: Arc<RefreshCoordinator>, keys: KeyCache) -> Self {
        Self { directory, keys }
    }

    pub fn directory(&self) -> &Arc<RefreshCoordinator> {
        &self.directory
    }

    pub fn key_cache(&self) -> &KeyCache {
        &self.keys
    }

    /// The external alias of an identity.
    ///
    /// Unknown identities and identities with an empty alias both report
    /// `NotFound`.
    pub fn alias_of(&self, id: &str) -> PubkeyResult<String> {
        validate_identity(id)?;
        let snapshot = self.directory.current();
        match snapshot.alias_of(id) {
            AliasLookup::Eligible(alias) => Ok(alias.to_string()),
            AliasLookup::Ineligible => {
                tracing::info!(identity = id, "Identity has no alias");
                Err(PubkeyError::identity_not_found(id))
            }
            AliasLookup::Unknown => {
                tracing::info!(identity = id, "Identity not found");
                Err(PubkeyError::identity_not_found(id))
            }
        }
    }

    /// Keys for a single identity.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the identity is unknown or has no alias; the key cache
    ///   is not consulted.
    /// - `UpstreamUnavailable` if the key fetch failed or timed out.
    pub async fn resolve_identity(&self, id: &str) -> PubkeyResult<String> {
        let alias = self.alias_of(id)?;
        tracing::debug!(identity = id, alias = %alias, "Resolving identity");

        self.keys.get(&alias).await.map_err(|e| {
            tracing::warn!(
                identity = id,
                alias = %alias,
                error = %e,
                "Identity found but authorized_keys unretrievable"
            );
            PubkeyError::from(e)
        })
    }

    /// Keys for every eligible member of a role, concatenated in member order.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the role is unknown.
    /// - `UpstreamUnavailable` if aliases were attempted and none could be
    ///   fetched. A role without eligible members resolves to empty text.
    pub async fn resolve_role(&self, role: &str) -> PubkeyResult<String> {
        validate_role(role)?;

        let members: Vec<(String, String)> = {
            let snapshot = self.directory.current();
            let Some(aliases) = snapshot.role_aliases(role) else {
                tracing::info!(role, "Role not found");
                return Err(PubkeyError::role_not_found(role));
            };
            aliases
                .into_iter()
                .map(|(id, alias)| (id.to_string(), alias.to_string()))
                .collect()
        };

        if members.is_empty() {
            tracing::info!(role, "Role has no members with an alias");
            return Ok(String::new());
        }

        // buffered keeps member order; duplicate aliases share one fetch.
        let limit = self.keys.config().max_concurrent_fetches.max(1);
        let fetches: Vec<_> = members.iter().map(|(_, alias)| self.keys.get(alias)).collect();
        let results: Vec<_> = stream::iter(fetches)
            .buffered(limit)
            .collect()
            .await;

        let mut keys = String::new();
        let mut succeeded = 0usize;
        let mut last_error = None;
        for ((id, alias), result) in members.iter().zip(results) {
            match result {
                Ok(text) => {
                    keys.push_str(&text);
                    succeeded += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        role,
                        identity = %id,
                        alias = %alias,
                        error = %e,
                        "Skipping role member with unretrievable authorized_keys"
                    );
                    last_error = Some(e);
                }
            }
        }

        match (succeeded, last_error) {
            (0, Some(e)) => {
                tracing::error!(role, "Role found but no member authorized_keys retrievable");
                Err(e.into())
            }
            _ => {
                tracing::debug!(role, members = members.len(), succeeded, "Resolved role");
                Ok(keys)
            }
        }
    }

    /// Drop the cached keys of an identity's alias.
    ///
    /// Returns whether a cached entry was removed; unknown identities are
    /// acknowledged without effect.
    pub fn invalidate_identity(&self, id: &str) -> PubkeyResult<bool> {
        validate_identity(id)?;
        let snapshot = self.directory.current();
        match snapshot.alias_of(id).eligible() {
            Some(alias) => Ok(self.keys.invalidate(alias)),
            None => {
                tracing::debug!(identity = id, "No alias to invalidate");
                Ok(false)
            }
        }
    }

    /// Ask the coordinator for an asynchronous directory refresh.
    pub fn trigger_refresh(&self) {
        self.directory.trigger();
    }
}
