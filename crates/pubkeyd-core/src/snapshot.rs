//! Immutable point-in-time view of the identity directory.

use std::collections::HashMap;

use crate::provider::DirectoryListing;

/// Result of looking an identity up in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasLookup<'a> {
    /// Known identity with a usable alias.
    Eligible(&'a str),
    /// Known identity whose alias is empty.
    Ineligible,
    /// Identity not present in the directory.
    Unknown,
}

impl<'a> AliasLookup<'a> {
    /// The alias, if the identity may be resolved to keys.
    pub fn eligible(self) -> Option<&'a str> {
        match self {
            Self::Eligible(alias) => Some(alias),
            Self::Ineligible | Self::Unknown => None,
        }
    }
}

/// Directory state built wholesale from one provider response.
///
/// Published snapshots are never mutated; a refresh replaces the whole value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    alias_of: HashMap<String, String>,
    members_of: HashMap<String, Vec<String>>,
}

impl DirectorySnapshot {
    pub fn new(
        alias_of: HashMap<String, String>,
        members_of: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            alias_of,
            members_of,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn alias_of(&self, id: &str) -> AliasLookup<'_> {
        match self.alias_of.get(id) {
            Some(alias) if alias.is_empty() => AliasLookup::Ineligible,
            Some(alias) => AliasLookup::Eligible(alias),
            None => AliasLookup::Unknown,
        }
    }

    /// Members of a role in directory order, duplicates included.
    pub fn members_of(&self, role: &str) -> Option<&[String]> {
        self.members_of.get(role).map(Vec::as_slice)
    }

    /// Aliases for a role's members, in member order, skipping members
    /// without a usable alias.
    pub fn role_aliases(&self, role: &str) -> Option<Vec<(&str, &str)>> {
        let members = self.members_of(role)?;
        Some(
            members
                .iter()
                .filter_map(|id| {
                    self.alias_of(id)
                        .eligible()
                        .map(|alias| (id.as_str(), alias))
                })
                .collect(),
        )
    }

    /// Number of identities known, eligible or not.
    pub fn identity_count(&self) -> usize {
        self.alias_of.len()
    }

    pub fn eligible_count(&self) -> usize {
        self.alias_of.values().filter(|a| !a.is_empty()).count()
    }

    pub fn role_count(&self) -> usize {
        self.members_of.len()
    }
}

impl From<DirectoryListing> for DirectorySnapshot {
    fn from(listing: DirectoryListing) -> Self {
        Self::new(listing.aliases, listing.roles)
    }
}
