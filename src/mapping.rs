//! Resolution of raw payer identities ("Entry By", "Paid By") to group
//! members. One mapping is shared by every file in an import session.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{Member, TransactionDraft, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingTarget {
    User(UserId),
    Ignore,
}

impl fmt::Display for MappingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "{id}"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

impl FromStr for MappingTarget {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("ignore") {
            return Ok(Self::Ignore);
        }
        s.parse().map(Self::User)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IdentityMapping {
    entries: BTreeMap<String, MappingTarget>,
}

impl IdentityMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<MappingTarget> {
        self.entries.get(identity).copied()
    }

    pub fn set(&mut self, identity: impl Into<String>, target: MappingTarget) {
        self.entries.insert(identity.into(), target);
    }

    /// Add a suggested target for each identity that has no entry yet.
    /// Existing choices are never overwritten. Returns how many were added.
    pub fn merge_suggestions(&mut self, identities: &BTreeSet<String>, members: &[Member]) -> usize {
        let mut added = 0;
        for identity in identities {
            if !self.entries.contains_key(identity) {
                self.entries.insert(identity.clone(), suggest(identity, members));
                added += 1;
            }
        }
        added
    }

    /// Identity → user id for every identity bound to a user.
    pub fn resolved_users(&self) -> BTreeMap<String, UserId> {
        self.entries
            .iter()
            .filter_map(|(k, v)| match v {
                MappingTarget::User(id) => Some((k.clone(), *id)),
                MappingTarget::Ignore => None,
            })
            .collect()
    }
}

/// Distinct payer identities, case-sensitive, in sorted order.
pub fn collect_identities<'a, I>(drafts: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a TransactionDraft>,
{
    drafts
        .into_iter()
        .filter_map(|d| d.payer.clone())
        .collect()
}

/// Best-effort match on display name or email, ignoring case.
pub fn suggest(identity: &str, members: &[Member]) -> MappingTarget {
    let wanted = identity.trim().to_lowercase();
    members
        .iter()
        .find(|m| {
            m.full_name.trim().to_lowercase() == wanted
                || m
                    .email
                    .as_deref()
                    .is_some_and(|e| e.trim().to_lowercase() == wanted)
        })
        .map_or(MappingTarget::Ignore, |m| MappingTarget::User(m.user_id))
}

/// Identities that still block an import. Without `allow_ignored`, an
/// identity mapped to `Ignore` blocks just like an unmapped one.
pub fn unmapped(identities: &BTreeSet<String>, mapping: &IdentityMapping, allow_ignored: bool) -> Vec<String> {
    identities
        .iter()
        .filter(|id| match mapping.get(id) {
            Some(MappingTarget::User(_)) => false,
            Some(MappingTarget::Ignore) => !allow_ignored,
            None => true,
        })
        .cloned()
        .collect()
}

/// True when every identity is bound to a user. An empty set is complete.
pub fn is_complete(identities: &BTreeSet<String>, mapping: &IdentityMapping) -> bool {
    unmapped(identities, mapping, false).is_empty()
}
