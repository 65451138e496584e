// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User roles for authorization.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Fixed role vocabulary.
///
/// ## Roles
///
/// - `pending` - Registered, no product access granted yet
/// - `signals_bot` - Signals product and its WebSocket feed
/// - `community_bots` - Community product
/// - `Admin` - Administrative endpoints (audit log, access decisions)
///
/// The admin tag is capitalized on the wire; downstream consumers match it
/// exactly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub enum Role {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "signals_bot")]
    SignalsBot,
    #[serde(rename = "community_bots")]
    CommunityBots,
    #[serde(rename = "Admin")]
    Admin,
}

impl Role {
    /// Roles a super-admin implicitly holds.
    pub const GRANTABLE: [Role; 3] = [Role::Admin, Role::SignalsBot, Role::CommunityBots];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Pending => "pending",
            Role::SignalsBot => "signals_bot",
            Role::CommunityBots => "community_bots",
            Role::Admin => "Admin",
        }
    }

    /// Parse a role tag. The admin tag is accepted in any case.
    pub fn from_str(s: &str) -> Option<Role> {
        match s.trim() {
            "pending" => Some(Role::Pending),
            "signals_bot" => Some(Role::SignalsBot),
            "community_bots" => Some(Role::CommunityBots),
            other if other.eq_ignore_ascii_case("admin") => Some(Role::Admin),
            _ => None,
        }
    }

    /// Human-readable label used in emails and profile responses.
    pub fn label(&self) -> &'static str {
        match self {
            Role::Pending => "Pending Approval",
            Role::SignalsBot => "Signals Bot",
            Role::CommunityBots => "Community Bots",
            Role::Admin => "Administrator",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Pending
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// RoleSet
// =============================================================================

/// Set of granted roles.
///
/// `pending` is never stored: an empty set means the user is pending.
/// Persisted as a comma-delimited string; unknown tags are dropped on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every grantable role.
    pub fn all() -> Self {
        Role::GRANTABLE.into_iter().collect()
    }

    /// Add a role. Returns `true` if the set changed.
    pub fn insert(&mut self, role: Role) -> bool {
        if role == Role::Pending {
            return false;
        }
        self.0.insert(role)
    }

    pub fn contains(&self, role: Role) -> bool {
        match role {
            Role::Pending => self.0.is_empty(),
            other => self.0.contains(&other),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.0.is_empty()
    }

    /// Granted roles in vocabulary order, or `[pending]` when none.
    pub fn to_vec(&self) -> Vec<Role> {
        if self.is_pending() {
            vec![Role::Pending]
        } else {
            self.0.iter().copied().collect()
        }
    }

    /// Comma-separated labels, e.g. `"Signals Bot, Community Bots"`.
    pub fn display_labels(&self) -> String {
        self.to_vec()
            .iter()
            .map(Role::label)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Storage representation.
    pub fn to_storage(&self) -> String {
        self.0
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn from_storage(raw: &str) -> Self {
        raw.split(',').filter_map(Role::from_str).collect()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        let mut set = RoleSet::new();
        for role in iter {
            set.insert(role);
        }
        set
    }
}

impl From<String> for RoleSet {
    fn from(raw: String) -> Self {
        RoleSet::from_storage(&raw)
    }
}

impl From<RoleSet> for String {
    fn from(set: RoleSet) -> Self {
        set.to_storage()
    }
}
