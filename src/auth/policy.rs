// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access policy table.
//!
//! Every guarded (resource, action) pair maps to one requirement. Handlers do
//! not check roles themselves; they ask [`evaluate`]. Pairs missing from the
//! table are denied.

use super::claims::AuthenticatedUser;
use super::roles::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Audit log, access decisions and other admin endpoints.
    Administration,
    /// Signals content area.
    Signals,
    /// Community content area.
    Community,
    /// WebSocket feed handoff.
    WebsocketFeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    /// Mint a narrow-purpose token.
    Issue,
}

/// Role (and optionally active status) needed for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub role: Role,
    pub require_active: bool,
}

/// Why a principal was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    MissingRole(Role),
    Inactive,
    Unmapped,
}

const fn req(role: Role, require_active: bool) -> Requirement {
    Requirement {
        role,
        require_active,
    }
}

const POLICY: &[(Resource, Action, Requirement)] = &[
    (Resource::Administration, Action::Read, req(Role::Admin, false)),
    (Resource::Administration, Action::Write, req(Role::Admin, false)),
    (Resource::Signals, Action::Read, req(Role::SignalsBot, true)),
    (Resource::Community, Action::Read, req(Role::CommunityBots, true)),
    (Resource::WebsocketFeed, Action::Issue, req(Role::SignalsBot, true)),
    (Resource::WebsocketFeed, Action::Read, req(Role::SignalsBot, false)),
];

pub fn requirement(resource: Resource, action: Action) -> Option<Requirement> {
    POLICY
        .iter()
        .find(|(r, a, _)| *r == resource && *a == action)
        .map(|(_, _, requirement)| *requirement)
}

/// Decide whether `user` may perform `action` on `resource`.
///
/// Super-admins pass every mapped pair. Role is checked before status.
pub fn evaluate(user: &AuthenticatedUser, resource: Resource, action: Action) -> Result<(), Denial> {
    let requirement = requirement(resource, action).ok_or(Denial::Unmapped)?;
    if user.is_super_admin {
        return Ok(());
    }
    if !user.has_role(requirement.role) {
        return Err(Denial::MissingRole(requirement.role));
    }
    if requirement.require_active && !user.is_active() {
        return Err(Denial::Inactive);
    }
    Ok(())
}
