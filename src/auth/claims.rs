// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token claims and the authenticated principal.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::roles::{Role, RoleSet};
use crate::storage::{StoredUser, UserStatus};

/// Narrow-purpose token tag carried in the `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Handoff token for the WebSocket feed.
    WebsocketAuth,
}

/// Claims of every issued token.
///
/// General session tokens carry no `type`. The role/status snapshot is
/// informational only; guards re-read the user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<Role>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_super_admin: Option<bool>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
}

/// Authenticated user, built from a verified token and the live user record.
///
/// This is the principal handed to handlers by the [`Auth`](super::Auth)
/// extractor.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
    /// Effective roles (all grantable roles for a super-admin).
    pub roles: RoleSet,
    pub status: UserStatus,
    pub is_super_admin: bool,
    pub has_pin: bool,
    /// Token expiration (Unix timestamp).
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub fn from_user(user: &StoredUser, claims: &SessionClaims) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            roles: user.roles_of(),
            status: user.status,
            is_super_admin: user.is_super_admin,
            has_pin: user.has_pin(),
            expires_at: claims.exp,
        }
    }

    pub fn has_role(&self, required: Role) -> bool {
        self.is_super_admin || self.roles.contains(required)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}
