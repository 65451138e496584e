// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints.

use axum::Json;

use crate::auth::{Auth, AuthenticatedUser};
use crate::models::{MeResponse, UserSummary};

impl From<AuthenticatedUser> for MeResponse {
    fn from(user: AuthenticatedUser) -> Self {
        Self {
            user: UserSummary::from(&user),
            expires_at: user.expires_at,
        }
    }
}

/// Get the current authenticated user's information.
///
/// Roles and status are read from the live user record, not from the token
/// snapshot.
#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    security(("session_cookie" = [])),
    responses(
        (status = 200, description = "User information", body = MeResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn get_current_user(Auth(user): Auth) -> Json<MeResponse> {
    Json(user.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Role, RoleSet};
    use crate::storage::UserStatus;

    #[test]
    fn me_response_from_authenticated_user() {
        let user = AuthenticatedUser {
            user_id: "user_123".to_string(),
            email: "a@example.com".to_string(),
            roles: RoleSet::new(),
            status: UserStatus::Pending,
            is_super_admin: false,
            has_pin: true,
            expires_at: 42,
        };

        let response: MeResponse = user.into();
        assert_eq!(response.user.user_id, "user_123");
        assert_eq!(response.user.roles, vec![Role::Pending]);
        assert!(response.user.has_pin);
        assert_eq!(response.expires_at, 42);
    }

    #[test]
    fn me_response_flattens_summary() {
        let user = AuthenticatedUser {
            user_id: "u".to_string(),
            email: "b@example.com".to_string(),
            roles: [Role::SignalsBot].into_iter().collect(),
            status: UserStatus::Active,
            is_super_admin: false,
            has_pin: false,
            expires_at: 7,
        };
        let json = serde_json::to_value(MeResponse::from(user)).unwrap();
        assert_eq!(json["email"], "b@example.com");
        assert_eq!(json["roles"][0], "signals_bot");
        assert_eq!(json["status"], "active");
    }
}
