// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! WebSocket handoff tokens.
//!
//! A signed-in `signals_bot` member exchanges the session for a short-lived
//! `websocket_auth` token. The feed service presents that token to
//! `/v1/websocket/verify`, which re-reads the user record: a role revoked or
//! an account suspended after issuance is refused even though the token
//! signature is still valid.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use tracing::error;

use crate::{
    audit_log,
    auth::{authorize, Action, Auth, Resource, Role, TokenError, TokenType},
    client::ClientInfo,
    error::ApiError,
    models::{
        WebsocketStatusResponse, WebsocketTokenResponse, WebsocketVerifyRequest,
        WebsocketVerifyResponse,
    },
    state::AppState,
    storage::{AuditAction, UserRepository},
};

/// Mint a WebSocket handoff token.
#[utoipa::path(
    post,
    path = "/v1/websocket/auth",
    tag = "WebSocket",
    security(("session_cookie" = [])),
    responses(
        (status = 200, description = "Token issued", body = WebsocketTokenResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Missing signals_bot role or inactive account"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn websocket_auth(
    State(state): State<AppState>,
    Auth(user): Auth,
    client: ClientInfo,
) -> Result<Json<WebsocketTokenResponse>, ApiError> {
    authorize(&state, &client, &user, Resource::WebsocketFeed, Action::Issue)?;

    let storage = state.storage.as_ref();
    let fail = |details: String| {
        audit_log!(
            storage,
            &client,
            Some(user.email.as_str()),
            AuditAction::WebsocketAuthError,
            false,
            details
        );
        ApiError::internal()
    };

    let stored = match UserRepository::new(storage).get_by_id(&user.user_id) {
        Ok(Some(stored)) => stored,
        Ok(None) => return Err(fail("user record missing".to_string())),
        Err(e) => {
            error!(error = %e, "Failed to load user for websocket token");
            return Err(fail("user lookup failed".to_string()));
        }
    };
    let (token, _) = state
        .tokens
        .issue_websocket(&stored)
        .map_err(|e| fail(format!("token signing failed: {e}")))?;

    audit_log!(
        storage,
        &client,
        Some(user.email.as_str()),
        AuditAction::WebsocketAuthSuccess
    );
    Ok(Json(WebsocketTokenResponse {
        success: true,
        ws_token: token,
        expires_in: state.tokens.websocket_ttl().as_secs(),
        user_email: user.email,
    }))
}

/// Verify a handoff token against the live user record.
#[utoipa::path(
    post,
    path = "/v1/websocket/verify",
    tag = "WebSocket",
    request_body = WebsocketVerifyRequest,
    responses(
        (status = 200, description = "Token valid", body = WebsocketVerifyResponse),
        (status = 400, description = "Missing token, wrong token type or invalid user"),
        (status = 401, description = "Expired or invalid token"),
        (status = 403, description = "Role revoked"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn websocket_verify(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<WebsocketVerifyRequest>,
) -> Result<Json<WebsocketVerifyResponse>, ApiError> {
    let storage = state.storage.as_ref();
    let reject = |email: Option<&str>, status: StatusCode, message: &str| {
        audit_log!(
            storage,
            &client,
            email,
            AuditAction::WebsocketVerifyError,
            false,
            message.to_string()
        );
        ApiError::new(status, message)
    };

    let token = request.ws_token.trim();
    if token.is_empty() {
        return Err(reject(None, StatusCode::BAD_REQUEST, "Token required"));
    }

    let claims = match state.tokens.verify(token, Some(TokenType::WebsocketAuth)) {
        Ok(claims) => claims,
        Err(e) => {
            let status = match e {
                TokenError::WrongType => StatusCode::BAD_REQUEST,
                TokenError::Expired | TokenError::Malformed => StatusCode::UNAUTHORIZED,
                TokenError::Signing => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return Err(reject(None, status, &e.to_string()));
        }
    };

    let user = match UserRepository::new(storage).get_by_id(&claims.sub)? {
        Some(user) if user.is_active() => user,
        _ => {
            return Err(reject(
                Some(claims.email.as_str()),
                StatusCode::BAD_REQUEST,
                "Invalid user",
            ))
        }
    };
    if !user.has_role(Role::SignalsBot) {
        return Err(reject(
            Some(user.email.as_str()),
            StatusCode::FORBIDDEN,
            "Insufficient role",
        ));
    }

    audit_log!(
        storage,
        &client,
        Some(user.email.as_str()),
        AuditAction::WebsocketVerifySuccess
    );
    Ok(Json(WebsocketVerifyResponse {
        valid: true,
        user_id: user.id.clone(),
        email: user.email.clone(),
        roles: user.roles_of().to_vec(),
        status: user.status,
    }))
}

/// Whether the caller may use the WebSocket feed.
#[utoipa::path(
    get,
    path = "/v1/websocket/status",
    tag = "WebSocket",
    security(("session_cookie" = [])),
    responses(
        (status = 200, description = "Handoff status", body = WebsocketStatusResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Missing signals_bot role"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn websocket_status(
    State(state): State<AppState>,
    Auth(user): Auth,
    client: ClientInfo,
) -> Result<Json<WebsocketStatusResponse>, ApiError> {
    authorize(&state, &client, &user, Resource::WebsocketFeed, Action::Read)?;
    Ok(Json(WebsocketStatusResponse {
        websocket_available: true,
        user_authorized: user.is_super_admin || user.is_active(),
        session_expires_in: (user.expires_at - Utc::now().timestamp()).max(0),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use crate::storage::{StoredUser, UserStatus};
    use crate::test_support::{test_state, TestContext};

    fn seed(ctx: &TestContext, email: &str, roles: &[Role], status: UserStatus) -> StoredUser {
        let mut user = StoredUser::new(email);
        for role in roles {
            user.grant_role(*role);
        }
        user.status = status;
        UserRepository::new(&ctx.state.storage).create(&user).unwrap();
        user
    }

    fn principal(user: &StoredUser) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: user.id.clone(),
            email: user.email.clone(),
            roles: user.roles_of(),
            status: user.status,
            is_super_admin: user.is_super_admin,
            has_pin: false,
            expires_at: Utc::now().timestamp() + 3600,
        }
    }

    fn verify_body(token: &str) -> Json<WebsocketVerifyRequest> {
        Json(WebsocketVerifyRequest {
            ws_token: token.to_string(),
        })
    }

    #[tokio::test]
    async fn handoff_round_trip() {
        let ctx = test_state();
        let user = seed(&ctx, "bot@example.com", &[Role::SignalsBot], UserStatus::Active);

        let Json(issued) = websocket_auth(
            State(ctx.state.clone()),
            Auth(principal(&user)),
            ClientInfo::internal(),
        )
        .await
        .unwrap();
        assert_eq!(issued.expires_in, 3600);

        let Json(verified) = websocket_verify(
            State(ctx.state.clone()),
            ClientInfo::internal(),
            verify_body(&issued.ws_token),
        )
        .await
        .unwrap();
        assert!(verified.valid);
        assert_eq!(verified.email, "bot@example.com");
    }

    #[tokio::test]
    async fn inactive_member_cannot_get_token() {
        let ctx = test_state();
        let user = seed(&ctx, "idle@example.com", &[Role::SignalsBot], UserStatus::Pending);
        let err = websocket_auth(
            State(ctx.state.clone()),
            Auth(principal(&user)),
            ClientInfo::internal(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn session_token_is_wrong_type() {
        let ctx = test_state();
        let user = seed(&ctx, "s@example.com", &[Role::SignalsBot], UserStatus::Active);
        let (session, _) = ctx.state.tokens.issue_session(&user).unwrap();
        let err = websocket_verify(
            State(ctx.state.clone()),
            ClientInfo::internal(),
            verify_body(&session),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid token type");
    }

    #[tokio::test]
    async fn garbage_token_is_unauthorized() {
        let ctx = test_state();
        let err = websocket_verify(
            State(ctx.state.clone()),
            ClientInfo::internal(),
            verify_body("not.a.token"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn revocation_after_issuance_is_enforced() {
        let ctx = test_state();
        let user = seed(&ctx, "revoked@example.com", &[Role::SignalsBot], UserStatus::Active);
        let (token, _) = ctx.state.tokens.issue_websocket(&user).unwrap();

        UserRepository::new(&ctx.state.storage)
            .modify("revoked@example.com", |u| {
                u.status = UserStatus::Suspended;
                Ok(true)
            })
            .unwrap();

        let err = websocket_verify(
            State(ctx.state.clone()),
            ClientInfo::internal(),
            verify_body(&token),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid user");
    }

    #[tokio::test]
    async fn status_requires_signals_role() {
        let ctx = test_state();
        let member = seed(&ctx, "c@example.com", &[Role::CommunityBots], UserStatus::Active);
        let err = websocket_status(
            State(ctx.state.clone()),
            Auth(principal(&member)),
            ClientInfo::internal(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let bot = seed(&ctx, "b@example.com", &[Role::SignalsBot], UserStatus::Pending);
        let Json(status) = websocket_status(
            State(ctx.state.clone()),
            Auth(principal(&bot)),
            ClientInfo::internal(),
        )
        .await
        .unwrap();
        assert!(status.websocket_available);
        assert!(!status.user_authorized);
    }
}
