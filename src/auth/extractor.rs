// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated users.
//!
//! Use the `Auth` extractor in handlers to require a general session:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```
//!
//! `AdminOnly` additionally applies the administration policy. Content and
//! WebSocket handlers call [`authorize`] with their own resource.
//!
//! Every refusal is audited exactly once before the rejection is returned.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use tracing::error;

use super::claims::AuthenticatedUser;
use super::cookie::token_from_headers;
use super::error::AuthError;
use super::policy::{self, Action, Denial, Resource};
use crate::audit_log;
use crate::client::ClientInfo;
use crate::state::AppState;
use crate::storage::{AuditAction, UserRepository};

/// Extractor for an authenticated general session.
///
/// Reads the `token` cookie (or a bearer header), verifies it as an untyped
/// session token and reloads the user so handlers see live roles and status.
///
/// # Example
///
/// ```rust,ignore
/// async fn me(Auth(user): Auth) -> Json<MeResponse> {
///     // user.email, user.roles, user.status
/// }
/// ```
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Already resolved earlier in this request
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let client = ClientInfo::from_request(
            &parts.headers,
            &parts.extensions,
            &state.config.trusted_proxies,
        );
        let user = authenticate(state, &parts.headers, &client, parts.uri.path())?;
        parts.extensions.insert(user.clone());
        Ok(Auth(user))
    }
}

/// Verify the session token in `headers` and load its user.
pub fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    client: &ClientInfo,
    path: &str,
) -> Result<AuthenticatedUser, AuthError> {
    let storage = state.storage.as_ref();

    let Some(token) = token_from_headers(headers) else {
        audit_log!(
            storage,
            client,
            None,
            AuditAction::AccessDeniedNoToken,
            false,
            format!("path={path}")
        );
        return Err(AuthError::MissingToken);
    };

    let claims = match state.tokens.verify(&token, None) {
        Ok(claims) => claims,
        Err(e) => {
            audit_log!(
                storage,
                client,
                None,
                AuditAction::AccessDeniedInvalidToken,
                false,
                format!("path={path} reason={e}")
            );
            return Err(e.into());
        }
    };

    let user = match UserRepository::new(storage).get_by_id(&claims.sub) {
        Ok(Some(user)) => user,
        Ok(None) => {
            audit_log!(
                storage,
                client,
                Some(claims.email.as_str()),
                AuditAction::AccessDeniedUserNotFound,
                false,
                format!("path={path}")
            );
            return Err(AuthError::UserNotFound);
        }
        Err(e) => {
            error!(error = %e, "Failed to load user for session");
            return Err(AuthError::InternalError("user lookup failed".to_string()));
        }
    };

    audit_log!(
        storage,
        client,
        Some(user.email.as_str()),
        AuditAction::SuccessfulAccess,
        true,
        format!("path={path}")
    );

    Ok(AuthenticatedUser::from_user(&user, &claims))
}

/// Apply the policy for (resource, action), auditing a refusal.
pub fn authorize(
    state: &AppState,
    client: &ClientInfo,
    user: &AuthenticatedUser,
    resource: Resource,
    action: Action,
) -> Result<(), AuthError> {
    policy::evaluate(user, resource, action).map_err(|denial| {
        audit_log!(
            state.storage.as_ref(),
            client,
            Some(user.email.as_str()),
            denial_action(resource, denial),
            false,
            format!("resource={resource:?} action={action:?} denial={denial:?}")
        );
        AuthError::from(denial)
    })
}

fn denial_action(resource: Resource, denial: Denial) -> AuditAction {
    match (resource, denial) {
        (Resource::Administration, _) => AuditAction::AccessDeniedNotAdmin,
        (Resource::WebsocketFeed, Denial::Inactive) => AuditAction::WebsocketAuthStatusDenied,
        (Resource::WebsocketFeed, _) => AuditAction::WebsocketAuthRoleDenied,
        (_, Denial::Inactive) => AuditAction::AccessDeniedStatus,
        _ => AuditAction::AccessDeniedRole,
    }
}

impl From<Denial> for AuthError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Inactive => AuthError::InactiveAccount,
            Denial::MissingRole(_) | Denial::Unmapped => AuthError::InsufficientPermissions,
        }
    }
}

/// Extractor that requires the administration policy.
///
/// Returns 403 Forbidden for authenticated users without the admin role.
pub struct AdminOnly(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;
        let client = ClientInfo::from_request(
            &parts.headers,
            &parts.extensions,
            &state.config.trusted_proxies,
        );
        authorize(state, &client, &user, Resource::Administration, Action::Read)?;
        Ok(AdminOnly(user))
    }
}
