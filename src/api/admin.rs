// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints.
//!
//! These endpoints require the Admin role (or super-admin) and provide:
//! - Security audit log queries
//! - Purchase decisions that grant or withdraw product access

use axum::{
    extract::{Query, State},
    Json,
};
use tracing::warn;

use crate::{
    audit_log,
    auth::{AdminOnly, Role},
    client::ClientInfo,
    email::{deliver, templates},
    error::ApiError,
    models::{
        AccessDecisionRequest, AccessDecisionResponse, AuditLogQuery, AuditLogResponse, Decision,
    },
    state::AppState,
    storage::{AuditAction, AuditRepository, StoredUser, UserRepository, UserStatus},
    validation::{is_plausible_email, normalize_email},
};

const DEFAULT_PER_PAGE: usize = 50;

/// Query the security audit log.
///
/// Returns entries for one subject email (the caller when omitted), newest
/// first. `per_page` is capped at 100.
#[utoipa::path(
    get,
    path = "/v1/security/audit-log",
    tag = "Admin",
    security(("session_cookie" = [])),
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Audit entries", body = AuditLogResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn get_audit_log(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
    client: ClientInfo,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let subject = query
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|email| !email.is_empty())
        .unwrap_or_else(|| admin.email.clone());

    let page = AuditRepository::new(&state.storage).query(
        Some(&subject),
        query.page.unwrap_or(1),
        query.per_page.unwrap_or(DEFAULT_PER_PAGE),
    )?;

    audit_log!(
        state.storage.as_ref(),
        &client,
        Some(admin.email.as_str()),
        AuditAction::AuditLogViewed,
        true,
        format!("subject={subject} page={}", page.page)
    );

    Ok(Json(AuditLogResponse {
        email: subject,
        events: page.events,
        total: page.total,
        page: page.page,
        per_page: page.per_page,
        pages: page.pages,
    }))
}

/// Apply `decision` to `user`. Returns whether the record changed.
fn apply_decision(user: &mut StoredUser, decision: Decision, role: Role) -> bool {
    if user.is_super_admin {
        return false;
    }
    match decision {
        Decision::Approved => {
            user.grant_role(role);
            user.status = UserStatus::Active;
        }
        Decision::Rejected => user.status = UserStatus::Pending,
    }
    true
}

/// Record an admin decision on a purchase.
///
/// Approval grants the product role and activates the account; rejection
/// returns the account to pending. Super-admin accounts are never changed.
/// The user is notified by email in the background; a failed notification is
/// audited and does not affect the response.
#[utoipa::path(
    post,
    path = "/v1/admin/access-decisions",
    tag = "Admin",
    security(("session_cookie" = [])),
    request_body = AccessDecisionRequest,
    responses(
        (status = 200, description = "Decision applied", body = AccessDecisionResponse),
        (status = 400, description = "Invalid email or role"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "User not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn access_decision(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
    client: ClientInfo,
    Json(request): Json<AccessDecisionRequest>,
) -> Result<Json<AccessDecisionResponse>, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);
    let (role, decision) = (request.role, request.decision);

    let fail = |details: &str| {
        audit_log!(
            storage,
            &client,
            Some(admin.email.as_str()),
            AuditAction::AccessDecisionFailed,
            false,
            format!("target={email} {details}")
        );
    };

    if !is_plausible_email(&email) {
        fail("invalid email");
        return Err(ApiError::bad_request("Invalid email address"));
    }
    if role == Role::Pending {
        fail("invalid role");
        return Err(ApiError::bad_request("Invalid role"));
    }
    if email == admin.email {
        fail("self change");
        return Err(ApiError::bad_request("You cannot change your own access"));
    }

    let mut changed = false;
    let updated = UserRepository::new(storage).modify(&email, |user| {
        changed = apply_decision(user, decision, role);
        Ok(changed)
    });
    let user = match updated {
        Ok(Some(user)) => user,
        Ok(None) => {
            fail("user not found");
            return Err(ApiError::not_found("User not found"));
        }
        Err(e) => {
            fail("storage error");
            return Err(e.into());
        }
    };

    let action = match decision {
        Decision::Approved => AuditAction::AccessDecisionApproved,
        Decision::Rejected => AuditAction::AccessDecisionRejected,
    };
    audit_log!(
        storage,
        &client,
        Some(admin.email.as_str()),
        action,
        true,
        format!("target={email} role={role} changed={changed}")
    );

    if changed {
        notify_decision(state.clone(), client.clone(), email.clone(), decision, role);
    }

    Ok(Json(AccessDecisionResponse {
        success: true,
        email,
        decision,
        roles: user.roles_of().to_vec(),
        status: user.status,
    }))
}

/// Mail the decision without holding up the response.
fn notify_decision(
    state: AppState,
    client: ClientInfo,
    email: String,
    decision: Decision,
    role: Role,
) {
    tokio::spawn(async move {
        let message = templates::decision_email(
            &state.config.app_name,
            &email,
            decision == Decision::Approved,
            role,
        );
        if let Err(e) = deliver(state.mailer.as_ref(), message, state.config.mail_timeout).await {
            warn!(error = %e, "Access decision notification failed");
            audit_log!(
                state.storage.as_ref(),
                &client,
                Some(email.as_str()),
                AuditAction::AccessDecisionEmailError,
                false,
                format!("decision={decision:?} error={e}")
            );
        }
    });
}
