// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access checks for downstream content areas.
//!
//! Content itself is served elsewhere; this endpoint answers whether the
//! caller may enter an area right now.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    audit_log,
    auth::{authorize, policy, Action, Auth, Resource},
    client::ClientInfo,
    error::ApiError,
    models::AccessCheckResponse,
    state::AppState,
    storage::AuditAction,
};

fn area_resource(area: &str) -> Option<Resource> {
    match area {
        "signals" => Some(Resource::Signals),
        "community" => Some(Resource::Community),
        _ => None,
    }
}

/// Check role and status for a content area.
#[utoipa::path(
    get,
    path = "/v1/access/{area}",
    tag = "Access",
    security(("session_cookie" = [])),
    params(("area" = String, Path, description = "Content area: `signals` or `community`")),
    responses(
        (status = 200, description = "Access granted", body = AccessCheckResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Missing role or inactive account"),
        (status = 404, description = "Unknown area"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn check_access(
    State(state): State<AppState>,
    Auth(user): Auth,
    client: ClientInfo,
    Path(area): Path<String>,
) -> Result<Json<AccessCheckResponse>, ApiError> {
    let resource = area_resource(&area).ok_or_else(|| ApiError::not_found("Unknown area"))?;
    let required = policy::requirement(resource, Action::Read)
        .ok_or_else(|| ApiError::not_found("Unknown area"))?;

    authorize(&state, &client, &user, resource, Action::Read)?;

    audit_log!(
        state.storage.as_ref(),
        &client,
        Some(user.email.as_str()),
        AuditAction::AccessGranted,
        true,
        format!("area={area}")
    );
    Ok(Json(AccessCheckResponse {
        area,
        granted: true,
        required_role: required.role,
    }))
}
