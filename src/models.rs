// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. All types derive `ToSchema`
//! for the OpenAPI document.
//!
//! Request fields default to empty so that a missing field reaches the
//! handler's own validation and gets the same message as a blank one.
//!
//! ## Model Categories
//!
//! - **Codes**: issuing and verifying one-time codes
//! - **PIN**: creating, using and resetting the 4-digit PIN
//! - **Sessions**: principal snapshot and content access checks
//! - **WebSocket**: narrow-purpose handoff tokens
//! - **Administration**: audit queries and purchase decisions

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{AuthenticatedUser, Role};
use crate::storage::{AuditEvent, UserStatus};

// =============================================================================
// Codes
// =============================================================================

/// Body carrying only an email address.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: String,
}

/// Email plus the 6-digit code received by mail.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct VerifyCodeRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
}

/// Generic success acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Issued after a successful authentication. The session token itself is
/// only delivered in the `token` cookie.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub success: bool,
    pub message: String,
    /// Token expiry (Unix timestamp).
    pub expires_at: i64,
    pub user: UserSummary,
}

/// Registration state of an email address.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct CheckUserResponse {
    pub user_exists: bool,
    pub has_pin: bool,
}

// =============================================================================
// PIN
// =============================================================================

/// Phase 2 of PIN creation: the code already accepted by `/auth/pin/verify`
/// is presented again with the new PIN.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CreatePinRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub pin: String,
    #[serde(default)]
    pub verification_code: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PinLoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub pin: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ResetPinRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub new_pin: String,
}

// =============================================================================
// Sessions
// =============================================================================

/// Principal snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub user_id: String,
    pub email: String,
    /// Effective roles; `["pending"]` when nothing is granted.
    pub roles: Vec<Role>,
    /// Human-readable role names.
    pub roles_display: String,
    pub status: UserStatus,
    pub is_super_admin: bool,
    /// Holds the admin role (or is the super-admin).
    pub is_admin: bool,
    pub has_pin: bool,
}

impl From<&AuthenticatedUser> for UserSummary {
    fn from(user: &AuthenticatedUser) -> Self {
        Self {
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            roles: user.roles.to_vec(),
            roles_display: user.roles.display_labels(),
            status: user.status,
            is_super_admin: user.is_super_admin,
            is_admin: user.is_admin(),
            has_pin: user.has_pin,
        }
    }
}

/// Response for GET /v1/users/me
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserSummary,
    /// Session expiry (Unix timestamp).
    pub expires_at: i64,
}

/// Outcome of a content area access check.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessCheckResponse {
    pub area: String,
    pub granted: bool,
    pub required_role: Role,
}

// =============================================================================
// WebSocket
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebsocketTokenResponse {
    pub success: bool,
    pub ws_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
    pub user_email: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct WebsocketVerifyRequest {
    #[serde(default)]
    pub ws_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebsocketVerifyResponse {
    pub valid: bool,
    pub user_id: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebsocketStatusResponse {
    pub websocket_available: bool,
    pub user_authorized: bool,
    /// Seconds until the current session expires.
    pub session_expires_in: i64,
}

// =============================================================================
// Administration
// =============================================================================

/// Query parameters for the audit log.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct AuditLogQuery {
    /// 1-based page number (default 1).
    pub page: Option<usize>,
    /// Page size, at most 100 (default 50).
    pub per_page: Option<usize>,
    /// Subject email; defaults to the caller.
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditLogResponse {
    pub email: String,
    pub events: Vec<AuditEvent>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub pages: usize,
}

/// Admin verdict on a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AccessDecisionRequest {
    #[serde(default)]
    pub email: String,
    /// Product role the purchase grants.
    pub role: Role,
    pub decision: Decision,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessDecisionResponse {
    pub success: bool,
    pub email: String,
    pub decision: Decision,
    pub roles: Vec<Role>,
    pub status: UserStatus,
}
