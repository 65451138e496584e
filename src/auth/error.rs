// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication and authorization errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::tokens::TokenError;

/// Guard failure returned by the auth extractors.
#[derive(Debug)]
pub enum AuthError {
    /// No session cookie or bearer token present
    MissingToken,
    /// Token failed signature or structure checks
    MalformedToken,
    /// Token has expired
    TokenExpired,
    /// Token carries the wrong `type` for this endpoint
    WrongTokenType,
    /// Token subject no longer exists
    UserNotFound,
    /// Required role missing
    InsufficientPermissions,
    /// Account status is not active
    InactiveAccount,
    /// Internal error
    InternalError(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::WrongTokenType => "wrong_token_type",
            AuthError::UserNotFound => "user_not_found",
            AuthError::InsufficientPermissions => "insufficient_permissions",
            AuthError::InactiveAccount => "inactive_account",
            AuthError::InternalError(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingToken
            | AuthError::MalformedToken
            | AuthError::TokenExpired
            | AuthError::WrongTokenType
            | AuthError::UserNotFound => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions | AuthError::InactiveAccount => {
                StatusCode::FORBIDDEN
            }
            AuthError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::Malformed => AuthError::MalformedToken,
            TokenError::WrongType => AuthError::WrongTokenType,
            TokenError::Signing => AuthError::InternalError("token signing failed".to_string()),
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Authentication required"),
            AuthError::MalformedToken => write!(f, "Invalid token"),
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::WrongTokenType => write!(f, "Token is not valid for this endpoint"),
            AuthError::UserNotFound => write!(f, "User not found"),
            AuthError::InsufficientPermissions => {
                write!(f, "Insufficient permissions for this operation")
            }
            AuthError::InactiveAccount => write!(f, "Account is not active"),
            AuthError::InternalError(msg) => write!(f, "Internal authentication error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}
