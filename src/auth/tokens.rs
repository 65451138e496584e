// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token issuance and verification (HS256).
//!
//! A token is valid iff its signature verifies under the configured secret,
//! `exp` is strictly in the future, and its `type` claim matches what the
//! caller expects. General sessions carry no `type`; a typed token is never
//! accepted as a general session.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use tracing::error;

use super::claims::{SessionClaims, TokenType};
use crate::config::AuthSettings;
use crate::storage::StoredUser;

/// Token verification failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    Malformed,

    #[error("Invalid token type")]
    WrongType,

    #[error("Token signing failed")]
    Signing,
}

/// Issues and verifies signed tokens with one shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
    websocket_ttl: Duration,
}

impl TokenService {
    pub fn new(settings: &AuthSettings) -> Self {
        let secret = settings.session_secret.as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            session_ttl: settings.session_ttl,
            websocket_ttl: settings.websocket_token_ttl,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn websocket_ttl(&self) -> Duration {
        self.websocket_ttl
    }

    /// Sign a token for `user` carrying a role/status snapshot.
    pub fn issue(
        &self,
        user: &StoredUser,
        ttl: Duration,
        token_type: Option<TokenType>,
    ) -> Result<(String, SessionClaims), TokenError> {
        let iat = Utc::now().timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|_| TokenError::Signing)?;
        let claims = SessionClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            iat,
            exp: iat.saturating_add(ttl_secs),
            roles: Some(user.roles_of().to_vec()),
            status: Some(user.status),
            is_super_admin: Some(user.is_super_admin),
            token_type,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            error!(error = %e, "Failed to sign token");
            TokenError::Signing
        })?;
        Ok((token, claims))
    }

    /// General session token.
    pub fn issue_session(&self, user: &StoredUser) -> Result<(String, SessionClaims), TokenError> {
        self.issue(user, self.session_ttl, None)
    }

    /// Narrow-purpose WebSocket handoff token.
    pub fn issue_websocket(&self, user: &StoredUser) -> Result<(String, SessionClaims), TokenError> {
        self.issue(user, self.websocket_ttl, Some(TokenType::WebsocketAuth))
    }

    pub fn verify(
        &self,
        token: &str,
        expected: Option<TokenType>,
    ) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, expected, Utc::now().timestamp())
    }

    /// Verify against an explicit clock (Unix seconds).
    pub fn verify_at(
        &self,
        token: &str,
        expected: Option<TokenType>,
        now: i64,
    ) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })?
            .claims;

        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        if claims.token_type != expected {
            return Err(TokenError::WrongType);
        }

        Ok(claims)
    }
}
