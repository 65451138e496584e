// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Passwordless authentication built on emailed one-time codes and 4-digit
//! PINs, with HS256-signed session tokens.
//!
//! ## Auth Flow
//!
//! 1. Client requests a code; the code store issues and persists its digest
//! 2. Client submits the code (or a PIN); on success the server mints a
//!    session token and returns it in the `token` cookie
//! 3. Protected endpoints:
//!    - read the cookie (or `Authorization: Bearer`)
//!    - verify signature, expiry and token type
//!    - reload the user so roles and status are always live
//!    - evaluate the policy table for the requested resource
//!
//! ## Security
//!
//! - Codes and PINs are stored only as Argon2id digests
//! - Token expiry is checked with zero leeway
//! - Narrow-purpose tokens (`type` claim) are never accepted as sessions
//! - Every refusal is written to the audit log

pub mod claims;
pub mod cookie;
pub mod error;
pub mod extractor;
pub mod hasher;
pub mod policy;
pub mod roles;
pub mod tokens;

pub use claims::{AuthenticatedUser, SessionClaims, TokenType};
pub use error::AuthError;
pub use extractor::{authorize, AdminOnly, Auth};
pub use hasher::{HashError, SecretHasher};
pub use policy::{Action, Resource};
pub use roles::{Role, RoleSet};
pub use tokens::{TokenError, TokenService};
