// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access Gate - One-Time Code Authentication Service
//!
//! Passwordless sign-in through emailed verification codes and 4-digit PINs,
//! HS256 session tokens carried in a cookie, and role-based access to
//! downstream content areas.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Hashing, tokens, extractors and the authorization policy
//! - `email` - Mail delivery (SMTP or console) and templates
//! - `rate_limit` - Per-client fixed-window request limits
//! - `storage` - Embedded database (redb): users, codes, audit log
//! - `sweeper` - Background removal of expired verification codes

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod email;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod state;
pub mod storage;
pub mod sweeper;
pub mod validation;

#[cfg(test)]
mod test_support;
