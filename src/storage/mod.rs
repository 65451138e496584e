// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state lives in a single embedded redb database under
//! `DATA_DIR`:
//!
//! ```text
//! $DATA_DIR/
//!   access-gate.redb
//!     users               email → user record (JSON)
//!     user_ids            user id → email
//!     verification_codes  email|purpose → code record (JSON)
//!     audit_events        event id → audit entry (JSON)
//!     audit_by_subject    subject|!sequence → event id
//!     meta                counters
//! ```
//!
//! Plaintext codes and PINs are never written; only Argon2id digests.

pub mod audit;
pub mod database;
pub mod repository;

pub use audit::{AuditAction, AuditEvent, AuditPage, AuditRepository};
pub use database::{Storage, StorageError, StorageResult};
pub use repository::{
    CodeError, CodePurpose, Registration, StoredCode, StoredUser, UserRepository, UserStatus,
    VerificationCodeStore,
};
