// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the embedded database.
//!
//! Each repository borrows the shared [`Storage`](super::Storage) handle and
//! performs every read-modify-write inside one redb write transaction.

pub mod codes;
pub mod users;

pub use codes::{CodeError, CodePurpose, StoredCode, VerificationCodeStore};
pub use users::{Registration, StoredUser, UserRepository, UserStatus};
