// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded account database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: normalized email → serialized StoredUser
//! - `user_ids`: user id → normalized email
//! - `verification_codes`: `email|purpose` → serialized StoredCode
//! - `audit_events`: event id → serialized AuditEvent
//! - `audit_by_subject`: composite key (subject|!sequence) → event id
//! - `meta`: key → value bytes (counters)
//!
//! redb allows a single write transaction at a time. Every read-modify-write
//! in the repositories happens inside one write transaction, which makes code
//! issuance and consumption serializable per database.

use std::path::Path;

use redb::{Database, ReadableDatabase, TableDefinition};

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

pub(crate) const USER_IDS: TableDefinition<&str, &str> = TableDefinition::new("user_ids");

pub(crate) const VERIFICATION_CODES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("verification_codes");

pub(crate) const AUDIT_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_events");

/// Key format: `subject | 0x00 | !sequence_be` for newest-first range scans.
pub(crate) const AUDIT_BY_SUBJECT: TableDefinition<&[u8], &str> =
    TableDefinition::new("audit_by_subject");

pub(crate) const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("hashing error: {0}")]
    Hash(#[from] crate::auth::hasher::HashError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// Storage
// =============================================================================

/// Handle to the embedded database shared by all repositories.
pub struct Storage {
    db: Database,
}

impl Storage {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_IDS)?;
            let _ = write_txn.open_table(VERIFICATION_CODES)?;
            let _ = write_txn.open_table(AUDIT_EVENTS)?;
            let _ = write_txn.open_table(AUDIT_BY_SUBJECT)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Verify the database accepts a read transaction.
    pub fn health_check(&self) -> StorageResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(USERS)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_parent_directories_and_tables() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("db.redb");
        let storage = Storage::open(&path).unwrap();
        assert!(path.exists());
        storage.health_check().unwrap();
    }

    #[test]
    fn reopen_existing_database() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db.redb");
        drop(Storage::open(&path).unwrap());
        let storage = Storage::open(&path).unwrap();
        storage.health_check().unwrap();
    }
}
