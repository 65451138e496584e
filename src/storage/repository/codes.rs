// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Emailed one-time verification codes.
//!
//! At most one record exists per `(email, purpose)`: issuing replaces the
//! previous record inside a single write transaction. Only Argon2 digests are
//! stored. A replacement remembers the digests of the live codes it
//! superseded so a stale code is reported as gone instead of as a wrong
//! guess. Every call appends an audit entry.
//!
//! ## Consumption order
//!
//! 1. record missing, used, or expired → `NotFoundOrExpired`
//! 2. attempts exhausted → `TooManyAttempts` (nothing changes)
//! 3. digest matches → marked used, success
//! 4. a superseded digest matches → `NotFoundOrExpired` (nothing changes)
//! 5. otherwise → attempts incremented, `Mismatch { remaining }`
//!
//! Digests are compared against a snapshot read outside the write
//! transaction. The write then reloads the record and applies the outcome
//! only if the record is still the one that was compared.

use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::auth::hasher::SecretHasher;
use crate::client::ClientInfo;
use crate::storage::audit::{AuditAction, AuditEvent, AuditRepository};
use crate::storage::database::{StorageError, StorageResult, VERIFICATION_CODES};
use crate::storage::Storage;
use crate::validation::CODE_DIGITS;

/// Superseded digests kept on a replacement record.
const MAX_SUPERSEDED: usize = 4;

/// Snapshot retries before a consume gives up on a churning record.
const CONSUME_RETRIES: usize = 3;

/// What a code authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    Register,
    Login,
    CreatePin,
    ResetPin,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::Register => "register",
            CodePurpose::Login => "login",
            CodePurpose::CreatePin => "create_pin",
            CodePurpose::ResetPin => "reset_pin",
        }
    }
}

impl std::fmt::Display for CodePurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted code record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCode {
    pub email: String,
    pub purpose: CodePurpose,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    /// Digests of still-live codes this record replaced, newest first.
    #[serde(default)]
    pub superseded: Vec<String>,
}

impl StoredCode {
    /// Live means unused and not yet expired.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && self.expires_at > now
    }
}

/// Why a submitted code was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum CodeError {
    #[error("Code expired or not found")]
    NotFoundOrExpired,

    #[error("Too many failed attempts")]
    TooManyAttempts,

    #[error("Incorrect code. Attempts remaining: {remaining}")]
    Mismatch { remaining: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn code_key(email: &str, purpose: CodePurpose) -> String {
    format!("{email}|{}", purpose.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Match,
    Mismatch,
}

/// Verification code store bound to one request origin.
pub struct VerificationCodeStore<'a> {
    storage: &'a Storage,
    hasher: &'a SecretHasher,
    client: &'a ClientInfo,
}

impl<'a> VerificationCodeStore<'a> {
    pub fn new(storage: &'a Storage, hasher: &'a SecretHasher, client: &'a ClientInfo) -> Self {
        Self {
            storage,
            hasher,
            client,
        }
    }

    fn audit(&self, email: &str, action: AuditAction, success: bool, details: String) {
        AuditRepository::new(self.storage).record(
            AuditEvent::new(action)
                .with_email(Some(email))
                .with_client(self.client)
                .with_success(success)
                .with_details(details),
        );
    }

    /// Issue a fresh code, replacing any previous one for the pair.
    ///
    /// Returns the plaintext code for delivery.
    pub fn issue(&self, email: &str, purpose: CodePurpose, ttl: Duration) -> StorageResult<String> {
        self.issue_at(email, purpose, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        email: &str,
        purpose: CodePurpose,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<String> {
        let result = self.try_issue(email, purpose, ttl, now);
        match &result {
            Ok(_) => self.audit(
                email,
                AuditAction::VerificationCodeIssued,
                true,
                format!("purpose={purpose}"),
            ),
            Err(e) => {
                error!(error = %e, purpose = %purpose, "Failed to issue verification code");
                self.audit(
                    email,
                    AuditAction::VerificationCodeIssued,
                    false,
                    format!("purpose={purpose} error=storage"),
                );
            }
        }
        result
    }

    fn try_issue(
        &self,
        email: &str,
        purpose: CodePurpose,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<String> {
        let code = self.hasher.random_digits(CODE_DIGITS)?;
        self.store_code(email, purpose, &code, ttl, now)?;
        Ok(code)
    }

    /// Persist `code` as the live code for the pair.
    fn store_code(
        &self,
        email: &str,
        purpose: CodePurpose,
        code: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| StorageError::InvalidInput(format!("code ttl out of range: {ttl:?}")))?;
        let code_hash = self.hasher.hash(code)?;
        let key = code_key(email, purpose);

        let write_txn = self.storage.db().begin_write()?;
        {
            let mut table = write_txn.open_table(VERIFICATION_CODES)?;
            let previous = match table.remove(key.as_str())? {
                Some(value) => Some(serde_json::from_slice::<StoredCode>(value.value())?),
                None => None,
            };
            let superseded = match previous {
                Some(previous) if previous.is_live_at(now) => {
                    let mut digests = vec![previous.code_hash];
                    digests.extend(previous.superseded);
                    digests.truncate(MAX_SUPERSEDED);
                    digests
                }
                _ => Vec::new(),
            };
            let record = StoredCode {
                email: email.to_string(),
                purpose,
                code_hash,
                expires_at,
                attempts: 0,
                is_used: false,
                created_at: now,
                superseded,
            };
            let json = serde_json::to_vec(&record)?;
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Validate a submitted code and mark it used on success.
    pub fn consume(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
        max_attempts: u32,
    ) -> Result<(), CodeError> {
        self.consume_at(email, code, purpose, max_attempts, Utc::now())
    }

    pub fn consume_at(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<(), CodeError> {
        let result = self.try_consume(email, code, purpose, max_attempts, now);
        match &result {
            Ok(()) => self.audit(
                email,
                AuditAction::VerificationCodeVerified,
                true,
                format!("purpose={purpose}"),
            ),
            Err(e) => self.audit(
                email,
                AuditAction::VerificationCodeRejected,
                false,
                format!("purpose={purpose} reason={e}"),
            ),
        }
        result
    }

    fn try_consume(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<(), CodeError> {
        for _ in 0..CONSUME_RETRIES {
            let Some(snapshot) = self.find(email, purpose)? else {
                return Err(CodeError::NotFoundOrExpired);
            };
            if !snapshot.is_live_at(now) {
                return Err(CodeError::NotFoundOrExpired);
            }
            if snapshot.attempts >= max_attempts {
                return Err(CodeError::TooManyAttempts);
            }

            let verdict = if self.hasher.verify(code, &snapshot.code_hash) {
                Verdict::Match
            } else if snapshot
                .superseded
                .iter()
                .any(|digest| self.hasher.verify(code, digest))
            {
                return Err(CodeError::NotFoundOrExpired);
            } else {
                Verdict::Mismatch
            };

            let applied = self.apply(email, purpose, &snapshot, verdict, max_attempts, now)?;
            if let Some(outcome) = applied {
                return outcome;
            }
        }
        Err(CodeError::NotFoundOrExpired)
    }

    /// Apply a verdict reached against `snapshot`.
    ///
    /// `None` when the stored record was replaced after the snapshot was
    /// read and the verdict no longer applies.
    fn apply(
        &self,
        email: &str,
        purpose: CodePurpose,
        snapshot: &StoredCode,
        verdict: Verdict,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<Result<(), CodeError>>> {
        let key = code_key(email, purpose);
        let write_txn = self.storage.db().begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(VERIFICATION_CODES)?;
            let current = match table.get(key.as_str())? {
                Some(value) => Some(serde_json::from_slice::<StoredCode>(value.value())?),
                None => None,
            };

            match current {
                Some(mut record)
                    if record.code_hash == snapshot.code_hash
                        && record.created_at == snapshot.created_at =>
                {
                    if !record.is_live_at(now) {
                        Some(Err(CodeError::NotFoundOrExpired))
                    } else if record.attempts >= max_attempts {
                        Some(Err(CodeError::TooManyAttempts))
                    } else {
                        let outcome = match verdict {
                            Verdict::Match => {
                                record.is_used = true;
                                Ok(())
                            }
                            Verdict::Mismatch => {
                                record.attempts += 1;
                                Err(CodeError::Mismatch {
                                    remaining: max_attempts.saturating_sub(record.attempts),
                                })
                            }
                        };
                        let json = serde_json::to_vec(&record)?;
                        table.insert(key.as_str(), json.as_slice())?;
                        Some(outcome)
                    }
                }
                // A matching code was replaced meanwhile: it is now stale
                Some(_) if verdict == Verdict::Match => Some(Err(CodeError::NotFoundOrExpired)),
                Some(_) => None,
                None => Some(Err(CodeError::NotFoundOrExpired)),
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Second-phase check for PIN creation.
    ///
    /// True only if the record for the pair was already consumed, has not
    /// expired, and `code` matches it exactly. The record is left unchanged.
    pub fn confirm_used(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
    ) -> StorageResult<bool> {
        self.confirm_used_at(email, code, purpose, Utc::now())
    }

    pub fn confirm_used_at(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let confirmed = match self.find(email, purpose)? {
            Some(record) => {
                record.is_used && record.expires_at > now && self.hasher.verify(code, &record.code_hash)
            }
            None => false,
        };
        self.audit(
            email,
            AuditAction::VerificationCodeReconfirmed,
            confirmed,
            format!("purpose={purpose}"),
        );
        Ok(confirmed)
    }

    /// Current record for the pair, if any.
    pub fn find(&self, email: &str, purpose: CodePurpose) -> StorageResult<Option<StoredCode>> {
        let key = code_key(email, purpose);
        let read_txn = self.storage.db().begin_read()?;
        let table = read_txn.open_table(VERIFICATION_CODES)?;
        match table.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Delete records that expired before `now`. Returns the number removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let write_txn = self.storage.db().begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(VERIFICATION_CODES)?;
            let mut expired = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let record: StoredCode = serde_json::from_slice(value.value())?;
                if record.expires_at <= now {
                    expired.push(key.value().to_string());
                }
            }
            for key in &expired {
                table.remove(key.as_str())?;
            }
            expired.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}
