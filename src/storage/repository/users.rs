// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User credential records and their repository.
//!
//! A user is keyed by normalized email. The record carries the granted
//! [`RoleSet`], the legacy primary `role` kept for display, an account status,
//! the super-admin flag and an optional PIN digest.
//!
//! Authorization reads only `roles` (see [`StoredUser::roles_of`]). The
//! primary `role` is derived from it: it stays `pending` until the first
//! grant, then holds that first granted role; super-admins show `admin`.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::hasher::{HashError, SecretHasher};
use crate::auth::roles::{Role, RoleSet};
use crate::storage::database::{StorageError, StorageResult, USERS, USER_IDS};
use crate::storage::Storage;
use crate::validation::is_valid_pin;

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Pending,
    Active,
    Suspended,
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserStatus::Pending => write!(f, "pending"),
            UserStatus::Active => write!(f, "active"),
            UserStatus::Suspended => write!(f, "suspended"),
        }
    }
}

/// Stored user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: String,
    pub email: String,
    /// Display-only primary role. Written by [`StoredUser::grant_role`] and
    /// [`StoredUser::promote_to_super_admin`], never read for access.
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub roles: RoleSet,
    pub status: UserStatus,
    #[serde(default)]
    pub is_super_admin: bool,
    #[serde(default)]
    pub pin_hash: Option<String>,
    #[serde(default)]
    pub pin_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StoredUser {
    /// A freshly registered, pending user.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.into(),
            role: Role::Pending,
            roles: RoleSet::new(),
            status: UserStatus::Pending,
            is_super_admin: false,
            pin_hash: None,
            pin_created_at: None,
            created_at: Utc::now(),
        }
    }

    /// Flag as super-admin: admin primary role, active, every role.
    pub fn promote_to_super_admin(&mut self) {
        self.is_super_admin = true;
        self.role = Role::Admin;
        self.status = UserStatus::Active;
        self.roles = RoleSet::all();
    }

    /// Store a new PIN digest.
    ///
    /// Returns `Ok(false)` without touching the record when `pin` is not
    /// exactly four ASCII digits.
    pub fn set_pin(&mut self, hasher: &SecretHasher, pin: &str) -> Result<bool, HashError> {
        if !is_valid_pin(pin) {
            return Ok(false);
        }
        self.pin_hash = Some(hasher.hash(pin)?);
        self.pin_created_at = Some(Utc::now());
        Ok(true)
    }

    /// False when no PIN is set.
    pub fn verify_pin(&self, hasher: &SecretHasher, pin: &str) -> bool {
        match &self.pin_hash {
            Some(digest) => hasher.verify(pin, digest),
            None => false,
        }
    }

    pub fn has_pin(&self) -> bool {
        self.pin_hash.is_some()
    }

    /// Effective roles. A super-admin holds every grantable role.
    pub fn roles_of(&self) -> RoleSet {
        if self.is_super_admin {
            RoleSet::all()
        } else {
            self.roles.clone()
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.is_super_admin || self.roles.contains(role)
    }

    /// Grant a role. No-op for super-admins and for `pending`.
    ///
    /// A pending primary role is promoted to the granted one.
    /// Returns `true` if the record changed.
    pub fn grant_role(&mut self, role: Role) -> bool {
        if self.is_super_admin || role == Role::Pending {
            return false;
        }
        let mut changed = self.roles.insert(role);
        if self.role == Role::Pending {
            self.role = role;
            changed = true;
        }
        changed
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Result of completing a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// Created or upgraded as the configured super-admin.
    SuperAdmin,
    /// Account already existed and needed no change.
    Existing,
}

/// Repository for user records.
pub struct UserRepository<'a> {
    storage: &'a Storage,
}

impl<'a> UserRepository<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Look up by normalized email.
    pub fn get_by_email(&self, email: &str) -> StorageResult<Option<StoredUser>> {
        let read_txn = self.storage.db().begin_read()?;
        let table = read_txn.open_table(USERS)?;
        match table.get(email)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_by_id(&self, user_id: &str) -> StorageResult<Option<StoredUser>> {
        let email = {
            let read_txn = self.storage.db().begin_read()?;
            let ids = read_txn.open_table(USER_IDS)?;
            match ids.get(user_id)? {
                Some(v) => v.value().to_string(),
                None => return Ok(None),
            }
        };
        self.get_by_email(&email)
    }

    pub fn exists(&self, email: &str) -> StorageResult<bool> {
        Ok(self.get_by_email(email)?.is_some())
    }

    /// Insert a new user. Fails if the email is taken.
    pub fn create(&self, user: &StoredUser) -> StorageResult<()> {
        let json = serde_json::to_vec(user)?;
        let write_txn = self.storage.db().begin_write()?;
        {
            let mut users = write_txn.open_table(USERS)?;
            if users.get(user.email.as_str())?.is_some() {
                return Err(StorageError::AlreadyExists(format!("User {}", user.email)));
            }
            users.insert(user.email.as_str(), json.as_slice())?;
            let mut ids = write_txn.open_table(USER_IDS)?;
            ids.insert(user.id.as_str(), user.email.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Create the account for a verified registration, or return the
    /// existing one.
    ///
    /// When `super_admin_email` matches, the account is created (or upgraded)
    /// as the super-admin. Runs in a single write transaction.
    pub fn register_verified(
        &self,
        email: &str,
        super_admin_email: Option<&str>,
    ) -> StorageResult<(StoredUser, Registration)> {
        let is_super_admin_email = super_admin_email == Some(email);

        let write_txn = self.storage.db().begin_write()?;
        let outcome = {
            let mut users = write_txn.open_table(USERS)?;
            let existing = match users.get(email)? {
                Some(value) => Some(serde_json::from_slice::<StoredUser>(value.value())?),
                None => None,
            };

            match existing {
                Some(mut user) => {
                    if is_super_admin_email && !user.is_super_admin {
                        user.promote_to_super_admin();
                        let json = serde_json::to_vec(&user)?;
                        users.insert(email, json.as_slice())?;
                        (user, Registration::SuperAdmin)
                    } else {
                        (user, Registration::Existing)
                    }
                }
                None => {
                    let mut user = StoredUser::new(email);
                    let registration = if is_super_admin_email {
                        user.promote_to_super_admin();
                        Registration::SuperAdmin
                    } else {
                        Registration::Created
                    };
                    let json = serde_json::to_vec(&user)?;
                    users.insert(email, json.as_slice())?;
                    let mut ids = write_txn.open_table(USER_IDS)?;
                    ids.insert(user.id.as_str(), email)?;
                    (user, registration)
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Read-modify-write one user in a single transaction.
    ///
    /// `apply` returns whether to persist. Returns `None` if the user does not
    /// exist, otherwise the record as it stands after `apply`.
    pub fn modify<F>(&self, email: &str, apply: F) -> StorageResult<Option<StoredUser>>
    where
        F: FnOnce(&mut StoredUser) -> StorageResult<bool>,
    {
        let write_txn = self.storage.db().begin_write()?;
        let result = {
            let mut users = write_txn.open_table(USERS)?;
            let existing_bytes = match users.get(email)? {
                Some(value) => value.value().to_vec(),
                None => return Ok(None),
            };
            let mut user: StoredUser = serde_json::from_slice(&existing_bytes)?;
            if apply(&mut user)? {
                let json = serde_json::to_vec(&user)?;
                users.insert(email, json.as_slice())?;
            }
            user
        };
        write_txn.commit()?;
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hasher::test_hasher;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Storage) {
        let temp = TempDir::new().unwrap();
        let storage = Storage::open(&temp.path().join("users.redb")).unwrap();
        (temp, storage)
    }

    #[test]
    fn new_user_is_pending_without_pin() {
        let user = StoredUser::new("a@example.com");
        assert_eq!(user.status, UserStatus::Pending);
        assert_eq!(user.role, Role::Pending);
        assert!(user.roles.is_pending());
        assert!(!user.has_pin());
        assert!(user.has_role(Role::Pending));
        assert!(!user.has_role(Role::SignalsBot));
    }

    #[test]
    fn set_pin_rejects_bad_format_without_mutation() {
        let hasher = test_hasher();
        let mut user = StoredUser::new("a@example.com");
        assert!(!user.set_pin(&hasher, "12a4").unwrap());
        assert!(!user.set_pin(&hasher, "12345").unwrap());
        assert!(!user.has_pin());
        assert!(user.pin_created_at.is_none());
    }

    #[test]
    fn set_and_verify_pin() {
        let hasher = test_hasher();
        let mut user = StoredUser::new("a@example.com");
        assert!(user.set_pin(&hasher, "4821").unwrap());
        assert!(user.has_pin());
        assert!(user.pin_created_at.is_some());
        assert!(user.verify_pin(&hasher, "4821"));
        assert!(!user.verify_pin(&hasher, "4822"));
        assert_ne!(user.pin_hash.as_deref(), Some("4821"));
    }

    #[test]
    fn verify_pin_without_pin_is_false() {
        let hasher = test_hasher();
        let user = StoredUser::new("a@example.com");
        assert!(!user.verify_pin(&hasher, "0000"));
    }

    #[test]
    fn grant_role_promotes_pending_primary() {
        let mut user = StoredUser::new("a@example.com");
        assert!(user.grant_role(Role::SignalsBot));
        assert_eq!(user.role, Role::SignalsBot);
        assert!(!user.grant_role(Role::SignalsBot));
        assert!(user.grant_role(Role::CommunityBots));
        assert_eq!(user.role, Role::SignalsBot);
        assert_eq!(
            user.roles_of().to_vec(),
            vec![Role::SignalsBot, Role::CommunityBots]
        );
        assert!(!user.has_role(Role::Pending));
    }

    #[test]
    fn primary_role_follows_grants_and_promotion() {
        let mut user = StoredUser::new("a@example.com");
        user.grant_role(Role::Pending);
        assert_eq!(user.role, Role::Pending);
        assert!(user.roles_of().is_pending());

        user.promote_to_super_admin();
        assert_eq!(user.role, Role::Admin);
        assert!(!user.grant_role(Role::SignalsBot));
        assert_eq!(user.role, Role::Admin);
    }

    #[test]
    fn rows_without_primary_role_load_as_pending() {
        let json = r#"{
            "id": "u1",
            "email": "old@example.com",
            "roles": "signals_bot",
            "status": "active",
            "created_at": "2025-01-01T00:00:00Z"
        }"#;
        let user: StoredUser = serde_json::from_str(json).unwrap();
        assert_eq!(user.role, Role::Pending);
        assert!(user.has_role(Role::SignalsBot));
    }

    #[test]
    fn super_admin_holds_every_role_and_ignores_grants() {
        let mut user = StoredUser::new("root@example.com");
        user.promote_to_super_admin();
        let before = user.roles.clone();
        assert!(!user.grant_role(Role::CommunityBots));
        assert_eq!(user.roles, before);
        for role in [Role::Pending, Role::SignalsBot, Role::CommunityBots, Role::Admin] {
            assert!(user.has_role(role));
        }
        assert_eq!(user.roles_of(), RoleSet::all());
        assert!(user.is_active());
    }

    #[test]
    fn create_and_lookup_by_email_and_id() {
        let (_temp, storage) = setup();
        let repo = UserRepository::new(&storage);
        let user = StoredUser::new("a@example.com");
        repo.create(&user).unwrap();

        let by_email = repo.get_by_email("a@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        let by_id = repo.get_by_id(&user.id).unwrap().unwrap();
        assert_eq!(by_id.email, "a@example.com");
        assert!(repo.get_by_id("missing").unwrap().is_none());
        assert!(matches!(
            repo.create(&StoredUser::new("a@example.com")),
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[test]
    fn register_verified_creates_once() {
        let (_temp, storage) = setup();
        let repo = UserRepository::new(&storage);
        let (first, outcome) = repo.register_verified("a@example.com", None).unwrap();
        assert_eq!(outcome, Registration::Created);
        let (second, outcome) = repo.register_verified("a@example.com", None).unwrap();
        assert_eq!(outcome, Registration::Existing);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn register_verified_bootstraps_and_upgrades_super_admin() {
        let (_temp, storage) = setup();
        let repo = UserRepository::new(&storage);

        let (root, outcome) = repo
            .register_verified("root@example.com", Some("root@example.com"))
            .unwrap();
        assert_eq!(outcome, Registration::SuperAdmin);
        assert!(root.is_super_admin);
        assert_eq!(root.status, UserStatus::Active);

        repo.create(&StoredUser::new("late@example.com")).unwrap();
        let (late, outcome) = repo
            .register_verified("late@example.com", Some("late@example.com"))
            .unwrap();
        assert_eq!(outcome, Registration::SuperAdmin);
        assert!(late.is_super_admin);
        assert!(repo.get_by_id(&late.id).unwrap().unwrap().is_super_admin);
    }

    #[test]
    fn modify_persists_only_when_requested() {
        let (_temp, storage) = setup();
        let repo = UserRepository::new(&storage);
        repo.create(&StoredUser::new("a@example.com")).unwrap();

        let skipped = repo
            .modify("a@example.com", |u| {
                u.status = UserStatus::Suspended;
                Ok(false)
            })
            .unwrap()
            .unwrap();
        assert_eq!(skipped.status, UserStatus::Suspended);
        assert_eq!(
            repo.get_by_email("a@example.com").unwrap().unwrap().status,
            UserStatus::Pending
        );

        repo.modify("a@example.com", |u| {
            u.status = UserStatus::Active;
            Ok(true)
        })
        .unwrap();
        assert!(repo.get_by_email("a@example.com").unwrap().unwrap().is_active());

        assert!(repo.modify("missing@example.com", |_| Ok(true)).unwrap().is_none());
    }
}
