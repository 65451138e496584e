// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Every code issuance and consumption, every guard decision and every
//! credential change is appended here. Appends are fire-and-forget: a failed
//! write is reported through `tracing` and never aborts the caller.
//!
//! Each entry is also mirrored to the `security` tracing target, at `info`
//! for successes and `warn` for failures.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::database::{StorageResult, AUDIT_BY_SUBJECT, AUDIT_EVENTS, META};
use super::Storage;
use crate::client::ClientInfo;

/// Maximum page size for audit queries.
pub const MAX_PER_PAGE: usize = 100;

const SEQUENCE_KEY: &str = "audit_sequence";

macro_rules! audit_actions {
    ($($(#[$meta:meta])* $variant:ident => $tag:literal,)+) => {
        /// Action tags recorded on audit entries.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        pub enum AuditAction {
            $(
                $(#[$meta])*
                #[serde(rename = $tag)]
                $variant,
            )+
        }

        impl AuditAction {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(AuditAction::$variant => $tag,)+
                }
            }
        }
    };
}

audit_actions! {
    // Verification code store
    VerificationCodeIssued => "verification_code_issued",
    VerificationCodeVerified => "verification_code_verified",
    VerificationCodeRejected => "verification_code_rejected",
    VerificationCodeReconfirmed => "verification_code_reconfirmed",

    // Registration
    SendCodeSuccess => "send_code_success",
    SendCodeInvalidEmail => "send_code_invalid_email",
    SendCodeExistingUser => "send_code_existing_user",
    SendCodeEmailError => "send_code_email_error",
    SendCodeError => "send_code_error",
    VerifyCodeMissingData => "verify_code_missing_data",
    VerifyCodeSuccess => "verify_code_success",
    VerifyCodeFailed => "verify_code_failed",
    UserRegistered => "user_registered",
    SuperAdminEstablished => "super_admin_established",

    // Code login
    LoginMissingEmail => "login_missing_email",
    LoginUserNotFound => "login_user_not_found",
    LoginCodeSent => "login_code_sent",
    LoginCodeEmailError => "login_code_email_error",
    LoginCodeError => "login_code_error",
    LoginCodeSuccess => "login_code_success",
    LoginCodeFailed => "login_code_failed",

    // PIN lifecycle
    SendPinVerificationSuccess => "send_pin_verification_success",
    SendPinVerificationInvalidEmail => "send_pin_verification_invalid_email",
    SendPinVerificationUserNotFound => "send_pin_verification_user_not_found",
    SendPinVerificationPinExists => "send_pin_verification_pin_exists",
    SendPinVerificationEmailError => "send_pin_verification_email_error",
    SendPinVerificationError => "send_pin_verification_error",
    VerifyPinCodeMissingData => "verify_pin_code_missing_data",
    VerifyPinCodeSuccess => "verify_pin_code_success",
    VerifyPinCodeFailed => "verify_pin_code_failed",
    CreatePinSuccess => "create_pin_success",
    CreatePinInvalidFormat => "create_pin_invalid_format",
    CreatePinInvalidVerification => "create_pin_invalid_verification",
    CreatePinExists => "create_pin_exists",
    CreatePinError => "create_pin_error",
    LoginPinSuccess => "login_pin_success",
    LoginPinFailed => "login_pin_failed",
    ResetPinCodeSent => "reset_pin_code_sent",
    ResetPinCodeEmailError => "reset_pin_code_email_error",
    ResetPinMissingData => "reset_pin_missing_data",
    ResetPinInvalidFormat => "reset_pin_invalid_format",
    ResetPinUserNotFound => "reset_pin_user_not_found",
    ResetPinInvalidCode => "reset_pin_invalid_code",
    ResetPinSuccess => "reset_pin_success",
    ResetPinError => "reset_pin_error",
    Logout => "logout",

    // Authorization gate
    SuccessfulAccess => "successful_access",
    AccessDeniedNoToken => "access_denied_no_token",
    AccessDeniedInvalidToken => "access_denied_invalid_token",
    AccessDeniedUserNotFound => "access_denied_user_not_found",
    AccessDeniedNotAdmin => "access_denied_not_admin",
    AccessDeniedRole => "access_denied_role",
    AccessDeniedStatus => "access_denied_status",
    AccessGranted => "access_granted",

    // WebSocket handoff
    WebsocketAuthSuccess => "websocket_auth_success",
    WebsocketAuthRoleDenied => "websocket_auth_role_denied",
    WebsocketAuthStatusDenied => "websocket_auth_status_denied",
    WebsocketAuthError => "websocket_auth_error",
    WebsocketVerifySuccess => "websocket_verify_success",
    WebsocketVerifyError => "websocket_verify_error",

    // Administration
    AuditLogViewed => "audit_log_viewed",
    AccessDecisionApproved => "access_decision_approved",
    AccessDecisionRejected => "access_decision_rejected",
    AccessDecisionFailed => "access_decision_failed",
    AccessDecisionEmailError => "access_decision_email_error",

    // Rate limiter
    RateLimitExceeded => "rate_limit_exceeded",
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Subject email; absent for unauthenticated attempts.
    pub email: Option<String>,
    pub action: AuditAction,
    pub success: bool,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEvent {
    /// Create a new (successful) audit event.
    pub fn new(action: AuditAction) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            email: None,
            action,
            success: true,
            details: None,
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn with_email(mut self, email: Option<&str>) -> Self {
        self.email = email.map(str::to_string);
        self
    }

    /// Copy address and agent from the request origin.
    pub fn with_client(mut self, client: &ClientInfo) -> Self {
        self.ip_address = Some(client.address.clone());
        self.user_agent = client.user_agent.clone();
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Mark as failed.
    pub fn failed(self) -> Self {
        self.with_success(false)
    }
}

/// One page of audit entries, newest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditPage {
    pub events: Vec<AuditEvent>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub pages: usize,
}

/// Index key: `subject | 0x00 | !sequence_be`.
///
/// The inverted sequence makes a forward scan yield the newest entry first.
fn make_index_key(subject: &str, sequence: u64) -> Vec<u8> {
    let mut key = make_prefix(subject);
    key.extend_from_slice(&(!sequence).to_be_bytes());
    key
}

fn make_prefix(subject: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(subject.len() + 1 + 8);
    prefix.extend_from_slice(subject.as_bytes());
    prefix.push(0);
    prefix
}

fn make_prefix_end(subject: &str) -> Vec<u8> {
    let mut end = make_prefix(subject);
    end.extend_from_slice(&[0xFF; 8]);
    end
}

/// Repository for audit events.
pub struct AuditRepository<'a> {
    storage: &'a Storage,
}

impl<'a> AuditRepository<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Persist an audit event.
    pub fn log(&self, event: &AuditEvent) -> StorageResult<()> {
        let json = serde_json::to_vec(event)?;
        let subject = event.email.as_deref().unwrap_or("");

        let write_txn = self.storage.db().begin_write()?;
        {
            let mut meta = write_txn.open_table(META)?;
            let previous = match meta.get(SEQUENCE_KEY)? {
                Some(v) => {
                    let bytes = v.value();
                    let mut buf = [0u8; 8];
                    if bytes.len() >= 8 {
                        buf.copy_from_slice(&bytes[..8]);
                    }
                    u64::from_be_bytes(buf)
                }
                None => 0,
            };
            let sequence = previous + 1;
            meta.insert(SEQUENCE_KEY, sequence.to_be_bytes().as_slice())?;

            let mut events = write_txn.open_table(AUDIT_EVENTS)?;
            events.insert(event.event_id.as_str(), json.as_slice())?;

            let mut index = write_txn.open_table(AUDIT_BY_SUBJECT)?;
            let key = make_index_key(subject, sequence);
            index.insert(key.as_slice(), event.event_id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Mirror to the `security` target and persist, swallowing failures.
    pub fn record(&self, event: AuditEvent) {
        let email = event.email.as_deref().unwrap_or("-");
        let ip = event.ip_address.as_deref().unwrap_or("-");
        let details = event.details.as_deref().unwrap_or("");
        if event.success {
            info!(target: "security", action = %event.action, email, ip, details, "audit");
        } else {
            warn!(target: "security", action = %event.action, email, ip, details, "audit");
        }

        if let Err(e) = self.log(&event) {
            error!(
                target: "security",
                action = %event.action,
                error = %e,
                "Failed to persist audit event"
            );
        }
    }

    /// Entries for one subject (`None` = unauthenticated), newest first.
    ///
    /// `page` is 1-based; `per_page` is clamped to `1..=MAX_PER_PAGE`.
    pub fn query(
        &self,
        email: Option<&str>,
        page: usize,
        per_page: usize,
    ) -> StorageResult<AuditPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        let skip = (page - 1).saturating_mul(per_page);
        let subject = email.unwrap_or("");

        let read_txn = self.storage.db().begin_read()?;
        let index = read_txn.open_table(AUDIT_BY_SUBJECT)?;
        let events_table = read_txn.open_table(AUDIT_EVENTS)?;

        let prefix = make_prefix(subject);
        let prefix_end = make_prefix_end(subject);

        let mut total = 0usize;
        let mut events = Vec::with_capacity(per_page);
        for entry in index.range(prefix.as_slice()..=prefix_end.as_slice())? {
            let entry = entry?;
            total += 1;
            if total <= skip || events.len() >= per_page {
                continue;
            }
            let event_id = entry.1.value().to_string();
            if let Some(value) = events_table.get(event_id.as_str())? {
                events.push(serde_json::from_slice::<AuditEvent>(value.value())?);
            }
        }

        Ok(AuditPage {
            events,
            total,
            page,
            per_page,
            pages: total.div_ceil(per_page),
        })
    }
}

/// Record an audit event in one line.
///
/// `audit_log!(storage, client, email, action)` records a success;
/// the longer forms take an explicit success flag and details.
#[macro_export]
macro_rules! audit_log {
    ($storage:expr, $client:expr, $email:expr, $action:expr) => {{
        $crate::storage::AuditRepository::new($storage).record(
            $crate::storage::AuditEvent::new($action)
                .with_email($email)
                .with_client($client),
        );
    }};
    ($storage:expr, $client:expr, $email:expr, $action:expr, $success:expr, $details:expr) => {{
        $crate::storage::AuditRepository::new($storage).record(
            $crate::storage::AuditEvent::new($action)
                .with_email($email)
                .with_client($client)
                .with_success($success)
                .with_details($details),
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Storage) {
        let temp = TempDir::new().unwrap();
        let storage = Storage::open(&temp.path().join("audit.redb")).unwrap();
        (temp, storage)
    }

    fn client() -> ClientInfo {
        ClientInfo {
            address: "203.0.113.9".to_string(),
            user_agent: Some("test-agent".to_string()),
        }
    }

    #[test]
    fn action_tags_serialize_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuditAction::AccessDeniedNotAdmin).unwrap(),
            "\"access_denied_not_admin\""
        );
        assert_eq!(AuditAction::SendCodeSuccess.as_str(), "send_code_success");
    }

    #[test]
    fn failed_event_builder() {
        let event = AuditEvent::new(AuditAction::LoginPinFailed)
            .with_email(Some("a@example.com"))
            .with_client(&client())
            .with_details("Invalid PIN")
            .failed();

        assert!(!event.success);
        assert_eq!(event.email.as_deref(), Some("a@example.com"));
        assert_eq!(event.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(event.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(event.details.as_deref(), Some("Invalid PIN"));
    }

    #[test]
    fn query_returns_newest_first_per_subject() {
        let (_temp, storage) = setup();
        let repo = AuditRepository::new(&storage);

        for action in [
            AuditAction::SendCodeSuccess,
            AuditAction::VerifyCodeSuccess,
            AuditAction::LoginPinSuccess,
        ] {
            repo.log(&AuditEvent::new(action).with_email(Some("a@example.com")))
                .unwrap();
        }
        repo.log(&AuditEvent::new(AuditAction::Logout).with_email(Some("b@example.com")))
            .unwrap();

        let page = repo.query(Some("a@example.com"), 1, 10).unwrap();
        assert_eq!(page.total, 3);
        let actions: Vec<_> = page.events.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::LoginPinSuccess,
                AuditAction::VerifyCodeSuccess,
                AuditAction::SendCodeSuccess
            ]
        );
    }

    #[test]
    fn query_paginates() {
        let (_temp, storage) = setup();
        let repo = AuditRepository::new(&storage);
        for i in 0..5 {
            repo.log(
                &AuditEvent::new(AuditAction::SuccessfulAccess)
                    .with_email(Some("p@example.com"))
                    .with_details(format!("n={i}")),
            )
            .unwrap();
        }

        let first = repo.query(Some("p@example.com"), 1, 2).unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.pages, 3);
        assert_eq!(first.events[0].details.as_deref(), Some("n=4"));

        let last = repo.query(Some("p@example.com"), 3, 2).unwrap();
        assert_eq!(last.events.len(), 1);
        assert_eq!(last.events[0].details.as_deref(), Some("n=0"));

        let beyond = repo.query(Some("p@example.com"), 4, 2).unwrap();
        assert!(beyond.events.is_empty());
    }

    #[test]
    fn per_page_is_clamped() {
        let (_temp, storage) = setup();
        let repo = AuditRepository::new(&storage);
        let page = repo.query(None, 0, 10_000).unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, MAX_PER_PAGE);
        assert_eq!(page.total, 0);
    }

    #[test]
    fn unauthenticated_events_have_own_bucket() {
        let (_temp, storage) = setup();
        let repo = AuditRepository::new(&storage);
        repo.record(AuditEvent::new(AuditAction::AccessDeniedNoToken).failed());
        repo.record(AuditEvent::new(AuditAction::Logout).with_email(Some("x@example.com")));

        let anonymous = repo.query(None, 1, 10).unwrap();
        assert_eq!(anonymous.total, 1);
        assert_eq!(anonymous.events[0].action, AuditAction::AccessDeniedNoToken);
        assert!(anonymous.events[0].email.is_none());
    }

    #[test]
    fn macro_records_event() {
        let (_temp, storage) = setup();
        crate::audit_log!(
            &storage,
            &client(),
            Some("m@example.com"),
            AuditAction::LoginCodeFailed,
            false,
            "Incorrect code"
        );
        let page = AuditRepository::new(&storage)
            .query(Some("m@example.com"), 1, 10)
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(!page.events[0].success);
    }
}
