// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for handler and extractor tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::config::{AppConfig, AuthSettings, HasherConfig};
use crate::email::testing::RecordingMailer;
use crate::state::AppState;
use crate::storage::Storage;

pub const TEST_SECRET: &str = "test-session-secret-with-enough-entropy";
pub const SUPER_ADMIN: &str = "owner@example.com";

pub struct TestContext {
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
    _temp: TempDir,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        app_name: "Test Portal".to_string(),
        auth: AuthSettings {
            session_secret: TEST_SECRET.to_string(),
            using_development_secret: false,
            super_admin_email: Some(SUPER_ADMIN.to_string()),
            ..AuthSettings::default()
        },
        hasher: HasherConfig {
            memory_kib: 8,
            iterations: 1,
        },
        mail_timeout: std::time::Duration::from_millis(200),
        rate_limit_capacity: 1024,
        ..AppConfig::default()
    }
}

pub fn test_state() -> TestContext {
    test_state_with(test_config())
}

pub fn test_state_with(config: AppConfig) -> TestContext {
    let temp = TempDir::new().unwrap();
    let storage = Storage::open(&temp.path().join("test.redb")).unwrap();
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::new(config, storage, mailer.clone()).unwrap();
    TestContext {
        state,
        mailer,
        _temp: temp,
    }
}
