// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{HashError, SecretHasher, TokenService};
use crate::config::AppConfig;
use crate::email::Mailer;
use crate::rate_limit::RateLimiter;
use crate::storage::Storage;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub hasher: Arc<SecretHasher>,
    pub tokens: TokenService,
    pub limiter: Arc<RateLimiter>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        storage: Storage,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, HashError> {
        Ok(Self {
            storage: Arc::new(storage),
            hasher: Arc::new(SecretHasher::new(config.hasher)?),
            tokens: TokenService::new(&config.auth),
            limiter: Arc::new(RateLimiter::new(config.rate_limit_capacity)),
            mailer,
            config: Arc::new(config),
        })
    }
}
