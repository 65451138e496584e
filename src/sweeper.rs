// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Expired Code Sweeper
//!
//! Background task that deletes verification code records past their expiry.
//! Expired codes are already rejected on use; the sweep only reclaims space.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`; the loop exits at the next
//! sleep once the token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::SecretHasher;
use crate::client::ClientInfo;
use crate::storage::{Storage, VerificationCodeStore};

/// Default interval between sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub struct CodeSweeper {
    storage: Arc<Storage>,
    hasher: Arc<SecretHasher>,
    interval: Duration,
}

impl CodeSweeper {
    pub fn new(storage: Arc<Storage>, hasher: Arc<SecretHasher>) -> Self {
        Self {
            storage,
            hasher,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Expired code sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.sweep();

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Expired code sweeper shutting down");
    }

    /// One pass. Returns the number of records removed.
    pub fn sweep(&self) -> usize {
        let client = ClientInfo::internal();
        let store = VerificationCodeStore::new(&self.storage, &self.hasher, &client);
        match store.purge_expired(Utc::now()) {
            Ok(0) => {
                debug!("No expired verification codes");
                0
            }
            Ok(removed) => {
                info!(removed, "Purged expired verification codes");
                removed
            }
            Err(e) => {
                warn!(error = %e, "Expired code sweep failed");
                0
            }
        }
    }
}
