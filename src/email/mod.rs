// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Email Delivery
//!
//! Verification codes and access-decision notices go out through a
//! [`Mailer`]. SMTP is used when fully configured; otherwise the console
//! mailer logs messages for local development.
//!
//! Every delivery is bounded by `MAIL_TIMEOUT_SECONDS`. A slow or failing
//! relay surfaces as a [`DeliveryError`]; the issued code stays persisted
//! and the failure is audited by the caller.

pub mod console;
pub mod smtp;
pub mod templates;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::info;

use crate::config::AppConfig;

pub use console::ConsoleMailer;
pub use smtp::SmtpMailer;

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), DeliveryError>;

    /// Short transport name for health output.
    fn transport(&self) -> &'static str;
}

/// Send with an upper bound on wall time.
pub async fn deliver(
    mailer: &dyn Mailer,
    email: OutgoingEmail,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    tokio::time::timeout(timeout, mailer.send(email))
        .await
        .map_err(|_| DeliveryError::Timeout(timeout))?
}

/// SMTP when configured, console otherwise.
pub fn mailer_from_config(config: &AppConfig) -> Result<Arc<dyn Mailer>, DeliveryError> {
    match &config.smtp {
        Some(smtp) => {
            info!(host = %smtp.host, port = smtp.port, "Using SMTP mailer");
            Ok(Arc::new(SmtpMailer::new(smtp)?))
        }
        None => {
            info!("SMTP not configured, using console mailer");
            Ok(Arc::new(ConsoleMailer))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use super::*;

    /// Captures messages; can be switched to fail or hang.
    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail: AtomicBool,
        hang: AtomicBool,
    }

    impl RecordingMailer {
        pub fn sent(&self) -> Vec<OutgoingEmail> {
            self.sent.lock().unwrap().clone()
        }

        pub fn fail_next(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn hang(&self, hang: bool) {
            self.hang.store(hang, Ordering::SeqCst);
        }

        /// Six-digit code from the most recent message to `to`.
        pub fn last_code_for(&self, to: &str) -> Option<String> {
            self.sent()
                .iter()
                .rev()
                .find(|m| m.to == to)
                .and_then(|m| {
                    m.text
                        .split(|c: char| !c.is_ascii_digit())
                        .find(|part| part.len() == 6)
                        .map(str::to_string)
                })
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: OutgoingEmail) -> Result<(), DeliveryError> {
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeliveryError::Transport("relay refused".to_string()));
            }
            self.sent.lock().unwrap().push(email);
            Ok(())
        }

        fn transport(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn deliver_times_out() {
        let mailer = RecordingMailer::default();
        mailer.hang(true);
        let email = OutgoingEmail {
            to: "a@example.com".to_string(),
            subject: "s".to_string(),
            text: "t".to_string(),
            html: "h".to_string(),
        };
        let result = deliver(&mailer, email, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(DeliveryError::Timeout(_))));
        assert!(mailer.sent().is_empty());
    }

    #[test]
    fn console_mailer_without_smtp() {
        let mailer = mailer_from_config(&AppConfig::default()).unwrap();
        assert_eq!(mailer.transport(), "console");
    }
}
