// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Development mailer that writes messages to the log.
//!
//! The plain-text body (including any code) is logged. Never use this with
//! real users.

use async_trait::async_trait;
use tracing::warn;

use super::{DeliveryError, Mailer, OutgoingEmail};

pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), DeliveryError> {
        warn!(
            to = %email.to,
            subject = %email.subject,
            body = %email.text,
            "Console mailer: message not delivered"
        );
        Ok(())
    }

    fn transport(&self) -> &'static str {
        "console"
    }
}
