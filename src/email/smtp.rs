// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SMTP delivery over an implicit-TLS relay.

use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{error, info};

use super::{DeliveryError, Mailer, OutgoingEmail};
use crate::config::SmtpConfig;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let from: Mailbox = config
            .from_email
            .parse()
            .map_err(|e| DeliveryError::InvalidAddress(format!("{}: {e}", config.from_email)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| DeliveryError::Transport(format!("SMTP setup failed: {e}")))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport, from })
    }

    fn build(&self, email: OutgoingEmail) -> Result<Message, DeliveryError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| DeliveryError::InvalidAddress(format!("{}: {e}", email.to)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .multipart(MultiPart::alternative_plain_html(email.text, email.html))
            .map_err(|e| DeliveryError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), DeliveryError> {
        let to = email.to.clone();
        let message = self.build(email)?;
        self.transport.send(message).await.map_err(|e| {
            error!(to = %to, error = %e, "SMTP delivery failed");
            DeliveryError::Transport(e.to_string())
        })?;
        info!(to = %to, "Email delivered");
        Ok(())
    }

    fn transport(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(from: &str) -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 465,
            username: "mailer".to_string(),
            password: "pw".to_string(),
            from_email: from.to_string(),
        }
    }

    #[tokio::test]
    async fn builds_multipart_message() {
        let mailer = SmtpMailer::new(&config("security@example.com")).unwrap();
        let message = mailer
            .build(OutgoingEmail {
                to: "a@example.com".to_string(),
                subject: "Code".to_string(),
                text: "123456".to_string(),
                html: "<b>123456</b>".to_string(),
            })
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("Subject: Code"));
    }

    #[tokio::test]
    async fn rejects_invalid_addresses() {
        assert!(matches!(
            SmtpMailer::new(&config("not an address")),
            Err(DeliveryError::InvalidAddress(_))
        ));
        let mailer = SmtpMailer::new(&config("security@example.com")).unwrap();
        let result = mailer.build(OutgoingEmail {
            to: "broken".to_string(),
            subject: "s".to_string(),
            text: "t".to_string(),
            html: "h".to_string(),
        });
        assert!(matches!(result, Err(DeliveryError::InvalidAddress(_))));
    }
}
