// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Message bodies for verification codes and access decisions.

use super::OutgoingEmail;
use crate::auth::Role;
use crate::storage::CodePurpose;

fn code_intro(purpose: CodePurpose) -> (&'static str, &'static str) {
    match purpose {
        CodePurpose::Register => (
            "Your verification code",
            "Use this code to finish creating your account.",
        ),
        CodePurpose::Login => ("Your sign-in code", "Use this code to sign in."),
        CodePurpose::CreatePin => (
            "Your PIN setup code",
            "Use this code to confirm the creation of your PIN.",
        ),
        CodePurpose::ResetPin => (
            "Your PIN reset code",
            "Use this code to reset your PIN. If you did not ask for a reset, ignore this message.",
        ),
    }
}

/// Verification code message for `purpose`.
pub fn code_email(
    app_name: &str,
    to: &str,
    purpose: CodePurpose,
    code: &str,
    ttl_minutes: u64,
) -> OutgoingEmail {
    let (title, lead) = code_intro(purpose);
    let subject = format!("{title} for {app_name}");
    let text = format!(
        "{lead}\n\nCode: {code}\n\nThe code expires in {ttl_minutes} minutes. \
         Never share it with anyone.\n\n{app_name}"
    );
    let html = format!(
        "<div style=\"font-family:sans-serif;max-width:480px\">\
         <h2>{title}</h2>\
         <p>{lead}</p>\
         <p style=\"font-size:28px;letter-spacing:6px;font-weight:bold\">{code}</p>\
         <p>The code expires in {ttl_minutes} minutes. Never share it with anyone.</p>\
         <p style=\"color:#888\">{app_name}</p>\
         </div>"
    );
    OutgoingEmail {
        to: to.to_string(),
        subject,
        text,
        html,
    }
}

/// Notice sent after an administrator approves or rejects a purchase.
pub fn decision_email(app_name: &str, to: &str, approved: bool, role: Role) -> OutgoingEmail {
    let product = role.label();
    let (subject, text) = if approved {
        (
            format!("Your {product} access is approved"),
            format!(
                "Your purchase of {product} was approved. Sign in to {app_name} to start using it."
            ),
        )
    } else {
        (
            format!("Your {product} purchase was not approved"),
            format!(
                "We could not verify your purchase of {product}. \
                 Contact {app_name} support if you believe this is a mistake."
            ),
        )
    };
    let html = format!(
        "<div style=\"font-family:sans-serif;max-width:480px\">\
         <h2>{subject}</h2><p>{text}</p><p style=\"color:#888\">{app_name}</p></div>"
    );
    OutgoingEmail {
        to: to.to_string(),
        subject,
        text,
        html,
    }
}
