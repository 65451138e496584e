// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Code, PIN and session endpoints.
//!
//! Every handler validates input shape before touching the store and audits
//! every outcome before returning. Rate limiting is applied by the router.
//!
//! ## PIN creation
//!
//! Creating a PIN takes two calls with the same emailed code:
//!
//! 1. `POST /v1/auth/pin/verify` consumes the `create_pin` code
//! 2. `POST /v1/auth/pin` re-checks the now used code by exact value and
//!    only then stores the PIN
//!
//! The second call never accepts a code that was not consumed by the first.

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderName, StatusCode},
    Json,
};
use tracing::{error, warn};

use crate::{
    audit_log,
    auth::{
        cookie::{clear_session_cookie, session_cookie, token_from_headers},
        AuthenticatedUser,
    },
    client::ClientInfo,
    email::{deliver, templates},
    error::ApiError,
    models::{
        CheckUserResponse, CreatePinRequest, EmailRequest, MessageResponse, PinLoginRequest,
        ResetPinRequest, SessionResponse, UserSummary, VerifyCodeRequest,
    },
    state::AppState,
    storage::{
        AuditAction, CodeError, CodePurpose, Registration, StoredUser, UserRepository,
        VerificationCodeStore,
    },
    validation::{is_code_shaped, is_plausible_email, is_valid_pin, normalize_email},
};

/// JSON body plus a `Set-Cookie` header.
pub type WithCookie<T> = ([(HeaderName, String); 1], Json<T>);

pub type SessionGrant = WithCookie<SessionResponse>;

// =============================================================================
// Helpers
// =============================================================================

/// Audit tags for one code-issuing flow.
struct IssueTags {
    sent: AuditAction,
    email_error: AuditAction,
    error: AuditAction,
}

/// Issue a code for `purpose` and mail it.
///
/// A delivery failure leaves the issued code in place and maps to 502.
async fn issue_and_deliver(
    state: &AppState,
    client: &ClientInfo,
    email: &str,
    purpose: CodePurpose,
    tags: IssueTags,
) -> Result<(), ApiError> {
    let storage = state.storage.as_ref();
    let ttl = state.config.auth.code_ttl;

    let owned_email = email.to_string();
    let issued = blocking(state, client, move |state, client| {
        VerificationCodeStore::new(&state.storage, &state.hasher, client).issue(
            &owned_email,
            purpose,
            ttl,
        )
    })
    .await?;

    let code = match issued {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, %purpose, "Failed to issue verification code");
            audit_log!(
                storage,
                client,
                Some(email),
                tags.error,
                false,
                format!("purpose={purpose}")
            );
            return Err(ApiError::internal());
        }
    };

    let message = templates::code_email(
        &state.config.app_name,
        email,
        purpose,
        &code,
        ttl.as_secs() / 60,
    );
    if let Err(e) = deliver(state.mailer.as_ref(), message, state.config.mail_timeout).await
    {
        warn!(error = %e, %purpose, "Verification code delivery failed");
        audit_log!(
            storage,
            client,
            Some(email),
            tags.email_error,
            false,
            format!("purpose={purpose} error={e}")
        );
        return Err(ApiError::bad_gateway(
            "Failed to send the email. Please try again.",
        ));
    }

    audit_log!(
        storage,
        client,
        Some(email),
        tags.sent,
        true,
        format!("purpose={purpose}")
    );
    Ok(())
}

/// Mint a general session for `user` and build the cookie response.
fn grant_session(
    state: &AppState,
    user: &StoredUser,
    message: &str,
) -> Result<SessionGrant, ApiError> {
    let (token, claims) = state.tokens.issue_session(user).map_err(|e| {
        error!(error = %e, "Failed to issue session token");
        ApiError::internal()
    })?;
    let principal = AuthenticatedUser::from_user(user, &claims);
    let cookie = session_cookie(
        &token,
        state.tokens.session_ttl(),
        state.config.auth.cookie_secure,
    );
    Ok((
        [(SET_COOKIE, cookie)],
        Json(SessionResponse {
            success: true,
            message: message.to_string(),
            expires_at: claims.exp,
            user: UserSummary::from(&principal),
        }),
    ))
}

/// Run Argon2 and store work on the blocking pool.
async fn blocking<T, F>(state: &AppState, client: &ClientInfo, work: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppState, &ClientInfo) -> T + Send + 'static,
    T: Send + 'static,
{
    let (state, client) = (state.clone(), client.clone());
    tokio::task::spawn_blocking(move || work(&state, &client))
        .await
        .map_err(|e| {
            error!(error = %e, "Blocking task failed");
            ApiError::internal()
        })
}

/// Consume a `purpose` code for `email` off the async workers.
async fn consume_code(
    state: &AppState,
    client: &ClientInfo,
    email: &str,
    code: &str,
    purpose: CodePurpose,
) -> Result<Result<(), CodeError>, ApiError> {
    let (email, code) = (email.to_string(), code.to_string());
    blocking(state, client, move |state, client| {
        VerificationCodeStore::new(&state.storage, &state.hasher, client).consume(
            &email,
            &code,
            purpose,
            state.config.auth.code_max_attempts,
        )
    })
    .await
}

/// Map a code-store rejection to a response with `status`.
fn code_rejection(err: CodeError, status: StatusCode) -> ApiError {
    match err {
        CodeError::Storage(e) => ApiError::from(e),
        other => ApiError::new(status, other.to_string()),
    }
}

fn invalid_email() -> ApiError {
    ApiError::bad_request("Invalid email address")
}

/// `None` if the address is blank.
fn subject(email: &str) -> Option<&str> {
    (!email.is_empty()).then_some(email)
}

// =============================================================================
// Registration
// =============================================================================

/// Send a registration code.
///
/// Fails for addresses that already have an account.
#[utoipa::path(
    post,
    path = "/v1/auth/register/code",
    tag = "Auth",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 400, description = "Invalid or already registered email"),
        (status = 429, description = "Rate limited"),
        (status = 502, description = "Email delivery failed")
    )
)]
pub async fn register_code(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);

    if !is_plausible_email(&email) {
        audit_log!(
            storage,
            &client,
            subject(&email),
            AuditAction::SendCodeInvalidEmail,
            false,
            "Invalid email"
        );
        return Err(invalid_email());
    }

    if UserRepository::new(storage).exists(&email)? {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::SendCodeExistingUser,
            false,
            "Email already registered"
        );
        return Err(ApiError::bad_request("Email is already registered"));
    }

    issue_and_deliver(
        &state,
        &client,
        &email,
        CodePurpose::Register,
        IssueTags {
            sent: AuditAction::SendCodeSuccess,
            email_error: AuditAction::SendCodeEmailError,
            error: AuditAction::SendCodeError,
        },
    )
    .await?;

    Ok(Json(MessageResponse::ok("Code sent to your email")))
}

/// Verify a registration code and open a session.
///
/// Creates the account on first success. The configured super-admin address
/// is created (or upgraded) as super-admin.
#[utoipa::path(
    post,
    path = "/v1/auth/register/verify",
    tag = "Auth",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Verified; session cookie set", body = SessionResponse),
        (status = 400, description = "Missing data or code rejected"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn register_verify(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<VerifyCodeRequest>,
) -> Result<SessionGrant, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);
    let code = request.code.trim();

    if email.is_empty() || code.is_empty() {
        audit_log!(
            storage,
            &client,
            subject(&email),
            AuditAction::VerifyCodeMissingData,
            false,
            "Missing email or code"
        );
        return Err(ApiError::bad_request("Missing data"));
    }
    if !is_plausible_email(&email) || !is_code_shaped(code) {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::VerifyCodeFailed,
            false,
            "Malformed email or code"
        );
        return Err(ApiError::bad_request("Invalid email or code format"));
    }

    let settings = &state.config.auth;
    if let Err(e) = consume_code(&state, &client, &email, code, CodePurpose::Register).await? {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::VerifyCodeFailed,
            false,
            format!("Verification failed: {e}")
        );
        return Err(code_rejection(e, StatusCode::BAD_REQUEST));
    }

    let (user, registration) = UserRepository::new(storage)
        .register_verified(&email, settings.super_admin_email.as_deref())?;
    match registration {
        Registration::Created => audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::UserRegistered
        ),
        Registration::SuperAdmin => audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::SuperAdminEstablished
        ),
        Registration::Existing => {}
    }

    audit_log!(
        storage,
        &client,
        Some(email.as_str()),
        AuditAction::VerifyCodeSuccess,
        true,
        "Code verified, session issued"
    );
    grant_session(&state, &user, "Code verified")
}

// =============================================================================
// Code login
// =============================================================================

/// Send a sign-in code to a registered address.
#[utoipa::path(
    post,
    path = "/v1/auth/login/code",
    tag = "Auth",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 400, description = "Missing or invalid email"),
        (status = 404, description = "Email not registered"),
        (status = 429, description = "Rate limited"),
        (status = 502, description = "Email delivery failed")
    )
)]
pub async fn login_code(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);

    if !is_plausible_email(&email) {
        audit_log!(
            storage,
            &client,
            subject(&email),
            AuditAction::LoginMissingEmail,
            false,
            "Missing or invalid email"
        );
        return Err(ApiError::bad_request("A valid email is required"));
    }

    if !UserRepository::new(storage).exists(&email)? {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::LoginUserNotFound,
            false,
            "Login attempt for unregistered email"
        );
        return Err(ApiError::not_found("Email is not registered"));
    }

    issue_and_deliver(
        &state,
        &client,
        &email,
        CodePurpose::Login,
        IssueTags {
            sent: AuditAction::LoginCodeSent,
            email_error: AuditAction::LoginCodeEmailError,
            error: AuditAction::LoginCodeError,
        },
    )
    .await?;

    Ok(Json(MessageResponse::ok("Sign-in code sent to your email")))
}

/// Verify a sign-in code and open a session.
#[utoipa::path(
    post,
    path = "/v1/auth/login/verify",
    tag = "Auth",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = SessionResponse),
        (status = 400, description = "Missing data or code rejected"),
        (status = 404, description = "Email not registered"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn login_verify(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<VerifyCodeRequest>,
) -> Result<SessionGrant, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);
    let code = request.code.trim();

    if !is_plausible_email(&email) || !is_code_shaped(code) {
        audit_log!(
            storage,
            &client,
            subject(&email),
            AuditAction::LoginCodeFailed,
            false,
            "Missing or malformed email or code"
        );
        return Err(ApiError::bad_request("Invalid email or code format"));
    }

    if let Err(e) = consume_code(&state, &client, &email, code, CodePurpose::Login).await? {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::LoginCodeFailed,
            false,
            format!("Verification failed: {e}")
        );
        return Err(code_rejection(e, StatusCode::BAD_REQUEST));
    }

    let Some(user) = UserRepository::new(storage).get_by_email(&email)? else {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::LoginUserNotFound,
            false,
            "Account missing after code verification"
        );
        return Err(ApiError::not_found("Email is not registered"));
    };

    audit_log!(
        storage,
        &client,
        Some(email.as_str()),
        AuditAction::LoginCodeSuccess
    );
    grant_session(&state, &user, "Signed in")
}

/// Report whether an address has an account and a PIN.
#[utoipa::path(
    post,
    path = "/v1/auth/check-user",
    tag = "Auth",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Account state", body = CheckUserResponse),
        (status = 400, description = "Invalid email"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn check_user(
    State(state): State<AppState>,
    Json(request): Json<EmailRequest>,
) -> Result<Json<CheckUserResponse>, ApiError> {
    let email = normalize_email(&request.email);
    if !is_plausible_email(&email) {
        return Err(invalid_email());
    }

    let user = UserRepository::new(&state.storage).get_by_email(&email)?;
    Ok(Json(CheckUserResponse {
        user_exists: user.is_some(),
        has_pin: user.as_ref().is_some_and(StoredUser::has_pin),
    }))
}

// =============================================================================
// PIN
// =============================================================================

/// Send a `create_pin` code to a registered user without a PIN.
#[utoipa::path(
    post,
    path = "/v1/auth/pin/code",
    tag = "PIN",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 400, description = "Invalid email or PIN already configured"),
        (status = 404, description = "User not found"),
        (status = 429, description = "Rate limited"),
        (status = 502, description = "Email delivery failed")
    )
)]
pub async fn pin_code(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);

    if !is_plausible_email(&email) {
        audit_log!(
            storage,
            &client,
            subject(&email),
            AuditAction::SendPinVerificationInvalidEmail,
            false,
            "Invalid email"
        );
        return Err(invalid_email());
    }

    let Some(user) = UserRepository::new(storage).get_by_email(&email)? else {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::SendPinVerificationUserNotFound,
            false,
            "User not found"
        );
        return Err(ApiError::not_found("User not found"));
    };

    if user.has_pin() {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::SendPinVerificationPinExists,
            false,
            "PIN already configured"
        );
        return Err(ApiError::bad_request("A PIN is already configured"));
    }

    issue_and_deliver(
        &state,
        &client,
        &email,
        CodePurpose::CreatePin,
        IssueTags {
            sent: AuditAction::SendPinVerificationSuccess,
            email_error: AuditAction::SendPinVerificationEmailError,
            error: AuditAction::SendPinVerificationError,
        },
    )
    .await?;

    Ok(Json(MessageResponse::ok("Code sent to your email")))
}

/// Phase 1 of PIN creation: consume the `create_pin` code.
#[utoipa::path(
    post,
    path = "/v1/auth/pin/verify",
    tag = "PIN",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Code accepted", body = MessageResponse),
        (status = 400, description = "Missing data or code rejected"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn pin_verify(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<VerifyCodeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);
    let code = request.code.trim();

    if !is_plausible_email(&email) || !is_code_shaped(code) {
        audit_log!(
            storage,
            &client,
            subject(&email),
            AuditAction::VerifyPinCodeMissingData,
            false,
            "Missing or malformed email or code"
        );
        return Err(ApiError::bad_request("Missing data"));
    }

    if let Err(e) = consume_code(&state, &client, &email, code, CodePurpose::CreatePin).await? {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::VerifyPinCodeFailed,
            false,
            format!("Verification failed: {e}")
        );
        return Err(code_rejection(e, StatusCode::BAD_REQUEST));
    }

    audit_log!(
        storage,
        &client,
        Some(email.as_str()),
        AuditAction::VerifyPinCodeSuccess
    );
    Ok(Json(MessageResponse::ok("Code verified")))
}

/// Result of trying to set a first PIN.
enum PinCreation {
    Created,
    AlreadySet,
    Rejected,
}

/// Phase 2 of PIN creation: re-check the consumed code and store the PIN.
#[utoipa::path(
    post,
    path = "/v1/auth/pin",
    tag = "PIN",
    request_body = CreatePinRequest,
    responses(
        (status = 200, description = "PIN created; session cookie set", body = SessionResponse),
        (status = 400, description = "Invalid PIN, failed verification or PIN exists"),
        (status = 404, description = "User not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_pin(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<CreatePinRequest>,
) -> Result<SessionGrant, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);
    let pin = request.pin.trim();
    let code = request.verification_code.trim();

    if email.is_empty() || pin.is_empty() {
        audit_log!(
            storage,
            &client,
            subject(&email),
            AuditAction::CreatePinInvalidFormat,
            false,
            "Missing email or PIN"
        );
        return Err(ApiError::bad_request("Email and PIN are required"));
    }
    if !is_valid_pin(pin) {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::CreatePinInvalidFormat,
            false,
            "PIN is not 4 digits"
        );
        return Err(ApiError::bad_request("PIN must be exactly 4 digits"));
    }
    if !is_code_shaped(code) {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::CreatePinInvalidVerification,
            false,
            "Missing or malformed verification code"
        );
        return Err(ApiError::bad_request("Verification code is required"));
    }

    let confirmed = {
        let (email, code) = (email.clone(), code.to_string());
        blocking(&state, &client, move |state, client| {
            VerificationCodeStore::new(&state.storage, &state.hasher, client).confirm_used(
                &email,
                code.as_str(),
                CodePurpose::CreatePin,
            )
        })
        .await??
    };
    if !confirmed {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::CreatePinInvalidVerification,
            false,
            "Verification code not confirmed"
        );
        return Err(ApiError::bad_request("Security verification required"));
    }

    let updated = {
        let (email, pin) = (email.clone(), pin.to_string());
        blocking(&state, &client, move |state, _| {
            let mut outcome = PinCreation::AlreadySet;
            let updated = UserRepository::new(&state.storage).modify(&email, |user| {
                if user.has_pin() {
                    return Ok(false);
                }
                let set = user.set_pin(&state.hasher, &pin)?;
                outcome = if set {
                    PinCreation::Created
                } else {
                    PinCreation::Rejected
                };
                Ok(set)
            });
            updated.map(|found| found.map(|user| (user, outcome)))
        })
        .await?
    };

    let (user, outcome) = match updated {
        Ok(Some(found)) => found,
        Ok(None) => {
            audit_log!(
                storage,
                &client,
                Some(email.as_str()),
                AuditAction::CreatePinError,
                false,
                "User not found"
            );
            return Err(ApiError::not_found("User not found"));
        }
        Err(e) => {
            audit_log!(
                storage,
                &client,
                Some(email.as_str()),
                AuditAction::CreatePinError,
                false,
                "Failed to store PIN"
            );
            return Err(e.into());
        }
    };

    match outcome {
        PinCreation::Created => {
            audit_log!(
                storage,
                &client,
                Some(email.as_str()),
                AuditAction::CreatePinSuccess,
                true,
                "PIN created with verification"
            );
            grant_session(&state, &user, "PIN created")
        }
        PinCreation::AlreadySet => {
            audit_log!(
                storage,
                &client,
                Some(email.as_str()),
                AuditAction::CreatePinExists,
                false,
                "PIN already configured"
            );
            Err(ApiError::bad_request("A PIN is already configured"))
        }
        PinCreation::Rejected => {
            audit_log!(
                storage,
                &client,
                Some(email.as_str()),
                AuditAction::CreatePinInvalidFormat,
                false,
                "PIN rejected"
            );
            Err(ApiError::bad_request("PIN must be exactly 4 digits"))
        }
    }
}

/// Sign in with email and PIN.
#[utoipa::path(
    post,
    path = "/v1/auth/pin/login",
    tag = "PIN",
    request_body = PinLoginRequest,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = SessionResponse),
        (status = 400, description = "Missing data or no PIN configured"),
        (status = 401, description = "Incorrect PIN"),
        (status = 404, description = "User not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn pin_login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<PinLoginRequest>,
) -> Result<SessionGrant, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);
    let pin = request.pin.trim();

    let deny = |details: &str| {
        audit_log!(
            storage,
            &client,
            subject(&email),
            AuditAction::LoginPinFailed,
            false,
            details.to_string()
        );
    };

    if email.is_empty() || pin.is_empty() {
        deny("Missing email or PIN");
        return Err(ApiError::bad_request("Email and PIN are required"));
    }

    let Some(user) = UserRepository::new(storage).get_by_email(&email)? else {
        deny("User not found");
        return Err(ApiError::not_found("User not found"));
    };
    if !user.has_pin() {
        deny("No PIN configured");
        return Err(ApiError::bad_request("No PIN is configured for this account"));
    }
    let pin_matches = {
        let (user, pin) = (user.clone(), pin.to_string());
        blocking(&state, &client, move |state, _| user.verify_pin(&state.hasher, &pin)).await?
    };
    if !pin_matches {
        deny("Incorrect PIN");
        return Err(ApiError::unauthorized("Incorrect PIN"));
    }

    audit_log!(
        storage,
        &client,
        Some(email.as_str()),
        AuditAction::LoginPinSuccess
    );
    grant_session(&state, &user, "Signed in")
}

/// Send a `reset_pin` code to a registered user.
#[utoipa::path(
    post,
    path = "/v1/auth/pin/reset/code",
    tag = "PIN",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 400, description = "Invalid email"),
        (status = 404, description = "User not found"),
        (status = 429, description = "Rate limited"),
        (status = 502, description = "Email delivery failed")
    )
)]
pub async fn pin_reset_code(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);

    if !is_plausible_email(&email) {
        audit_log!(
            storage,
            &client,
            subject(&email),
            AuditAction::ResetPinMissingData,
            false,
            "Invalid email"
        );
        return Err(invalid_email());
    }

    if !UserRepository::new(storage).exists(&email)? {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::ResetPinUserNotFound,
            false,
            "User not found"
        );
        return Err(ApiError::not_found("User not found"));
    }

    issue_and_deliver(
        &state,
        &client,
        &email,
        CodePurpose::ResetPin,
        IssueTags {
            sent: AuditAction::ResetPinCodeSent,
            email_error: AuditAction::ResetPinCodeEmailError,
            error: AuditAction::ResetPinError,
        },
    )
    .await?;

    Ok(Json(MessageResponse::ok("Reset code sent to your email")))
}

/// Consume a `reset_pin` code and overwrite the PIN.
#[utoipa::path(
    post,
    path = "/v1/auth/pin/reset",
    tag = "PIN",
    request_body = ResetPinRequest,
    responses(
        (status = 200, description = "PIN updated", body = MessageResponse),
        (status = 400, description = "Missing data or invalid PIN"),
        (status = 401, description = "Code rejected"),
        (status = 404, description = "User not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn pin_reset(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<ResetPinRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let storage = state.storage.as_ref();
    let email = normalize_email(&request.email);
    let code = request.code.trim();
    let new_pin = request.new_pin.trim();

    if email.is_empty() || code.is_empty() || new_pin.is_empty() {
        audit_log!(
            storage,
            &client,
            subject(&email),
            AuditAction::ResetPinMissingData,
            false,
            "Missing email, code or PIN"
        );
        return Err(ApiError::bad_request("Email, code and new PIN are required"));
    }
    if !is_valid_pin(new_pin) {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::ResetPinInvalidFormat,
            false,
            "PIN is not 4 digits"
        );
        return Err(ApiError::bad_request("PIN must be exactly 4 digits"));
    }
    if !is_code_shaped(code) {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::ResetPinInvalidCode,
            false,
            "Malformed code"
        );
        return Err(ApiError::unauthorized("Invalid code format"));
    }

    if let Err(e) = consume_code(&state, &client, &email, code, CodePurpose::ResetPin).await? {
        audit_log!(
            storage,
            &client,
            Some(email.as_str()),
            AuditAction::ResetPinInvalidCode,
            false,
            format!("Invalid code: {e}")
        );
        return Err(code_rejection(e, StatusCode::UNAUTHORIZED));
    }

    let updated = {
        let (email, new_pin) = (email.clone(), new_pin.to_string());
        blocking(&state, &client, move |state, _| {
            UserRepository::new(&state.storage)
                .modify(&email, |user| Ok(user.set_pin(&state.hasher, &new_pin)?))
        })
        .await?
    };
    match updated {
        Ok(Some(_)) => {
            audit_log!(
                storage,
                &client,
                Some(email.as_str()),
                AuditAction::ResetPinSuccess
            );
            Ok(Json(MessageResponse::ok("PIN updated")))
        }
        Ok(None) => {
            audit_log!(
                storage,
                &client,
                Some(email.as_str()),
                AuditAction::ResetPinUserNotFound,
                false,
                "User not found"
            );
            Err(ApiError::not_found("User not found"))
        }
        Err(e) => {
            audit_log!(
                storage,
                &client,
                Some(email.as_str()),
                AuditAction::ResetPinError,
                false,
                "Failed to update PIN"
            );
            Err(ApiError::from(e))
        }
    }
}

// =============================================================================
// Logout
// =============================================================================

/// Clear the session cookie.
///
/// Tokens are stateless; a copy of the token stays valid until it expires.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    responses(
        (status = 200, description = "Session cookie cleared", body = MessageResponse),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    client: ClientInfo,
    headers: HeaderMap,
) -> WithCookie<MessageResponse> {
    let email = token_from_headers(&headers)
        .and_then(|token| state.tokens.verify(&token, None).ok())
        .map(|claims| claims.email);
    audit_log!(
        state.storage.as_ref(),
        &client,
        email.as_deref(),
        AuditAction::Logout
    );
    (
        [(
            SET_COOKIE,
            clear_session_cookie(state.config.auth.cookie_secure),
        )],
        Json(MessageResponse::ok("Signed out")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AuditRepository, UserStatus};
    use crate::test_support::{test_state, TestContext, SUPER_ADMIN};

    fn client() -> ClientInfo {
        ClientInfo {
            address: "198.51.100.4".to_string(),
            user_agent: Some("tests".to_string()),
        }
    }

    fn email_body(email: &str) -> Json<EmailRequest> {
        Json(EmailRequest {
            email: email.to_string(),
        })
    }

    fn code_body(email: &str, code: &str) -> Json<VerifyCodeRequest> {
        Json(VerifyCodeRequest {
            email: email.to_string(),
            code: code.to_string(),
        })
    }

    fn actions(ctx: &TestContext, email: &str) -> Vec<AuditAction> {
        AuditRepository::new(&ctx.state.storage)
            .query(Some(email), 1, 100)
            .unwrap()
            .events
            .into_iter()
            .map(|e| e.action)
            .collect()
    }

    /// Session token carried by a `Set-Cookie` value.
    fn cookie_token(cookie: &str) -> &str {
        cookie
            .strip_prefix("token=")
            .and_then(|rest| rest.split(';').next())
            .unwrap()
    }

    /// A code different from `code` in every digit.
    fn wrong(code: &str) -> String {
        code.bytes()
            .map(|b| char::from(b'0' + (b - b'0' + 1) % 10))
            .collect()
    }

    async fn register(ctx: &TestContext, email: &str) -> SessionGrant {
        register_code(State(ctx.state.clone()), client(), email_body(email))
            .await
            .unwrap();
        let code = ctx.mailer.last_code_for(&normalize_email(email)).unwrap();
        register_verify(State(ctx.state.clone()), client(), code_body(email, &code))
            .await
            .unwrap()
    }

    async fn register_with_pin(ctx: &TestContext, email: &str, pin: &str) {
        register(ctx, email).await;
        pin_code(State(ctx.state.clone()), client(), email_body(email))
            .await
            .unwrap();
        let code = ctx.mailer.last_code_for(email).unwrap();
        pin_verify(State(ctx.state.clone()), client(), code_body(email, &code))
            .await
            .unwrap();
        create_pin(
            State(ctx.state.clone()),
            client(),
            Json(CreatePinRequest {
                email: email.to_string(),
                pin: pin.to_string(),
                verification_code: code,
            }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn registration_issues_session_cookie() {
        let ctx = test_state();
        let ([(name, cookie)], Json(body)) = register(&ctx, " New@Example.com ").await;

        assert_eq!(name, SET_COOKIE);
        let token = cookie_token(&cookie);
        assert!(!token.is_empty());
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert_eq!(body.user.email, "new@example.com");
        assert_eq!(body.user.status, UserStatus::Pending);

        let claims = ctx.state.tokens.verify(token, None).unwrap();
        assert_eq!(claims.exp, body.expires_at);
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("token").is_none());
        assert_eq!(claims.email, "new@example.com");

        let log = actions(&ctx, "new@example.com");
        assert!(log.contains(&AuditAction::SendCodeSuccess));
        assert!(log.contains(&AuditAction::UserRegistered));
        assert!(log.contains(&AuditAction::VerifyCodeSuccess));
    }

    #[tokio::test]
    async fn invalid_email_never_reaches_the_store() {
        let ctx = test_state();
        let err = register_code(State(ctx.state.clone()), client(), email_body("not-an-email"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(ctx.mailer.sent().is_empty());
        assert_eq!(
            actions(&ctx, "not-an-email"),
            vec![AuditAction::SendCodeInvalidEmail]
        );
    }

    #[tokio::test]
    async fn registered_email_cannot_request_registration_code() {
        let ctx = test_state();
        register(&ctx, "taken@example.com").await;
        let err = register_code(
            State(ctx.state.clone()),
            client(),
            email_body("taken@example.com"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(actions(&ctx, "taken@example.com").contains(&AuditAction::SendCodeExistingUser));
    }

    #[tokio::test]
    async fn delivery_failure_is_502_and_code_stays_issued() {
        let ctx = test_state();
        ctx.mailer.fail_next(true);
        let err = register_code(
            State(ctx.state.clone()),
            client(),
            email_body("slow@example.com"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);

        let client = client();
        let store = VerificationCodeStore::new(&ctx.state.storage, &ctx.state.hasher, &client);
        assert!(store
            .find("slow@example.com", CodePurpose::Register)
            .unwrap()
            .is_some());
        assert!(actions(&ctx, "slow@example.com").contains(&AuditAction::SendCodeEmailError));
    }

    #[tokio::test]
    async fn delivery_timeout_is_502() {
        let ctx = test_state();
        ctx.mailer.hang(true);
        let err = register_code(
            State(ctx.state.clone()),
            client(),
            email_body("hang@example.com"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn wrong_code_reports_remaining_attempts() {
        let ctx = test_state();
        let email = "retry@example.com";
        register_code(State(ctx.state.clone()), client(), email_body(email))
            .await
            .unwrap();
        let code = ctx.mailer.last_code_for(email).unwrap();

        let err = register_verify(
            State(ctx.state.clone()),
            client(),
            code_body(email, &wrong(&code)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Incorrect code. Attempts remaining: 2");

        let ok = register_verify(State(ctx.state.clone()), client(), code_body(email, &code)).await;
        assert!(ok.is_ok());

        let replay = register_verify(State(ctx.state.clone()), client(), code_body(email, &code))
            .await
            .unwrap_err();
        assert_eq!(replay.message, "Code expired or not found");
    }

    #[tokio::test]
    async fn super_admin_is_established_on_first_verification() {
        let ctx = test_state();
        let (_, Json(body)) = register(&ctx, SUPER_ADMIN).await;
        assert!(body.user.is_super_admin);
        assert_eq!(body.user.status, UserStatus::Active);
        assert!(actions(&ctx, SUPER_ADMIN).contains(&AuditAction::SuperAdminEstablished));
    }

    #[tokio::test]
    async fn login_code_flow() {
        let ctx = test_state();
        let err = login_code(
            State(ctx.state.clone()),
            client(),
            email_body("ghost@example.com"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        register(&ctx, "member@example.com").await;
        login_code(
            State(ctx.state.clone()),
            client(),
            email_body("member@example.com"),
        )
        .await
        .unwrap();
        let code = ctx.mailer.last_code_for("member@example.com").unwrap();
        let (_, Json(body)) = login_verify(
            State(ctx.state.clone()),
            client(),
            code_body("member@example.com", &code),
        )
        .await
        .unwrap();
        assert_eq!(body.user.email, "member@example.com");
        assert!(actions(&ctx, "member@example.com").contains(&AuditAction::LoginCodeSuccess));
    }

    #[tokio::test]
    async fn check_user_reports_pin_presence() {
        let ctx = test_state();
        let Json(none) = check_user(State(ctx.state.clone()), email_body("x@example.com"))
            .await
            .unwrap();
        assert_eq!(
            none,
            CheckUserResponse {
                user_exists: false,
                has_pin: false
            }
        );

        register_with_pin(&ctx, "pin@example.com", "0042").await;
        let Json(found) = check_user(State(ctx.state.clone()), email_body("pin@example.com"))
            .await
            .unwrap();
        assert!(found.user_exists);
        assert!(found.has_pin);
    }

    #[tokio::test]
    async fn pin_creation_requires_the_consumed_code() {
        let ctx = test_state();
        let email = "two-phase@example.com";
        register(&ctx, email).await;
        pin_code(State(ctx.state.clone()), client(), email_body(email))
            .await
            .unwrap();
        let code = ctx.mailer.last_code_for(email).unwrap();

        let request = |verification_code: &str| {
            Json(CreatePinRequest {
                email: email.to_string(),
                pin: "1234".to_string(),
                verification_code: verification_code.to_string(),
            })
        };

        // Phase 2 before phase 1
        let err = create_pin(State(ctx.state.clone()), client(), request(&code))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Security verification required");

        pin_verify(State(ctx.state.clone()), client(), code_body(email, &code))
            .await
            .unwrap();

        let err = create_pin(State(ctx.state.clone()), client(), request(&wrong(&code)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let (_, Json(body)) = create_pin(State(ctx.state.clone()), client(), request(&code))
            .await
            .unwrap();
        assert!(body.user.has_pin);

        let err = create_pin(State(ctx.state.clone()), client(), request(&code))
            .await
            .unwrap_err();
        assert_eq!(err.message, "A PIN is already configured");
        assert!(actions(&ctx, email).contains(&AuditAction::CreatePinExists));
    }

    #[tokio::test]
    async fn create_pin_rejects_bad_format_before_store() {
        let ctx = test_state();
        let err = create_pin(
            State(ctx.state.clone()),
            client(),
            Json(CreatePinRequest {
                email: "a@example.com".to_string(),
                pin: "12a4".to_string(),
                verification_code: "123456".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.message, "PIN must be exactly 4 digits");
        assert_eq!(
            actions(&ctx, "a@example.com"),
            vec![AuditAction::CreatePinInvalidFormat]
        );
    }

    #[tokio::test]
    async fn pin_login_checks_pin() {
        let ctx = test_state();
        register_with_pin(&ctx, "pinner@example.com", "9876").await;

        let login = |pin: &str| {
            pin_login(
                State(ctx.state.clone()),
                client(),
                Json(PinLoginRequest {
                    email: "pinner@example.com".to_string(),
                    pin: pin.to_string(),
                }),
            )
        };

        let err = login("1111").await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert!(login("9876").await.is_ok());

        let log = actions(&ctx, "pinner@example.com");
        assert!(log.contains(&AuditAction::LoginPinFailed));
        assert!(log.contains(&AuditAction::LoginPinSuccess));
    }

    #[tokio::test]
    async fn pin_reset_overwrites_pin() {
        let ctx = test_state();
        let email = "reset@example.com";
        register_with_pin(&ctx, email, "1234").await;

        pin_reset_code(State(ctx.state.clone()), client(), email_body(email))
            .await
            .unwrap();
        let code = ctx.mailer.last_code_for(email).unwrap();

        let reset = |code: String| {
            pin_reset(
                State(ctx.state.clone()),
                client(),
                Json(ResetPinRequest {
                    email: email.to_string(),
                    code,
                    new_pin: "5678".to_string(),
                }),
            )
        };

        let err = reset(wrong(&code)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        reset(code).await.unwrap();

        let user = UserRepository::new(&ctx.state.storage)
            .get_by_email(email)
            .unwrap()
            .unwrap();
        assert!(user.verify_pin(&ctx.state.hasher, "5678"));
        assert!(!user.verify_pin(&ctx.state.hasher, "1234"));
        assert!(actions(&ctx, email).contains(&AuditAction::ResetPinSuccess));
    }

    #[tokio::test]
    async fn logout_clears_cookie_and_audits_subject() {
        let ctx = test_state();
        let ([(_, set_cookie)], _) = register(&ctx, "bye@example.com").await;

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            format!("token={}", cookie_token(&set_cookie))
                .parse()
                .unwrap(),
        );
        let ([(_, cookie)], Json(body)) =
            logout(State(ctx.state.clone()), client(), headers).await;
        assert!(body.success);
        assert!(cookie.contains("Max-Age=0"));
        assert!(actions(&ctx, "bye@example.com").contains(&AuditAction::Logout));
    }
}
