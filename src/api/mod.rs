// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info_span, Span};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{cookie::SESSION_COOKIE, Role},
    models::{
        AccessCheckResponse, AccessDecisionRequest, AccessDecisionResponse, AuditLogResponse,
        CheckUserResponse, CreatePinRequest, Decision, EmailRequest, MeResponse, MessageResponse,
        PinLoginRequest, ResetPinRequest, SessionResponse, UserSummary, VerifyCodeRequest,
        WebsocketStatusResponse, WebsocketTokenResponse, WebsocketVerifyRequest,
        WebsocketVerifyResponse,
    },
    rate_limit::{limited, RateLimitedOp},
    state::AppState,
    storage::{AuditAction, AuditEvent, UserStatus},
};

pub mod access;
pub mod admin;
pub mod auth;
pub mod health;
pub mod users;
pub mod websocket;

/// Build the application router.
///
/// Every `/v1` route carries its own rate-limit layer, which runs before the
/// route's extractors.
pub fn router(state: AppState) -> Router {
    use RateLimitedOp as Op;

    let v1_routes = Router::new()
        .route(
            "/auth/register/code",
            limited(&state, Op::RegisterCode, post(auth::register_code)),
        )
        .route(
            "/auth/register/verify",
            limited(&state, Op::RegisterVerify, post(auth::register_verify)),
        )
        .route(
            "/auth/login/code",
            limited(&state, Op::LoginCode, post(auth::login_code)),
        )
        .route(
            "/auth/login/verify",
            limited(&state, Op::LoginVerify, post(auth::login_verify)),
        )
        .route(
            "/auth/check-user",
            limited(&state, Op::CheckUser, post(auth::check_user)),
        )
        .route(
            "/auth/pin/code",
            limited(&state, Op::PinCode, post(auth::pin_code)),
        )
        .route(
            "/auth/pin/verify",
            limited(&state, Op::PinVerify, post(auth::pin_verify)),
        )
        .route(
            "/auth/pin",
            limited(&state, Op::PinCreate, post(auth::create_pin)),
        )
        .route(
            "/auth/pin/login",
            limited(&state, Op::PinLogin, post(auth::pin_login)),
        )
        .route(
            "/auth/pin/reset/code",
            limited(&state, Op::PinResetCode, post(auth::pin_reset_code)),
        )
        .route(
            "/auth/pin/reset",
            limited(&state, Op::PinReset, post(auth::pin_reset)),
        )
        .route(
            "/auth/logout",
            limited(&state, Op::Logout, post(auth::logout)),
        )
        .route(
            "/users/me",
            limited(&state, Op::Profile, get(users::get_current_user)),
        )
        .route(
            "/access/{area}",
            limited(&state, Op::AccessCheck, get(access::check_access)),
        )
        .route(
            "/websocket/auth",
            limited(&state, Op::WebsocketAuth, post(websocket::websocket_auth)),
        )
        .route(
            "/websocket/verify",
            limited(&state, Op::WebsocketVerify, post(websocket::websocket_verify)),
        )
        .route(
            "/websocket/status",
            limited(&state, Op::WebsocketStatus, get(websocket::websocket_status)),
        )
        .route(
            "/security/audit-log",
            limited(&state, Op::AuditLog, get(admin::get_audit_log)),
        )
        .route(
            "/admin/access-decisions",
            limited(&state, Op::AccessDecision, post(admin::access_decision)),
        );

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(CorsLayer::permissive()),
        )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

struct SessionCookieScheme;

impl Modify for SessionCookieScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(SESSION_COOKIE))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::register_code,
        auth::register_verify,
        auth::login_code,
        auth::login_verify,
        auth::check_user,
        auth::pin_code,
        auth::pin_verify,
        auth::create_pin,
        auth::pin_login,
        auth::pin_reset_code,
        auth::pin_reset,
        auth::logout,
        users::get_current_user,
        access::check_access,
        websocket::websocket_auth,
        websocket::websocket_verify,
        websocket::websocket_status,
        admin::get_audit_log,
        admin::access_decision
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            EmailRequest,
            VerifyCodeRequest,
            MessageResponse,
            SessionResponse,
            CheckUserResponse,
            CreatePinRequest,
            PinLoginRequest,
            ResetPinRequest,
            UserSummary,
            MeResponse,
            AccessCheckResponse,
            WebsocketTokenResponse,
            WebsocketVerifyRequest,
            WebsocketVerifyResponse,
            WebsocketStatusResponse,
            AuditLogResponse,
            AuditEvent,
            AuditAction,
            Decision,
            AccessDecisionRequest,
            AccessDecisionResponse,
            Role,
            UserStatus
        )
    ),
    modifiers(&SessionCookieScheme),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Verification codes and sessions"),
        (name = "PIN", description = "PIN creation, sign-in and reset"),
        (name = "Users", description = "Current user"),
        (name = "Access", description = "Content area access checks"),
        (name = "WebSocket", description = "Feed handoff tokens"),
        (name = "Admin", description = "Audit log and access decisions")
    )
)]
struct ApiDoc;
