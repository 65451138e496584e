// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-client request rate limiting.
//!
//! Each (operation, client address) pair owns one fixed window per rule of
//! the operation. A request is admitted only if every window has room; then
//! every window is charged. A rejected request charges nothing.
//!
//! Buckets are keyed on the resolved client address, which is the socket
//! peer unless the peer is a trusted proxy (see [`crate::client`]).
//!
//! The limiter is applied as a per-route layer, so it runs before any
//! extractor (authentication, JSON body) and before the handler starts slow
//! work such as mail delivery.

use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use lru::LruCache;
use tracing::warn;

use crate::audit_log;
use crate::client::ClientInfo;
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::AuditAction;

/// One fixed-window rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: u32,
    pub period: Duration,
}

const fn per_minute(limit: u32) -> Window {
    Window {
        limit,
        period: Duration::from_secs(60),
    }
}

const fn per_hour(limit: u32) -> Window {
    Window {
        limit,
        period: Duration::from_secs(3600),
    }
}

const fn per_day(limit: u32) -> Window {
    Window {
        limit,
        period: Duration::from_secs(86_400),
    }
}

/// Applied to routes without a dedicated rule.
const DEFAULT_WINDOWS: &[Window] = &[per_hour(50), per_day(200)];
const REGISTER_CODE_WINDOWS: &[Window] = &[per_minute(5), per_hour(10)];
const FIVE_PER_MINUTE: &[Window] = &[per_minute(5)];
const TEN_PER_MINUTE: &[Window] = &[per_minute(10)];
const FIFTEEN_PER_MINUTE: &[Window] = &[per_minute(15)];
const TWENTY_PER_MINUTE: &[Window] = &[per_minute(20)];
const THIRTY_PER_MINUTE: &[Window] = &[per_minute(30)];
const SIXTY_PER_MINUTE: &[Window] = &[per_minute(60)];
const HUNDRED_PER_MINUTE: &[Window] = &[per_minute(100)];

/// Rate-limited operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitedOp {
    RegisterCode,
    RegisterVerify,
    LoginCode,
    LoginVerify,
    CheckUser,
    PinCode,
    PinVerify,
    PinCreate,
    PinLogin,
    PinResetCode,
    PinReset,
    Logout,
    Profile,
    AccessCheck,
    WebsocketAuth,
    WebsocketVerify,
    WebsocketStatus,
    AuditLog,
    AccessDecision,
}

impl RateLimitedOp {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitedOp::RegisterCode => "register_code",
            RateLimitedOp::RegisterVerify => "register_verify",
            RateLimitedOp::LoginCode => "login_code",
            RateLimitedOp::LoginVerify => "login_verify",
            RateLimitedOp::CheckUser => "check_user",
            RateLimitedOp::PinCode => "pin_code",
            RateLimitedOp::PinVerify => "pin_verify",
            RateLimitedOp::PinCreate => "pin_create",
            RateLimitedOp::PinLogin => "pin_login",
            RateLimitedOp::PinResetCode => "pin_reset_code",
            RateLimitedOp::PinReset => "pin_reset",
            RateLimitedOp::Logout => "logout",
            RateLimitedOp::Profile => "profile",
            RateLimitedOp::AccessCheck => "access_check",
            RateLimitedOp::WebsocketAuth => "websocket_auth",
            RateLimitedOp::WebsocketVerify => "websocket_verify",
            RateLimitedOp::WebsocketStatus => "websocket_status",
            RateLimitedOp::AuditLog => "audit_log",
            RateLimitedOp::AccessDecision => "access_decision",
        }
    }

    /// Windows enforced for this operation.
    pub fn windows(self) -> &'static [Window] {
        match self {
            RateLimitedOp::RegisterCode => REGISTER_CODE_WINDOWS,
            RateLimitedOp::RegisterVerify
            | RateLimitedOp::LoginCode
            | RateLimitedOp::LoginVerify
            | RateLimitedOp::PinVerify
            | RateLimitedOp::PinCreate
            | RateLimitedOp::AuditLog => TEN_PER_MINUTE,
            RateLimitedOp::CheckUser => TWENTY_PER_MINUTE,
            RateLimitedOp::PinCode | RateLimitedOp::PinResetCode | RateLimitedOp::PinReset => {
                FIVE_PER_MINUTE
            }
            RateLimitedOp::PinLogin => FIFTEEN_PER_MINUTE,
            RateLimitedOp::WebsocketAuth => THIRTY_PER_MINUTE,
            RateLimitedOp::WebsocketVerify => HUNDRED_PER_MINUTE,
            RateLimitedOp::WebsocketStatus => SIXTY_PER_MINUTE,
            RateLimitedOp::Logout
            | RateLimitedOp::Profile
            | RateLimitedOp::AccessCheck
            | RateLimitedOp::AccessDecision => DEFAULT_WINDOWS,
        }
    }
}

/// Rejection with the time until the longest exhausted window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started: Instant,
    count: u32,
}

/// Fixed-window counters in a bounded LRU map.
///
/// When capacity is reached the least recently used key is evicted, which
/// resets its counters.
pub struct RateLimiter {
    buckets: Mutex<LruCache<(RateLimitedOp, String), Vec<WindowState>>>,
}

impl RateLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            buckets: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn check(&self, op: RateLimitedOp, address: &str) -> Result<(), RateLimitExceeded> {
        self.check_at(op, address, Instant::now())
    }

    /// Check-and-charge against an explicit clock.
    pub fn check_at(
        &self,
        op: RateLimitedOp,
        address: &str,
        now: Instant,
    ) -> Result<(), RateLimitExceeded> {
        let windows = op.windows();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let states = buckets.get_or_insert_mut((op, address.to_string()), || {
            vec![
                WindowState {
                    started: now,
                    count: 0
                };
                windows.len()
            ]
        });

        for (state, window) in states.iter_mut().zip(windows) {
            if now.saturating_duration_since(state.started) >= window.period {
                state.started = now;
                state.count = 0;
            }
        }

        let retry_after = states
            .iter()
            .zip(windows)
            .filter(|(state, window)| state.count >= window.limit)
            .map(|(state, window)| {
                window
                    .period
                    .saturating_sub(now.saturating_duration_since(state.started))
            })
            .max();

        if let Some(retry_after) = retry_after {
            return Err(RateLimitExceeded { retry_after });
        }

        for state in states.iter_mut() {
            state.count += 1;
        }
        Ok(())
    }
}

// =============================================================================
// Route Layer
// =============================================================================

/// State for the per-route limiter layer.
#[derive(Clone)]
pub struct RateGuard {
    state: AppState,
    op: RateLimitedOp,
}

/// Middleware: 429 with `Retry-After` once any window is exhausted.
pub async fn enforce(State(guard): State<RateGuard>, request: Request, next: Next) -> Response {
    let client = ClientInfo::from_request(
        request.headers(),
        request.extensions(),
        &guard.state.config.trusted_proxies,
    );
    match guard.state.limiter.check(guard.op, &client.address) {
        Ok(()) => next.run(request).await,
        Err(exceeded) => {
            warn!(
                op = guard.op.as_str(),
                address = %client.address,
                retry_after_secs = exceeded.retry_after.as_secs(),
                "Rate limit exceeded"
            );
            audit_log!(
                guard.state.storage.as_ref(),
                &client,
                None,
                AuditAction::RateLimitExceeded,
                false,
                format!("op={} path={}", guard.op.as_str(), request.uri().path())
            );
            ApiError::too_many_requests(exceeded.retry_after).into_response()
        }
    }
}

/// Wrap a route with the limiter for `op`.
pub fn limited(
    state: &AppState,
    op: RateLimitedOp,
    route: MethodRouter<AppState>,
) -> MethodRouter<AppState> {
    route.layer(middleware::from_fn_with_state(
        RateGuard {
            state: state.clone(),
            op,
        },
        enforce,
    ))
}
