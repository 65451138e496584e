// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request origin (client address and user agent).
//!
//! The address keys rate-limit buckets and is recorded on audit entries. It is
//! the socket peer unless that peer is a configured trusted proxy; only then
//! are `X-Forwarded-For` (rightmost untrusted hop) and `X-Real-IP` consulted.
//! Without a peer address the origin is `"unknown"`.

use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header::USER_AGENT, request::Parts, Extensions, HeaderMap},
};

use crate::state::AppState;

/// Address used when no source is available.
pub const UNKNOWN_ADDRESS: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub address: String,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_request(
        headers: &HeaderMap,
        extensions: &Extensions,
        trusted_proxies: &[IpAddr],
    ) -> Self {
        let peer = extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let address = match peer {
            Some(peer) if trusted_proxies.contains(&peer) => {
                forwarded_origin(headers, trusted_proxies).unwrap_or(peer)
            }
            Some(peer) => peer,
            None => {
                return Self {
                    address: UNKNOWN_ADDRESS.to_string(),
                    user_agent: user_agent(headers),
                }
            }
        };

        Self {
            address: address.to_string(),
            user_agent: user_agent(headers),
        }
    }

    /// Origin for work not tied to a request.
    pub fn internal() -> Self {
        Self {
            address: "internal".to_string(),
            user_agent: None,
        }
    }
}

/// Client address reported by a trusted proxy.
///
/// Hops are read right to left and trusted proxies skipped, so a value the
/// client prepended itself is never chosen over one a proxy appended.
fn forwarded_origin(headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.rsplit(',')
                .map(|hop| hop.trim().parse::<IpAddr>())
                .take_while(Result::is_ok)
                .flatten()
                .find(|ip| !trusted_proxies.contains(ip))
        });

    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl FromRequestParts<AppState> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::from_request(
            &parts.headers,
            &parts.extensions,
            &state.config.trusted_proxies,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const PROXY: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));

    fn from_peer(peer: [u8; 4]) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from((peer, 4000))));
        extensions
    }

    fn spoofed_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.8"));
        headers
    }

    #[test]
    fn untrusted_peer_ignores_proxy_headers() {
        let info =
            ClientInfo::from_request(&spoofed_headers(), &from_peer([192, 0, 2, 50]), &[PROXY]);
        assert_eq!(info.address, "192.0.2.50");
    }

    #[test]
    fn trusted_proxy_reports_rightmost_untrusted_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 198.51.100.9, 10.0.0.1"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.0"));
        let info = ClientInfo::from_request(&headers, &from_peer([10, 0, 0, 1]), &[PROXY]);
        assert_eq!(info.address, "198.51.100.9");
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn trusted_proxy_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        let info = ClientInfo::from_request(&headers, &from_peer([10, 0, 0, 1]), &[PROXY]);
        assert_eq!(info.address, "198.51.100.4");

        let info =
            ClientInfo::from_request(&HeaderMap::new(), &from_peer([10, 0, 0, 1]), &[PROXY]);
        assert_eq!(info.address, "10.0.0.1");
    }

    #[test]
    fn missing_peer_is_unknown() {
        let info = ClientInfo::from_request(&spoofed_headers(), &Extensions::new(), &[PROXY]);
        assert_eq!(info.address, UNKNOWN_ADDRESS);
    }
}
