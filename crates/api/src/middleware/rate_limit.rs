//! Per-client admission control.
//!
//! Every request is counted against its client's fixed window before it
//! reaches a handler. Over the limit, the client gets 429 with
//! `{"error": "Too many requests"}` and a `Retry-After` of one window.
//!
//! The client is identified by address, taken from proxy headers first:
//! 1. First `X-Forwarded-For` entry that is not empty or `unknown`
//! 2. `X-Real-IP`, unless empty or `unknown`
//! 3. The peer address of the connection

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::AppError, state::AppState};

const UNKNOWN_CLIENT: &str = "unknown";

fn usable(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty() && !value.eq_ignore_ascii_case(UNKNOWN_CLIENT)).then_some(value)
}

/// Effective client address for rate limiting.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|list| list.split(',').find_map(usable));
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(usable);
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), peer);

    let limiter = &state.stores.rate_limiter;
    if !limiter.check(&identity).await.is_allowed() {
        return AppError::RateLimited {
            retry_after: limiter.policy().window,
        }
        .into_response();
    }

    next.run(request).await
}
