//! Shared-state coordination layer of the course evaluation backend.
//!
//! Request-rate counters, read-through caches and one-time verification codes,
//! all kept in one TTL key-value store shared by every API instance. See
//! [`stores`] for the components and [`middleware::rate_limit`] for the HTTP
//! admission boundary.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod state;
pub mod stores;
#[cfg(test)]
mod test_utils;

use axum::{Router, middleware::from_fn_with_state};

use crate::state::AppState;

/// All routes. Everything but `/health` sits behind the rate limiter.
pub fn app(state: AppState) -> Router {
    let limited = Router::new()
        .nest("/auth", handlers::auth::router())
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::enforce_rate_limit,
        ));

    Router::new()
        .nest("/health", handlers::health::router())
        .merge(limited)
        .with_state(state)
}
