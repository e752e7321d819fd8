//! Health check endpoint for load balancers and monitoring.
//!
//! Returns 200 OK if the shared store is reachable, 503 Service Unavailable
//! otherwise. Not rate limited.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    store: bool,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = match state.stores.store.health_check().await {
        Ok(ok) => ok,
        Err(err) => {
            tracing::warn!("store health check failed: {:#}", err);
            false
        }
    };

    let response = HealthResponse {
        status: if store_ok { "ok" } else { "unhealthy" },
        store: store_ok,
    };

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
