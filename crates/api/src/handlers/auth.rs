//! Email verification for registration.
//!
//! Flow:
//! 1. User requests a code via POST /auth/send-email-verification with their email
//! 2. A code is generated, its SHA-256 stored under `verify:{email}` for 10 minutes
//! 3. The plaintext code is emailed to the user in the background
//! 4. The registration form may pre-check the code via POST /auth/verify-email-code
//! 5. Registration itself gates on `VerificationCodes::verify_registration`
//!
//! Notes:
//! - Requesting again replaces the previous code
//! - A checked code is not consumed, so a failed registration can be retried
//! - Both routes are limited per email on top of the per-client limit, since
//!   client addresses come from headers the caller controls
//! - The admin bypass marker is never honored on these public routes

use axum::{Json, Router, debug_handler, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use garde::Validate;
use shared::api::{RequestCodePayload, RequestCodeResponse, VerifyCodePayload, VerifyCodeResponse};

use crate::{
    error::AppError,
    services::send_verification_in_background,
    state::AppState,
    stores::{FailureMode, RateLimitResult},
};

const UNAVAILABLE: &str = "Verification is temporarily unavailable";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/send-email-verification", post(request_code))
        .route("/verify-email-code", post(verify_code))
}

/// Turn a per-email limiter verdict into the response for a rejected request.
fn admit(result: RateLimitResult, exceeded: &'static str) -> Result<(), AppError> {
    match result {
        RateLimitResult::Exceeded(_) => Err(AppError::External(StatusCode::TOO_MANY_REQUESTS, exceeded)),
        RateLimitResult::Unavailable(FailureMode::Closed) => {
            Err(AppError::External(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE))
        }
        RateLimitResult::Allowed(_) | RateLimitResult::Unavailable(FailureMode::Open) => Ok(()),
    }
}

#[debug_handler]
async fn request_code(
    State(state): State<AppState>,
    Json(payload): Json<RequestCodePayload>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    // Rate limit: 5 code requests per hour per email
    admit(
        state.stores.code_requests.check(&payload.email).await,
        "Too many code requests. Try again later.",
    )?;

    let code = state
        .stores
        .verification
        .issue(&payload.email)
        .await
        .map_err(|err| {
            tracing::warn!(email = %payload.email, "could not store verification code: {:#}", err);
            AppError::External(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE)
        })?;

    send_verification_in_background(state.email.clone(), payload.email.clone(), code);

    tracing::info!(email = %payload.email, "verification code requested");

    Ok(Json(RequestCodeResponse {
        message: "Verification code sent".to_string(),
    }))
}

#[debug_handler]
async fn verify_code(
    State(state): State<AppState>,
    Json(payload): Json<VerifyCodePayload>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    // Rate limit: 10 verify attempts per 15 minutes per email
    admit(
        state.stores.code_checks.check(&payload.email).await,
        "Too many verification attempts. Try again later.",
    )?;

    let valid = state
        .stores
        .verification
        .validate(&payload.email, &payload.code)
        .await;

    Ok(Json(VerifyCodeResponse { valid }))
}
