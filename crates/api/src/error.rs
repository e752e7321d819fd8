use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use shared::api::ErrorResponse;

#[derive(Debug)]
pub enum AppError {
    /// Internal errors - logged but return generic 500 to user
    Internal(anyhow::Error),
    /// User-facing errors - message is safe to show
    External(StatusCode, &'static str),
    /// Validation errors - safe to show
    Validation(String),
    /// Client exceeded its request budget for the current window
    RateLimited { retry_after: Duration },
}

fn error_body(status: StatusCode, message: &str) -> Response {
    let body = ErrorResponse {
        error: message.to_string(),
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Internal(err) => {
                tracing::error!("internal error: {:?}", err);
                sentry::capture_error(
                    err.as_ref() as &(dyn std::error::Error + Send + Sync + 'static)
                );

                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::External(status, msg) => error_body(status, msg),
            AppError::Validation(msg) => error_body(StatusCode::BAD_REQUEST, &msg),
            AppError::RateLimited { retry_after } => {
                let mut response = error_body(StatusCode::TOO_MANY_REQUESTS, "Too many requests");
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after.as_secs().max(1)),
                );
                response
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn internal_error_returns_500_generic_message() {
        let err = AppError::Internal(anyhow::anyhow!("redis connection failed"));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({ "error": "Internal server error" })
        );
    }

    #[tokio::test]
    async fn internal_error_hides_sensitive_details() {
        let err = AppError::Internal(anyhow::anyhow!("redis://:hunter2@cache leaked"));
        let response = err.into_response();

        let body = response_json(response).await.to_string();

        assert!(!body.contains("hunter2"));
        assert!(!body.contains("redis://"));
    }

    #[tokio::test]
    async fn external_error_returns_specified_status_and_message() {
        let err = AppError::External(StatusCode::SERVICE_UNAVAILABLE, "Verification is unavailable");
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({ "error": "Verification is unavailable" })
        );
    }

    #[tokio::test]
    async fn validation_error_returns_400_with_details() {
        let err = AppError::Validation("email: not a valid email".into());
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({ "error": "email: not a valid email" })
        );
    }

    #[tokio::test]
    async fn rate_limited_returns_429_with_retry_after() {
        let err = AppError::RateLimited {
            retry_after: Duration::from_secs(60),
        };
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        assert_eq!(
            response_json(response).await,
            serde_json::json!({ "error": "Too many requests" })
        );
    }

    #[test]
    fn errors_print_their_variant_for_test_failures() {
        let err = AppError::External(StatusCode::TOO_MANY_REQUESTS, "Too many code requests");

        let printed = format!("{:?}", err);

        assert!(printed.contains("External"));
        assert!(printed.contains("Too many code requests"));
    }

    #[tokio::test]
    async fn io_error_converts_to_internal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "store down");
        let err: AppError = io_err.into();

        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
