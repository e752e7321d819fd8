//! Shared API request/response types used by the API server and its clients.

use garde::Validate;
use serde::{Deserialize, Serialize};

/// Longest code any configured policy can produce.
const MAX_CODE_LEN: usize = 32;

/// Request to send a verification code to an email address.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RequestCodePayload {
    #[garde(email)]
    pub email: String,
}

/// Check a verification code received via email.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct VerifyCodePayload {
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 1, max = MAX_CODE_LEN), custom(validate_code_chars))]
    pub code: String,
}

fn validate_code_chars(value: &str, _ctx: &()) -> garde::Result {
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(garde::Error::new("code must be letters and digits only"));
    }
    Ok(())
}

/// Returned after a verification code was issued.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestCodeResponse {
    pub message: String,
}

/// Whether the submitted code is the live one for the email.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyCodeResponse {
    pub valid: bool,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
