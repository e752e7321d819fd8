//! External service abstractions.
//!
//! Each service the API depends on is abstracted behind a trait to enable
//! mocking in tests.
//!
//! ## Services
//!
//! - **email** - Transactional email over SMTP (verification codes)
//!
//! ## Usage in Handlers
//!
//! Services are accessed via `AppState`:
//!
//! ```ignore
//! async fn handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
//!     send_verification_in_background(state.email.clone(), email, code);
//! }
//! ```

mod email;

pub use email::{EmailSender, SmtpEmailSender, send_verification_in_background};

#[cfg(test)]
pub use email::MockEmailSender;
