//! Outbound email.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use lettre::{
    Message, SmtpTransport, Transport,
    message::{Mailbox, MultiPart},
};
use tokio::task::JoinHandle;

/// Email sender trait for transactional mail.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send a verification code email.
    async fn send_verification_code(&self, to: &str, code: &str) -> Result<()>;
}

/// SMTP sender using lettre.
pub struct SmtpEmailSender {
    transport: SmtpTransport,
    from: Mailbox,
    code_ttl: Duration,
}

impl SmtpEmailSender {
    pub fn new(smtp_url: &str, from: &str, code_ttl: Duration) -> Result<Self> {
        let transport = SmtpTransport::from_url(smtp_url)?.build();

        Ok(Self {
            transport,
            from: from.parse()?,
            code_ttl,
        })
    }

    fn verification_message(&self, to: &str, code: &str) -> Result<Message> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(None, to.parse()?))
            .subject("Your course evaluation verification code")
            .multipart(MultiPart::alternative_plain_html(
                verification_body(code, self.code_ttl),
                verification_html(code, self.code_ttl),
            ))?;

        Ok(message)
    }
}

fn expiry_minutes(ttl: Duration) -> u64 {
    (ttl.as_secs() / 60).max(1)
}

fn verification_body(code: &str, ttl: Duration) -> String {
    format!(
        "Your verification code is: {}\n\nThis code expires in {} minutes.",
        code,
        expiry_minutes(ttl)
    )
}

// Codes are letters and digits only, so nothing here needs escaping.
fn verification_html(code: &str, ttl: Duration) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; color: #222;">
  <h2>Verify your email</h2>
  <p>Use this code to finish creating your course evaluation account:</p>
  <p style="font-size: 28px; font-weight: bold; letter-spacing: 4px;">{}</p>
  <p>This code expires in {} minutes. If you did not request it, ignore this email.</p>
</body>
</html>"#,
        code,
        expiry_minutes(ttl)
    )
}

/// Send the code without holding up the caller. Delivery failures are
/// logged and reported to Sentry; the code stays valid either way.
pub fn send_verification_in_background(
    sender: Arc<dyn EmailSender>,
    to: String,
    code: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match sender.send_verification_code(&to, &code).await {
            Ok(()) => tracing::info!(email = %to, "verification code sent"),
            Err(err) => {
                tracing::error!(email = %to, "verification email failed: {:#}", err);
                sentry::capture_error(
                    err.as_ref() as &(dyn std::error::Error + Send + Sync + 'static)
                );
            }
        }
    })
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_verification_code(&self, to: &str, code: &str) -> Result<()> {
        let message = self.verification_message(to, code)?;
        let transport = self.transport.clone();

        // lettre's SmtpTransport blocks on network I/O.
        tokio::task::spawn_blocking(move || transport.send(&message)).await??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_states_code_and_expiry() {
        let body = verification_body("482913", Duration::from_secs(600));

        assert!(body.contains("482913"));
        assert!(body.contains("10 minutes"));
    }

    #[test]
    fn html_body_states_code_and_expiry() {
        let html = verification_html("K7Q2ZP", Duration::from_secs(900));

        assert!(html.contains(">K7Q2ZP<"));
        assert!(html.contains("15 minutes"));
    }

    #[test]
    fn message_carries_plain_and_html_parts() {
        let sender = SmtpEmailSender::new(
            "smtp://localhost:1025",
            "Course Evaluation <noreply@example.com>",
            Duration::from_secs(600),
        )
        .unwrap();

        let message = sender.verification_message("alice@example.com", "482913").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
    }

    #[tokio::test]
    async fn background_send_delivers_code() {
        let mut sender = MockEmailSender::new();
        sender
            .expect_send_verification_code()
            .withf(|to, code| to == "alice@example.com" && code == "482913")
            .times(1)
            .returning(|_, _| Ok(()));

        send_verification_in_background(Arc::new(sender), "alice@example.com".into(), "482913".into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn background_send_swallows_delivery_failure() {
        let mut sender = MockEmailSender::new();
        sender
            .expect_send_verification_code()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("smtp refused")));

        let joined =
            send_verification_in_background(Arc::new(sender), "alice@example.com".into(), "1".into()).await;

        assert!(joined.is_ok());
    }

    #[test]
    fn message_is_addressed_to_recipient() {
        let sender = SmtpEmailSender::new(
            "smtp://localhost:1025",
            "Course Evaluation <noreply@example.com>",
            Duration::from_secs(600),
        )
        .unwrap();

        let message = sender.verification_message("alice@example.com", "482913").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("To: alice@example.com"));
        assert!(raw.contains("482913"));
    }

    #[test]
    fn rejects_malformed_recipient() {
        let sender = SmtpEmailSender::new(
            "smtp://localhost:1025",
            "Course Evaluation <noreply@example.com>",
            Duration::from_secs(600),
        )
        .unwrap();

        assert!(sender.verification_message("not an address", "1").is_err());
    }
}
