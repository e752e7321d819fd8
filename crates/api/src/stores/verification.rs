//! One-time email verification codes.
//!
//! Flow:
//! 1. `issue` generates a code and stores its SHA-256 under `verify:{email}`,
//!    replacing any earlier code for that address
//! 2. The plaintext code is emailed to the user
//! 3. Registration submits email + code; `verify_registration` checks it
//!
//! A successful check does not consume the code. It stays valid until its TTL
//! runs out so a registration that fails for an unrelated reason can be
//! resubmitted with the same code.
//!
//! `ADMIN_BYPASS_CODE` stands in for a code on administrator-created accounts.
//! It is never stored and `generate` can never produce it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::TtlStore;

/// Marker accepted in place of a code for administrator-initiated accounts.
pub const ADMIN_BYPASS_CODE: &str = "ADMIN_CREATE";

/// Characters a generated code is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeCharset {
    /// `0-9`
    #[default]
    Numeric,
    /// `A-Z0-9`
    Alphanumeric,
}

impl CodeCharset {
    fn alphabet(self) -> &'static [u8] {
        match self {
            CodeCharset::Numeric => b"0123456789",
            CodeCharset::Alphanumeric => b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CodePolicy {
    pub length: usize,
    pub charset: CodeCharset,
    pub ttl: Duration,
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self {
            length: 6,
            charset: CodeCharset::Numeric,
            ttl: Duration::from_secs(10 * 60),
        }
    }
}

/// State stored for verification codes.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyState {
    pub code_hash: String,
    pub created_at: i64,
}

/// Issues and checks verification codes over the shared store.
#[derive(Clone)]
pub struct VerificationCodes {
    store: Arc<dyn TtlStore>,
    policy: CodePolicy,
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

impl VerificationCodes {
    pub fn new(store: Arc<dyn TtlStore>, policy: CodePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &CodePolicy {
        &self.policy
    }

    fn verify_key(email: &str) -> String {
        format!("verify:{}", email)
    }

    /// Fresh code of the configured length and charset.
    pub fn generate(&self) -> String {
        let alphabet = self.policy.charset.alphabet();
        let mut rng = rand::rng();

        loop {
            let code: String = (0..self.policy.length)
                .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
                .collect();
            // Unreachable with the built-in alphabets, which lack '_'.
            if code != ADMIN_BYPASS_CODE {
                return code;
            }
        }
    }

    /// Store `code` for `email`, replacing any live code and its TTL.
    pub async fn store(&self, email: &str, code: &str) -> Result<()> {
        if email.trim().is_empty() {
            bail!("email must not be empty");
        }
        if code.is_empty() {
            bail!("code must not be empty");
        }
        if code == ADMIN_BYPASS_CODE {
            bail!("the admin bypass marker cannot be stored as a code");
        }

        let state = VerifyState {
            code_hash: hash_code(code),
            created_at: Utc::now().timestamp(),
        };

        self.store
            .set(&Self::verify_key(email), &serde_json::to_vec(&state)?, self.policy.ttl)
            .await
    }

    /// Generate, store and return a code for `email`.
    pub async fn issue(&self, email: &str) -> Result<String> {
        let code = self.generate();
        self.store(email, &code).await?;

        tracing::info!(email = %email, "verification code issued");

        Ok(code)
    }

    /// Whether `code` is the live code for `email`. Never errors: a missing,
    /// expired or unreadable entry, or an unreachable store, all read as false.
    pub async fn validate(&self, email: &str, code: &str) -> bool {
        if email.trim().is_empty() || code.is_empty() {
            return false;
        }

        let stored = match self.store.get(&Self::verify_key(email)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::warn!(email = %email, "verification failed: no live code");
                return false;
            }
            Err(err) => {
                tracing::warn!(email = %email, "verification store unavailable: {:#}", err);
                return false;
            }
        };

        let state: VerifyState = match serde_json::from_slice(&stored) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(email = %email, "verification state unreadable: {}", err);
                return false;
            }
        };

        let valid = state.code_hash == hash_code(code);
        if !valid {
            tracing::warn!(email = %email, "verification failed: invalid code");
        }
        valid
    }

    /// Registration gate: the admin marker passes outright, anything else
    /// must be the live code for `email`.
    pub async fn verify_registration(&self, email: &str, code: &str) -> bool {
        if code == ADMIN_BYPASS_CODE {
            tracing::info!(email = %email, "registration code bypassed for admin-created account");
            return true;
        }
        self.validate(email, code).await
    }
}
