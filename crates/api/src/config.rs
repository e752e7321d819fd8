use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stores::{CacheTtls, CodeCharset, CodePolicy, FailureMode, RateLimitPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared store. Without it an in-process store is used, which is only
    /// correct for a single instance.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// SMTP URL for outbound email (e.g., smtp://localhost:1025)
    #[serde(default)]
    pub smtp_url: Option<String>,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    /// Set to "production" for JSON logging, anything else for human-readable.
    #[serde(default)]
    pub env: String,
    /// Sentry DSN for error tracking
    #[serde(default)]
    pub sentry_dsn: Option<String>,

    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: i64,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    /// `open` admits requests while the store is down, `closed` rejects them.
    #[serde(default)]
    pub rate_limit_failure_mode: FailureMode,

    /// Codes that may be sent to one email per window.
    #[serde(default = "default_code_request_max")]
    pub code_request_max: i64,
    #[serde(default = "default_code_request_window_secs")]
    pub code_request_window_secs: u64,
    /// Codes that may be checked against one email per window.
    #[serde(default = "default_code_check_max")]
    pub code_check_max: i64,
    #[serde(default = "default_code_check_window_secs")]
    pub code_check_window_secs: u64,

    #[serde(default = "default_entity_cache_ttl_secs")]
    pub entity_cache_ttl_secs: u64,
    #[serde(default = "default_aggregate_cache_ttl_secs")]
    pub aggregate_cache_ttl_secs: u64,

    #[serde(default = "default_verify_code_ttl_secs")]
    pub verify_code_ttl_secs: u64,
    #[serde(default = "default_verify_code_length")]
    pub verify_code_length: usize,
    #[serde(default)]
    pub verify_code_charset: CodeCharset,

    /// Deadline for a single store call.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_email_from() -> String {
    "Course Evaluation <noreply@example.com>".to_string()
}

fn default_rate_limit_max_requests() -> i64 {
    60
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_code_request_max() -> i64 {
    5
}

fn default_code_request_window_secs() -> u64 {
    60 * 60
}

fn default_code_check_max() -> i64 {
    10
}

fn default_code_check_window_secs() -> u64 {
    15 * 60
}

fn default_entity_cache_ttl_secs() -> u64 {
    2 * 60 * 60
}

fn default_aggregate_cache_ttl_secs() -> u64 {
    30 * 60
}

fn default_verify_code_ttl_secs() -> u64 {
    10 * 60
}

fn default_verify_code_length() -> usize {
    6
}

fn default_store_timeout_ms() -> u64 {
    250
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests: self.rate_limit_max_requests,
            window: Duration::from_secs(self.rate_limit_window_secs),
            on_store_failure: self.rate_limit_failure_mode,
        }
    }

    /// Per-email limit on sending codes. Rejects while the store is down.
    pub fn code_request_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests: self.code_request_max,
            window: Duration::from_secs(self.code_request_window_secs),
            on_store_failure: FailureMode::Closed,
        }
    }

    /// Per-email limit on checking codes. Rejects while the store is down.
    pub fn code_check_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests: self.code_check_max,
            window: Duration::from_secs(self.code_check_window_secs),
            on_store_failure: FailureMode::Closed,
        }
    }

    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            entity: Duration::from_secs(self.entity_cache_ttl_secs),
            aggregate: Duration::from_secs(self.aggregate_cache_ttl_secs),
        }
    }

    pub fn code_policy(&self) -> CodePolicy {
        CodePolicy {
            length: self.verify_code_length,
            charset: self.verify_code_charset,
            ttl: Duration::from_secs(self.verify_code_ttl_secs),
        }
    }

    /// Rejects settings that would make a component misbehave silently.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rate_limit_max_requests < 1 {
            anyhow::bail!("rate_limit_max_requests must be at least 1");
        }
        if self.rate_limit_window_secs == 0 {
            anyhow::bail!("rate_limit_window_secs must be positive");
        }
        if self.code_request_max < 1 || self.code_check_max < 1 {
            anyhow::bail!("per-email code limits must be at least 1");
        }
        if self.code_request_window_secs == 0 || self.code_check_window_secs == 0 {
            anyhow::bail!("per-email code windows must be positive");
        }
        if self.entity_cache_ttl_secs == 0 || self.aggregate_cache_ttl_secs == 0 {
            anyhow::bail!("cache ttls must be positive");
        }
        if self.verify_code_ttl_secs == 0 {
            anyhow::bail!("verify_code_ttl_secs must be positive");
        }
        if !(4..=32).contains(&self.verify_code_length) {
            anyhow::bail!("verify_code_length must be between 4 and 32");
        }
        if self.store_timeout_ms == 0 {
            anyhow::bail!("store_timeout_ms must be positive");
        }
        Ok(())
    }
}
