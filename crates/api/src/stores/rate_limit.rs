//! Fixed-window rate limiting over the shared store.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::TtlStore;

/// What to do when the store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Admit the request.
    #[default]
    Open,
    /// Reject the request.
    Closed,
}

/// Limits applied per client identity.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    /// Requests admitted per window; the next one is rejected.
    pub max_requests: i64,
    pub window: Duration,
    pub on_store_failure: FailureMode,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            on_store_failure: FailureMode::Open,
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Under the limit, includes current count.
    Allowed(i64),
    /// Over the limit, includes current count.
    Exceeded(i64),
    /// The store could not be reached; the policy decided.
    Unavailable(FailureMode),
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            RateLimitResult::Allowed(_) | RateLimitResult::Unavailable(FailureMode::Open)
        )
    }
}

/// Per-identity fixed-window counter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn TtlStore>,
    policy: RateLimitPolicy,
    namespace: &'static str,
}

impl RateLimiter {
    /// Limiter for client identities, counting under `rate:{identity}`.
    pub fn new(store: Arc<dyn TtlStore>, policy: RateLimitPolicy) -> Self {
        Self::with_namespace(store, policy, "rate")
    }

    /// Limiter counting under `{namespace}:{identity}`, so several limits
    /// can share one store without sharing counters.
    pub fn with_namespace(
        store: Arc<dyn TtlStore>,
        policy: RateLimitPolicy,
        namespace: &'static str,
    ) -> Self {
        Self {
            store,
            policy,
            namespace,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    fn rate_key(&self, identity: &str) -> String {
        format!("{}:{}", self.namespace, identity)
    }

    /// Count one request for `identity` and decide whether to admit it.
    pub async fn check(&self, identity: &str) -> RateLimitResult {
        let key = self.rate_key(identity);

        let count = match self.store.increment_with_ttl(&key, self.policy.window).await {
            Ok(count) => count,
            Err(err) => {
                let mode = self.policy.on_store_failure;
                tracing::warn!(namespace = self.namespace, identity = %identity, ?mode, "rate limit store unavailable: {:#}", err);
                return RateLimitResult::Unavailable(mode);
            }
        };

        if count > self.policy.max_requests {
            tracing::warn!(namespace = self.namespace, identity = %identity, count, "rate limit exceeded");
            RateLimitResult::Exceeded(count)
        } else {
            RateLimitResult::Allowed(count)
        }
    }
}
