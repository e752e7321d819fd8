//! Ephemeral shared state (Redis).
//!
//! Everything here lives in one key-value store shared by all API instances
//! and expires on its own. The components hold no state of their own, so any
//! number of instances can run side by side.
//!
//! ## Components
//!
//! - **ttl** - The store contract (`TtlStore`) and its Redis implementation
//! - **memory** - In-process store for tests and single-instance development
//! - **timeout** - Bounds every store call with a deadline
//! - **rate_limit** - Fixed-window request counters per client identity or email
//! - **cache** - Read-through cache for catalog reads and rating aggregates
//! - **verification** - One-time email verification codes (10 min TTL)
//!
//! ## Key Patterns
//!
//! ```text
//! rate:{identity}                → Request count for the current window
//! ratelimit:code:{email}         → Code requests for an email (1 hour window)
//! ratelimit:verify:{email}       → Code checks for an email (15 min window)
//! course:{id}                    → Cached course
//! teacher:{id}                   → Cached teacher
//! faculty:{id}                   → Cached faculty
//! {course|teacher|faculty}:all   → Cached collection, one slot per shape
//! rating:{course|teacher}:{id}   → Cached rating aggregate (30 min TTL)
//! verify:{email}                 → Hashed verification code
//! ```
//!
//! ## Usage in Handlers
//!
//! Stores are accessed via `state.stores`:
//!
//! ```ignore
//! async fn handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
//!     let course = state
//!         .stores
//!         .cache
//!         .entity_or_load(EntityKind::Course, id, || repo.find_course(id))
//!         .await?;
//!     state.stores.cache.evict_collection(Collection::Courses).await;
//! }
//! ```

mod cache;
mod memory;
mod rate_limit;
mod timeout;
mod ttl;
mod verification;

pub use cache::{CacheShape, CacheTtls, Collection, EntityCache, EntityKind, SubjectKind};
pub use memory::MemoryTtlStore;
pub use rate_limit::{FailureMode, RateLimitPolicy, RateLimitResult, RateLimiter};
pub use timeout::TimeoutTtlStore;
pub use ttl::{RedisTtlStore, TtlStore};
pub use verification::{
    ADMIN_BYPASS_CODE, CodeCharset, CodePolicy, VerificationCodes, VerifyState,
};

#[cfg(test)]
pub use ttl::MockTtlStore;

use std::sync::Arc;

use crate::config::Config;

/// Collection of all ephemeral-state components, sharing one store.
#[derive(Clone)]
pub struct Stores {
    pub store: Arc<dyn TtlStore>,
    pub rate_limiter: RateLimiter,
    /// Limits how often a code can be sent to one email.
    pub code_requests: RateLimiter,
    /// Limits how many codes can be checked against one email.
    pub code_checks: RateLimiter,
    pub cache: EntityCache,
    pub verification: VerificationCodes,
}

impl Stores {
    /// Wires every component to `store`, with every call bounded by the
    /// configured store timeout.
    pub fn new(store: Arc<dyn TtlStore>, config: &Config) -> Self {
        let store: Arc<dyn TtlStore> = Arc::new(TimeoutTtlStore::new(store, config.store_timeout()));

        Self {
            rate_limiter: RateLimiter::new(store.clone(), config.rate_limit_policy()),
            code_requests: RateLimiter::with_namespace(
                store.clone(),
                config.code_request_policy(),
                "ratelimit:code",
            ),
            code_checks: RateLimiter::with_namespace(
                store.clone(),
                config.code_check_policy(),
                "ratelimit:verify",
            ),
            cache: EntityCache::new(store.clone(), config.cache_ttls()),
            verification: VerificationCodes::new(store.clone(), config.code_policy()),
            store,
        }
    }
}
