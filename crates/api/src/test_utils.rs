//! Shared test utilities for API handler tests.
//!
//! Provides a flexible `TestStateBuilder` for constructing `AppState` instances
//! with only the collaborators each test cares about.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::test_utils::TestStateBuilder;
//!
//! let mut email = MockEmailSender::new();
//! email.expect_send_verification_code().returning(|_, _| Ok(()));
//!
//! let state = TestStateBuilder::new()
//!     .with_email_sender(email)
//!     .build();
//! ```

use std::sync::Arc;

use crate::config::Config;
use crate::services::MockEmailSender;
use crate::state::AppState;
use crate::stores::{MemoryTtlStore, Stores, TtlStore};

/// Creates a test configuration with default limits.
pub fn test_config() -> Config {
    envy::from_iter([("env".to_string(), "test".to_string())])
        .expect("default config deserializes")
}

/// Builder for constructing test `AppState` with custom collaborators.
///
/// Uses a fresh in-memory store and an empty email mock for anything not
/// explicitly set.
pub struct TestStateBuilder {
    config: Option<Config>,
    store: Option<Arc<dyn TtlStore>>,
    email_sender: Option<MockEmailSender>,
}

impl TestStateBuilder {
    /// Creates a new builder with nothing configured.
    pub fn new() -> Self {
        Self {
            config: None,
            store: None,
            email_sender: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TtlStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_email_sender(mut self, sender: MockEmailSender) -> Self {
        self.email_sender = Some(sender);
        self
    }

    /// Builds the `AppState` using configured collaborators or defaults.
    pub fn build(self) -> AppState {
        let config = self.config.unwrap_or_else(test_config);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTtlStore::new()));

        AppState {
            stores: Stores::new(store, &config),
            config,
            email: Arc::new(self.email_sender.unwrap_or_else(MockEmailSender::new)),
        }
    }
}

impl Default for TestStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
