//! Shared test utilities for queue testing
//!
//! This crate provides reusable test infrastructure:
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: Deterministic queue, group and consumer names (always available)
//! - `assertions`: Custom assertion helpers (always available)
//!
//! # Features
//!
//! - `redis`: Enables Redis test infrastructure
//!
//! # Usage
//!
//! Add `features = ["redis"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! Then in your tests:
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! async fn my_redis_test() {
//!     let redis = TestRedis::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_redis_test");
//!
//!     let conn = redis.connection_manager().await;
//!     let queue_name = builder.queue_name("orders");
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test names with deterministic randomization
///
/// Tests sharing one Redis container stay isolated by deriving their
/// queue and group names from the test name.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_delayed_send");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic id, e.g. for payload correlation
    pub fn id(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }

    /// Logical queue name unique to this builder
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.queue_name("orders"), "test-orders-7");
    /// ```
    pub fn queue_name(&self, suffix: &str) -> String {
        format!("test-{}-{}", suffix, self.seed)
    }

    /// Consumer group name unique to this builder
    pub fn group_name(&self, suffix: &str) -> String {
        format!("group-{}-{}", suffix, self.seed)
    }

    /// Consumer name; `index` distinguishes competing consumers
    pub fn consumer_name(&self, index: usize) -> String {
        format!("consumer-{}-{}", self.seed, index)
    }
}

/// Test assertion helpers
pub mod assertions {
    use std::fmt::Debug;
    use std::time::Duration;

    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert that an optional value is None
    pub fn assert_none<T: Debug>(value: Option<T>, context: &str) {
        if let Some(value) = value {
            panic!("{}: expected None, got {:?}", context, value);
        }
    }

    /// Assert that `elapsed` is at least `min`
    pub fn assert_elapsed_at_least(elapsed: Duration, min: Duration, context: &str) {
        assert!(
            elapsed >= min,
            "{}: expected at least {:?}, took {:?}",
            context,
            min,
            elapsed
        );
    }
}
