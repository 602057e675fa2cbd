//! Queue configuration
//!
//! This module provides `QueueConfig` for configuring a [`crate::Queue`],
//! either through the builder methods or from environment variables.

use crate::error::{ConfigError, QueueError};
use crate::key::format_queue_key;
use crate::retry::RetryConfig;
use std::env;
use std::str::FromStr;

/// Default logical queue name
pub const DEFAULT_QUEUE_NAME: &str = "Queue";
/// Default consumer group name
pub const DEFAULT_CONSUMER_GROUP: &str = "Messages";
/// Default prefix for generated consumer names
pub const DEFAULT_CONSUMER_PREFIX: &str = "Consumer";
/// Default concurrency limit (reserved, not enforced)
pub const DEFAULT_CONCURRENCY_LIMIT: u8 = 0;
/// Upper bound accepted for the concurrency limit
pub const MAX_CONCURRENCY_LIMIT: u8 = 5;
/// Acknowledge messages on receive by default
pub const DEFAULT_AUTO_VERIFY: bool = true;

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load an environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load an environment variable or return an error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an optional environment variable, `None` when unset
fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::ParseError {
                key: key.to_string(),
                details: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Configuration for a queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Redis stream key (already namespaced by [`format_queue_key`])
    pub queue_name: String,

    /// Consumer group name
    pub consumer_group: String,

    /// Prefix used by [`QueueConfig::consumer_name`]
    pub consumer_name_prefix: String,

    /// Reserved concurrency knob (0-5), not enforced by the queue
    pub concurrency_limit: u8,

    /// Acknowledge each message as part of `receive_message`
    pub auto_verify: bool,

    /// Backoff policy applied to every log store call
    pub retry: RetryConfig,
}

impl QueueConfig {
    /// Create a config for the given logical queue name
    ///
    /// An empty name is kept empty so that validation rejects it.
    pub fn new(queue_name: impl AsRef<str>) -> Self {
        Self {
            queue_name: physical_name(queue_name.as_ref()),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            consumer_name_prefix: DEFAULT_CONSUMER_PREFIX.to_string(),
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            auto_verify: DEFAULT_AUTO_VERIFY,
            retry: RetryConfig::default(),
        }
    }

    /// Set the logical queue name
    pub fn with_queue_name(mut self, name: impl AsRef<str>) -> Self {
        self.queue_name = physical_name(name.as_ref());
        self
    }

    /// Use a stream key verbatim, bypassing the key prefix
    pub fn with_stream_key(mut self, key: impl Into<String>) -> Self {
        self.queue_name = key.into();
        self
    }

    /// Set the consumer group
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    /// Set the consumer name prefix
    pub fn with_consumer_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_name_prefix = prefix.into();
        self
    }

    /// Set the concurrency limit (clamped to 0-5)
    pub fn with_concurrency_limit(mut self, limit: u8) -> Self {
        self.concurrency_limit = limit.min(MAX_CONCURRENCY_LIMIT);
        self
    }

    /// Enable or disable acknowledgment on receive
    pub fn with_auto_verify(mut self, auto_verify: bool) -> Self {
        self.auto_verify = auto_verify;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build a consumer name from the configured prefix
    pub fn consumer_name(&self, suffix: impl std::fmt::Display) -> String {
        format!("{}-{}", self.consumer_name_prefix, suffix)
    }

    /// Check the invariants every stream operation relies on
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.queue_name.trim().is_empty() {
            return Err(QueueError::precondition("queue name cannot be empty"));
        }
        if self.consumer_group.trim().is_empty() {
            return Err(QueueError::precondition(
                "consumer group name cannot be empty",
            ));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_NAME)
    }
}

/// Load QueueConfig from environment variables
///
/// Environment variables (all optional):
/// - `QUEUE_NAME` - logical queue name (default: `Queue`)
/// - `QUEUE_CONSUMER_GROUP` - consumer group (default: `Messages`)
/// - `QUEUE_CONSUMER_PREFIX` - consumer name prefix (default: `Consumer`)
/// - `QUEUE_CONCURRENCY_LIMIT` - reserved knob, 0-5 (default: 0)
/// - `QUEUE_AUTO_VERIFY` - `true`/`false` (default: true)
/// - `QUEUE_MAX_RETRIES` - retries per store call (default: 5)
/// - `QUEUE_RETRY_INITIAL_DELAY_MS` - first backoff delay (default: 100)
impl FromEnv for QueueConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = QueueConfig::new(env_or_default("QUEUE_NAME", DEFAULT_QUEUE_NAME))
            .with_consumer_group(env_or_default(
                "QUEUE_CONSUMER_GROUP",
                DEFAULT_CONSUMER_GROUP,
            ))
            .with_consumer_name_prefix(env_or_default(
                "QUEUE_CONSUMER_PREFIX",
                DEFAULT_CONSUMER_PREFIX,
            ));

        if let Some(limit) = env_parse::<u8>("QUEUE_CONCURRENCY_LIMIT")? {
            if limit > MAX_CONCURRENCY_LIMIT {
                return Err(ConfigError::ParseError {
                    key: "QUEUE_CONCURRENCY_LIMIT".to_string(),
                    details: format!("must be between 0 and {}", MAX_CONCURRENCY_LIMIT),
                });
            }
            config = config.with_concurrency_limit(limit);
        }
        if let Some(auto_verify) = env_parse::<bool>("QUEUE_AUTO_VERIFY")? {
            config = config.with_auto_verify(auto_verify);
        }
        if let Some(max_retries) = env_parse::<u32>("QUEUE_MAX_RETRIES")? {
            config.retry = config.retry.with_max_retries(max_retries);
        }
        if let Some(delay) = env_parse::<u64>("QUEUE_RETRY_INITIAL_DELAY_MS")? {
            config.retry = config.retry.with_initial_delay(delay);
        }

        Ok(config)
    }
}

fn physical_name(logical: &str) -> String {
    if logical.trim().is_empty() {
        String::new()
    } else {
        format_queue_key(logical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE_VARS: [&str; 7] = [
        "QUEUE_NAME",
        "QUEUE_CONSUMER_GROUP",
        "QUEUE_CONSUMER_PREFIX",
        "QUEUE_CONCURRENCY_LIMIT",
        "QUEUE_AUTO_VERIFY",
        "QUEUE_MAX_RETRIES",
        "QUEUE_RETRY_INITIAL_DELAY_MS",
    ];

    fn queue_env(
        overrides: &[(&'static str, &'static str)],
    ) -> Vec<(&'static str, Option<&'static str>)> {
        QUEUE_VARS
            .iter()
            .map(|key| {
                let value = overrides.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
                (*key, value)
            })
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();

        assert_eq!(config.queue_name, "stream-queue:Queue");
        assert_eq!(config.consumer_group, "Messages");
        assert_eq!(config.consumer_name_prefix, "Consumer");
        assert_eq!(config.concurrency_limit, 0);
        assert!(config.auto_verify);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = QueueConfig::new("app-logs")
            .with_consumer_group("log-readers")
            .with_consumer_name_prefix("reader")
            .with_concurrency_limit(9)
            .with_auto_verify(false)
            .with_retry(RetryConfig::no_retry());

        assert_eq!(config.queue_name, "stream-queue:app-logs");
        assert_eq!(config.consumer_group, "log-readers");
        assert_eq!(config.concurrency_limit, MAX_CONCURRENCY_LIMIT);
        assert!(!config.auto_verify);
        assert_eq!(config.retry.max_attempts(), 1);
        assert_eq!(config.consumer_name(3), "reader-3");
    }

    #[test]
    fn test_stream_key_verbatim() {
        let config = QueueConfig::default().with_stream_key("raw:key");
        assert_eq!(config.queue_name, "raw:key");
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let err = QueueConfig::new("").validate().unwrap_err();
        assert!(matches!(err, QueueError::Precondition(_)));
        assert!(err.to_string().contains("queue name"));

        let err = QueueConfig::default()
            .with_consumer_group("  ")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("consumer group"));
    }

    #[test]
    fn test_from_env_defaults() {
        temp_env::with_vars(queue_env(&[]), || {
            let config = QueueConfig::from_env().unwrap();
            assert_eq!(config, QueueConfig::default());
        });
    }

    #[test]
    fn test_from_env_overrides() {
        let vars = queue_env(&[
            ("QUEUE_NAME", "orders"),
            ("QUEUE_CONSUMER_GROUP", "billing"),
            ("QUEUE_CONSUMER_PREFIX", "biller"),
            ("QUEUE_CONCURRENCY_LIMIT", "3"),
            ("QUEUE_AUTO_VERIFY", "false"),
            ("QUEUE_MAX_RETRIES", "2"),
            ("QUEUE_RETRY_INITIAL_DELAY_MS", "25"),
        ]);

        temp_env::with_vars(vars, || {
            let config = QueueConfig::from_env().unwrap();
            assert_eq!(config.queue_name, "stream-queue:orders");
            assert_eq!(config.consumer_group, "billing");
            assert_eq!(config.consumer_name_prefix, "biller");
            assert_eq!(config.concurrency_limit, 3);
            assert!(!config.auto_verify);
            assert_eq!(config.retry.max_retries, 2);
            assert_eq!(config.retry.initial_delay_ms, 25);
        });
    }

    #[test]
    fn test_from_env_invalid_number() {
        let vars = queue_env(&[("QUEUE_MAX_RETRIES", "many")]);

        temp_env::with_vars(vars, || {
            let err = QueueConfig::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::ParseError { ref key, .. } if key == "QUEUE_MAX_RETRIES"
            ));
        });
    }

    #[test]
    fn test_from_env_concurrency_out_of_range() {
        let vars = queue_env(&[("QUEUE_CONCURRENCY_LIMIT", "6")]);

        temp_env::with_vars(vars, || {
            assert!(QueueConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("STREAM_QUEUE_MISSING", || {
            let err = env_required("STREAM_QUEUE_MISSING").unwrap_err();
            assert!(err.to_string().contains("STREAM_QUEUE_MISSING"));
        });
    }
}
