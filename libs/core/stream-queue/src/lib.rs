//! Stream Queue
//!
//! A competing-consumers work queue on an append-only log store with
//! consumer groups (Redis Streams).
//!
//! ## Features
//!
//! - **JSON envelopes**: payloads travel as a single `messageBody` field
//! - **Delayed sends**: appended by a background task once the delay elapses
//! - **Consumer groups**: each entry is delivered to exactly one consumer
//! - **Retries**: every store call is retried with exponential backoff
//! - **Auto-ack**: optional acknowledgment as part of `receive_message`
//! - **Graceful shutdown**: pending delayed sends are cancelled on demand
//!
//! ## Example
//!
//! ```ignore
//! use stream_queue::{Queue, QueueConfig};
//! use std::time::Duration;
//!
//! let queue = Queue::connect("redis://127.0.0.1:6379", QueueConfig::new("orders")).await?;
//!
//! queue.send_message(&json!({"order": 42}), Duration::ZERO).await?;
//!
//! if let Some(message) = queue.receive_message::<Value>("worker-1", 5000).await? {
//!     println!("{}: {}", message.stream_id, message.body);
//! }
//!
//! // From your signal handler
//! queue.shutdown_handle().cancel_pending();
//! ```

mod config;
mod error;
mod event;
mod key;
mod lifecycle;
mod message;
pub mod metrics;
mod queue;
mod retry;
mod store;

pub use config::{
    DEFAULT_AUTO_VERIFY, DEFAULT_CONCURRENCY_LIMIT, DEFAULT_CONSUMER_GROUP,
    DEFAULT_CONSUMER_PREFIX, DEFAULT_QUEUE_NAME, FromEnv, MAX_CONCURRENCY_LIMIT, QueueConfig,
    env_or_default, env_required,
};
pub use error::{ConfigError, ErrorCategory, QueueError, QueueResult};
pub use event::{EVENT_CHANNEL_CAPACITY, ErrorOrigin, QueueEvent};
pub use key::{QUEUE_KEY_PREFIX, format_queue_key};
pub use lifecycle::{PendingSends, ScheduledSend, ShutdownHandle};
pub use message::{EntryId, Fields, MESSAGE_BODY_FIELD, QueueMessage, StoreEntry, encode_envelope};
pub use metrics::{QueueMetrics, init_metrics, render_metrics};
pub use queue::{AckOutcome, Queue, SendReceipt};
pub use retry::{RetryConfig, retry_with_backoff, retry_with_backoff_if};
pub use store::{GroupStatus, LogStore, MemoryStore, RedisStore, manager_config};
