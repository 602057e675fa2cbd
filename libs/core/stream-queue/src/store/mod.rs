//! Log store abstraction
//!
//! The queue talks to its backing store only through [`LogStore`]: an
//! append-only stream per key, consumer groups with a cursor, competing
//! consumer reads and explicit acknowledgment. [`RedisStore`] implements it
//! on Redis Streams; [`MemoryStore`] is an in-process implementation with
//! the same delivery semantics.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, manager_config};

use crate::error::QueueResult;
use crate::message::{EntryId, StoreEntry};
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of an idempotent consumer group creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// The group was created by this call
    Created,
    /// The group already existed; its cursor is untouched
    AlreadyExists,
}

/// Append-only log store with consumer group delivery.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Create `group` on `stream` at the "new entries only" cursor, creating
    /// the stream when it does not exist.
    async fn ensure_group(&self, stream: &str, group: &str) -> QueueResult<GroupStatus>;

    /// Append one entry and return its store-assigned id.
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> QueueResult<EntryId>;

    /// Read up to `count` never-delivered entries for `consumer`.
    ///
    /// With `block = None` the call returns immediately; otherwise it waits
    /// up to `block` for new entries. An empty vec means nothing arrived.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
        stream: &str,
    ) -> QueueResult<Vec<StoreEntry>>;

    /// Mark an entry processed for `group`. Returns how many entries were
    /// acknowledged (0 when it was not pending).
    async fn acknowledge(&self, stream: &str, group: &str, id: &EntryId) -> QueueResult<u64>;

    /// Newest `count` entries, newest first.
    async fn range_rev(&self, stream: &str, count: usize) -> QueueResult<Vec<StoreEntry>>;

    /// Number of entries in the stream (0 when it does not exist).
    async fn len(&self, stream: &str) -> QueueResult<u64>;

    /// Number of delivered but unacknowledged entries in `group`.
    async fn pending_count(&self, stream: &str, group: &str) -> QueueResult<u64>;
}
