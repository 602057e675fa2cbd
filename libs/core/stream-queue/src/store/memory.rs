//! In-process [`LogStore`] with Redis Streams delivery semantics.
//!
//! Each stream keeps its entries in append order. Each consumer group keeps
//! a cursor into them and a pending-entries list. Blocking reads park on a
//! [`Notify`] that every append wakes.

use super::{GroupStatus, LogStore};
use crate::error::{QueueError, QueueResult};
use crate::message::{EntryId, StoreEntry};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct MemoryGroup {
    /// Index of the first entry not yet delivered to the group
    next_index: usize,
    /// Delivered but unacknowledged entries, by consumer
    pending: HashMap<EntryId, String>,
}

#[derive(Default)]
struct MemoryStream {
    entries: Vec<StoreEntry>,
    groups: HashMap<String, MemoryGroup>,
    last_id: (u64, u64),
}

impl MemoryStream {
    fn next_id(&mut self) -> EntryId {
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let (last_ms, last_seq) = self.last_id;

        self.last_id = if now_ms > last_ms {
            (now_ms, 0)
        } else {
            (last_ms, last_seq + 1)
        };

        EntryId::new(format!("{}-{}", self.last_id.0, self.last_id.1))
    }
}

/// In-memory log store.
#[derive(Default)]
pub struct MemoryStore {
    streams: Mutex<HashMap<String, MemoryStream>>,
    appended: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<String, MemoryStream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver up to `count` new entries, `None` if the group is missing
    fn take_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Option<Vec<StoreEntry>> {
        let mut streams = self.streams();
        let state = streams.get_mut(stream)?;
        let cursor = state.groups.get_mut(group)?;

        let end = (cursor.next_index + count).min(state.entries.len());
        let batch: Vec<StoreEntry> = state.entries[cursor.next_index..end].to_vec();
        cursor.next_index = end;

        for entry in &batch {
            cursor.pending.insert(entry.id.clone(), consumer.to_string());
        }

        Some(batch)
    }
}

fn nogroup(stream: &str, group: &str) -> QueueError {
    QueueError::Store(format!(
        "NOGROUP No such key '{}' or consumer group '{}'",
        stream, group
    ))
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn ensure_group(&self, stream: &str, group: &str) -> QueueResult<GroupStatus> {
        let mut streams = self.streams();
        let state = streams.entry(stream.to_string()).or_default();

        if state.groups.contains_key(group) {
            return Ok(GroupStatus::AlreadyExists);
        }

        let next_index = state.entries.len();
        state.groups.insert(
            group.to_string(),
            MemoryGroup {
                next_index,
                ..Default::default()
            },
        );
        debug!(stream = %stream, group = %group, "Created consumer group");
        Ok(GroupStatus::Created)
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> QueueResult<EntryId> {
        let id = {
            let mut streams = self.streams();
            let state = streams.entry(stream.to_string()).or_default();
            let id = state.next_id();
            state.entries.push(StoreEntry::new(id.clone(), fields.to_vec()));
            id
        };

        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
        stream: &str,
    ) -> QueueResult<Vec<StoreEntry>> {
        let count = count.max(1);
        let deadline = block
            .filter(|b| !b.is_zero())
            .map(|b| tokio::time::Instant::now() + b);

        loop {
            // Registered before checking so an append in between is not missed
            let appended = self.appended.notified();

            let batch = self
                .take_new(stream, group, consumer, count)
                .ok_or_else(|| nogroup(stream, group))?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            match deadline {
                None => return Ok(Vec::new()),
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, appended).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
            }
        }
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: &EntryId) -> QueueResult<u64> {
        let mut streams = self.streams();
        let acked = streams
            .get_mut(stream)
            .and_then(|state| state.groups.get_mut(group))
            .and_then(|cursor| cursor.pending.remove(id))
            .map_or(0, |_| 1);
        Ok(acked)
    }

    async fn range_rev(&self, stream: &str, count: usize) -> QueueResult<Vec<StoreEntry>> {
        let streams = self.streams();
        Ok(streams
            .get(stream)
            .map(|state| state.entries.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, stream: &str) -> QueueResult<u64> {
        let streams = self.streams();
        Ok(streams.get(stream).map_or(0, |state| state.entries.len() as u64))
    }

    async fn pending_count(&self, stream: &str, group: &str) -> QueueResult<u64> {
        let streams = self.streams();
        streams
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .map(|cursor| cursor.pending.len() as u64)
            .ok_or_else(|| nogroup(stream, group))
    }
}
