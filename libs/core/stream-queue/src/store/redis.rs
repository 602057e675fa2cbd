//! Redis Streams implementation of [`LogStore`].

use super::{GroupStatus, LogStore};
use crate::error::{QueueError, QueueResult};
use crate::message::{EntryId, Fields, StoreEntry};
use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager, ConnectionManagerConfig};
use redis::streams::{StreamId, StreamRangeReply, StreamReadReply};
use redis::{AsyncCommands, RedisResult, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Log store backed by Redis Streams.
///
/// The connection is a cheap, cloneable handle shared with the caller; the
/// store never closes it.
#[derive(Clone)]
pub struct RedisStore<C = ConnectionManager> {
    conn: C,
}

impl<C> RedisStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Wrap an existing connection.
    ///
    /// `XREADGROUP ... BLOCK` holds the reply for the whole block window, so
    /// the connection's response timeout must be disabled or longer than any
    /// `block_time_ms` the queue is given. Redis clients default to 500 ms;
    /// build managers with [`manager_config`].
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    /// Get a clone of the underlying connection
    pub fn connection(&self) -> C {
        self.conn.clone()
    }
}

impl RedisStore<ConnectionManager> {
    /// Open a `ConnectionManager` for `url` and wrap it
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new_with_config(client, manager_config()).await?;
        Ok(Self::new(manager))
    }
}

/// `ConnectionManager` settings for blocking group reads: no response
/// timeout, reconnects as usual
pub fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new().set_response_timeout(None)
}

#[async_trait]
impl<C> LogStore for RedisStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn ensure_group(&self, stream: &str, group: &str) -> QueueResult<GroupStatus> {
        let mut conn = self.conn.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$") // Only entries appended from now on
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(stream = %stream, group = %group, "Created consumer group");
                Ok(GroupStatus::Created)
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %stream, group = %group, "Consumer group already exists");
                Ok(GroupStatus::AlreadyExists)
            }
            Err(e) => Err(QueueError::Redis(e)),
        }
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> QueueResult<EntryId> {
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }

        let id: String = cmd.query_async(&mut conn).await?;
        Ok(EntryId::from(id))
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
        stream: &str,
    ) -> QueueResult<Vec<StoreEntry>> {
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer);
        cmd.arg("COUNT").arg(count.max(1));

        // BLOCK 0 means "wait forever" to Redis, so a zero window is sent as no BLOCK at all
        if let Some(block) = block.filter(|b| !b.is_zero()) {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }

        cmd.arg("STREAMS").arg(stream).arg(">");

        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(to_store_entry)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: &EntryId) -> QueueResult<u64> {
        let mut conn = self.conn.clone();

        let acked: u64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id.as_str())
            .query_async(&mut conn)
            .await?;

        Ok(acked)
    }

    async fn range_rev(&self, stream: &str, count: usize) -> QueueResult<Vec<StoreEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrevrange_count(stream, "+", "-", count).await?;
        Ok(reply.ids.into_iter().map(to_store_entry).collect())
    }

    async fn len(&self, stream: &str) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.xlen(stream).await?;
        Ok(len)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> QueueResult<u64> {
        let mut conn = self.conn.clone();

        // Summary form: [count, smallest id, greatest id, [[consumer, count], ...]]
        let (count, _, _, _): (u64, Value, Value, Value) = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }
}

fn to_store_entry(entry: StreamId) -> StoreEntry {
    let mut keys: Vec<&String> = entry.map.keys().collect();
    keys.sort();

    let fields: Fields = keys
        .into_iter()
        .filter_map(|key| {
            entry
                .get::<String>(key)
                .map(|value| (key.clone(), value))
        })
        .collect();

    StoreEntry::new(entry.id.clone(), fields)
}
