//! Work queue over a consumer-group log store
//!
//! A [`Queue`] binds one stream key and one consumer group. Producers append
//! JSON envelopes, immediately or after a delay; consumers compete for new
//! entries through the group so each entry is delivered to exactly one of
//! them. Every store call goes through the retry executor.

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::event::{ErrorOrigin, EventBus, QueueEvent};
use crate::lifecycle::{PendingSends, ScheduledSend, ShutdownHandle};
use crate::message::{EntryId, QueueMessage, encode_envelope};
use crate::metrics::QueueMetrics;
use crate::retry::retry_with_backoff_if;
use crate::store::{GroupStatus, LogStore, RedisStore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, broadcast, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of a successful `send_message`
#[derive(Debug)]
pub enum SendReceipt {
    /// Appended now, with the store-assigned id
    Appended(EntryId),
    /// Will be appended once its delay elapses
    Scheduled(ScheduledSend),
}

impl SendReceipt {
    /// Entry id of an immediate send
    pub fn entry_id(&self) -> Option<&EntryId> {
        match self {
            SendReceipt::Appended(id) => Some(id),
            SendReceipt::Scheduled(_) => None,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, SendReceipt::Scheduled(_))
    }
}

/// Outcome of acknowledging a delivered entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The store accepted the acknowledgment
    Acknowledged,
    /// Every attempt failed; the entry stays pending for the group
    Abandoned,
}

impl AckOutcome {
    pub fn is_acknowledged(&self) -> bool {
        *self == AckOutcome::Acknowledged
    }
}

/// Competing-consumers queue on a single stream.
///
/// `Queue` is `Send + Sync`; share it across tasks with `Arc<Queue>`.
pub struct Queue<S = RedisStore> {
    store: Arc<S>,
    config: QueueConfig,
    events: EventBus,
    metrics: QueueMetrics,
    pending: PendingSends,
    group_ready: OnceCell<()>,
}

impl Queue<RedisStore> {
    /// Connect to Redis at `url` and open a queue on it
    pub async fn connect(url: &str, config: QueueConfig) -> QueueResult<Self> {
        let store = RedisStore::connect(url).await?;
        Self::open(Arc::new(store), config).await
    }
}

impl<S> Queue<S>
where
    S: LogStore + 'static,
{
    /// Create a queue without touching the store.
    ///
    /// The consumer group is created lazily on the first send or receive, or
    /// eagerly with [`Queue::initialize`].
    pub fn new(store: Arc<S>, config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;

        let stream = config.queue_name.clone();
        Ok(Self {
            store,
            events: EventBus::new(stream.clone()),
            metrics: QueueMetrics::new(stream),
            pending: PendingSends::new(),
            group_ready: OnceCell::new(),
            config,
        })
    }

    /// Create a queue and try to create its consumer group.
    ///
    /// A group creation failure is reported as a `GroupInit` event and
    /// does not fail construction; the next send or receive tries again.
    pub async fn open(store: Arc<S>, config: QueueConfig) -> QueueResult<Self> {
        let queue = Self::new(store, config)?;
        // Failure already logged and published
        let _ = queue.initialize().await;
        Ok(queue)
    }

    /// Create the consumer group if it does not exist.
    pub async fn initialize(&self) -> QueueResult<GroupStatus> {
        let stream = self.config.queue_name.as_str();
        let group = self.config.consumer_group.as_str();
        let store = &*self.store;

        let result = retry_with_backoff_if(
            move || store.ensure_group(stream, group),
            &self.config.retry,
            QueueError::is_retryable,
        )
        .await;

        match result {
            Ok(status) => {
                debug!(stream = %stream, group = %group, status = ?status, "Consumer group ready");
                let _ = self.group_ready.set(());
                Ok(status)
            }
            Err(e) => {
                self.report(
                    ErrorOrigin::GroupInit,
                    format!("failed to create consumer group '{}': {}", group, e),
                );
                Err(e)
            }
        }
    }

    /// Create the consumer group once per queue instance.
    ///
    /// Success is cached; a failure is not, so the next call tries again.
    pub async fn ensure_group(&self) -> QueueResult<()> {
        self.group_ready
            .get_or_try_init(|| async { self.initialize().await.map(|_| ()) })
            .await
            .map(|_| ())
    }

    /// Append `payload` to the stream, now or after `delay`.
    ///
    /// Returns `Ok(None)` when the payload cannot be encoded or every append
    /// attempt fails; both cases are also published as `Append` events.
    /// A delayed send returns at once with a [`ScheduledSend`].
    pub async fn send_message<T>(
        &self,
        payload: &T,
        delay: Duration,
    ) -> QueueResult<Option<SendReceipt>>
    where
        T: Serialize + ?Sized,
    {
        self.config.validate()?;

        let fields = match encode_envelope(payload) {
            Ok(fields) => fields,
            Err(e) => {
                self.report(ErrorOrigin::Append, format!("failed to encode payload: {}", e));
                return Ok(None);
            }
        };

        // Failure already published; the store call below reports its own error
        let _ = self.ensure_group().await;

        if !delay.is_zero() {
            return Ok(Some(SendReceipt::Scheduled(self.schedule(fields, delay))));
        }

        let stream = self.config.queue_name.as_str();
        let store = &*self.store;
        let result = retry_with_backoff_if(
            || store.append(stream, &fields),
            &self.config.retry,
            QueueError::is_retryable,
        )
        .await;

        match result {
            Ok(id) => {
                self.metrics.message_sent();
                debug!(stream = %stream, stream_id = %id, "Message sent");
                Ok(Some(SendReceipt::Appended(id)))
            }
            Err(e) => {
                self.report(ErrorOrigin::Append, format!("failed to append message: {}", e));
                Ok(None)
            }
        }
    }

    /// [`Queue::send_message`] with the delay in whole seconds
    pub async fn send_message_secs<T>(
        &self,
        payload: &T,
        delay_secs: u64,
    ) -> QueueResult<Option<SendReceipt>>
    where
        T: Serialize + ?Sized,
    {
        self.send_message(payload, Duration::from_secs(delay_secs))
            .await
    }

    fn schedule(&self, fields: Vec<(String, String)>, delay: Duration) -> ScheduledSend {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        let store = self.store.clone();
        let stream = self.config.queue_name.clone();
        let retry = self.config.retry.clone();
        let events = self.events.clone();
        let metrics = self.metrics.clone();
        let pending = self.pending.clone();

        let due_at = self.pending.spawn(id, delay, async move {
            tokio::time::sleep(delay).await;

            if !pending.claim(&id) {
                return;
            }
            metrics.pending_sends(pending.len());

            let result = retry_with_backoff_if(
                || store.append(&stream, &fields),
                &retry,
                QueueError::is_retryable,
            )
            .await;

            let appended = match result {
                Ok(entry_id) => {
                    metrics.message_sent();
                    debug!(
                        stream = %stream,
                        stream_id = %entry_id,
                        send_id = %id,
                        "Delayed message sent"
                    );
                    Some(entry_id)
                }
                Err(e) => {
                    metrics.error(ErrorOrigin::DelayedAppend);
                    events.error(
                        ErrorOrigin::DelayedAppend,
                        format!("failed to append delayed message: {}", e),
                    );
                    None
                }
            };

            // Receiver may have been dropped
            let _ = tx.send(appended);
        });

        self.metrics.message_scheduled();
        self.metrics.pending_sends(self.pending.len());
        debug!(
            stream = %self.config.queue_name,
            send_id = %id,
            delay_ms = delay.as_millis() as u64,
            due_at = %due_at,
            "Message scheduled"
        );

        ScheduledSend::new(id, due_at, self.pending.clone(), self.metrics.clone(), rx)
    }

    /// Read one new entry for `consumer`, waiting up to `block_time_ms`.
    ///
    /// A zero block time returns immediately. `Ok(None)` means nothing
    /// arrived. An entry whose body cannot be decoded into `T` is returned
    /// as [`QueueError::Decode`] and left unacknowledged.
    pub async fn receive_message<T>(
        &self,
        consumer: &str,
        block_time_ms: u64,
    ) -> QueueResult<Option<QueueMessage<T>>>
    where
        T: DeserializeOwned,
    {
        self.config.validate()?;
        if consumer.trim().is_empty() {
            return Err(QueueError::precondition("consumer name cannot be empty"));
        }

        // Failure already published; the store call below reports its own error
        let _ = self.ensure_group().await;

        let stream = self.config.queue_name.as_str();
        let group = self.config.consumer_group.as_str();
        let block = (block_time_ms > 0).then(|| Duration::from_millis(block_time_ms));
        let store = &*self.store;
        let events = &self.events;
        let metrics = &self.metrics;

        let result = retry_with_backoff_if(
            move || async move {
                match store.read_group(group, consumer, 1, block, stream).await {
                    Ok(entries) => Ok(entries),
                    Err(e) => {
                        metrics.receive_error();
                        events.receive_error(e.to_string());
                        // Group removed underneath us; recreate before the next attempt
                        if e.is_nogroup() {
                            if let Err(init) = store.ensure_group(stream, group).await {
                                debug!(
                                    stream = %stream,
                                    group = %group,
                                    error = %init,
                                    "Failed to recreate consumer group"
                                );
                            }
                        }
                        Err(e)
                    }
                }
            },
            &self.config.retry,
            QueueError::is_retryable,
        )
        .await;

        let entries = match result {
            Ok(entries) => entries,
            Err(e) => {
                error!(
                    stream = %stream,
                    group = %group,
                    consumer = %consumer,
                    error = %e,
                    "Failed to receive message"
                );
                return Err(e);
            }
        };

        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };

        self.metrics.message_received();

        let message = match entry.decode::<T>() {
            Ok(message) => message,
            Err(e) => {
                self.metrics.receive_error();
                self.events.receive_error(e.to_string());
                return Err(e);
            }
        };

        debug!(
            stream = %stream,
            consumer = %consumer,
            stream_id = %message.stream_id,
            "Message received"
        );

        if self.config.auto_verify {
            self.verify_message(&message.stream_id).await;
        }

        Ok(Some(message))
    }

    /// Acknowledge a delivered entry for this queue's group.
    ///
    /// Never fails: exhaustion is reported as an `Acknowledge` event and
    /// [`AckOutcome::Abandoned`]. Acknowledging twice is harmless.
    pub async fn verify_message(&self, stream_id: &EntryId) -> AckOutcome {
        let stream = self.config.queue_name.as_str();
        let group = self.config.consumer_group.as_str();
        let store = &*self.store;

        let result = retry_with_backoff_if(
            || store.acknowledge(stream, group, stream_id),
            &self.config.retry,
            QueueError::is_retryable,
        )
        .await;

        match result {
            Ok(acked) => {
                self.metrics.message_acked(true);
                if acked == 0 {
                    debug!(stream = %stream, stream_id = %stream_id, "Entry was not pending");
                }
                AckOutcome::Acknowledged
            }
            Err(e) => {
                self.metrics.message_acked(false);
                self.report(
                    ErrorOrigin::Acknowledge,
                    format!("failed to acknowledge {}: {}", stream_id, e),
                );
                AckOutcome::Abandoned
            }
        }
    }

    fn report(&self, origin: ErrorOrigin, message: String) {
        self.metrics.error(origin);
        self.events.error(origin, message);
    }
}

impl<S> Queue<S> {
    /// Subscribe to non-fatal queue events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Handle for cancelling pending delayed sends from signal handling
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(
            self.config.queue_name.clone(),
            self.pending.clone(),
            self.metrics.clone(),
        )
    }

    /// Number of delayed sends still waiting for their due time
    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    /// Cancel every pending delayed send
    pub fn shutdown(&self) -> usize {
        let cancelled = self.shutdown_handle().cancel_pending();
        if cancelled > 0 {
            warn!(
                stream = %self.config.queue_name,
                cancelled = cancelled,
                "Queue shut down with pending sends"
            );
        } else {
            info!(stream = %self.config.queue_name, "Queue shut down");
        }
        cancelled
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The underlying log store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use crate::store::MemoryStore;
    use serde_json::{Value, json};

    fn queue() -> Queue<MemoryStore> {
        let config = QueueConfig::new("unit").with_retry(RetryConfig::no_retry());
        Queue::new(Arc::new(MemoryStore::new()), config).unwrap()
    }

    #[test]
    fn test_new_rejects_empty_names() {
        let store = Arc::new(MemoryStore::new());
        assert!(Queue::new(store.clone(), QueueConfig::new("")).is_err());
        assert!(Queue::new(store, QueueConfig::new("q").with_consumer_group(" ")).is_err());
    }

    #[tokio::test]
    async fn test_send_creates_group_lazily() {
        let queue = queue();
        let receipt = queue
            .send_message(&json!({"n": 1}), Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        assert!(receipt.entry_id().is_some());
        assert!(!receipt.is_scheduled());
        let pending = queue
            .store()
            .pending_count("stream-queue:unit", "Messages")
            .await
            .unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let queue = queue();
        assert_eq!(queue.initialize().await.unwrap(), GroupStatus::Created);
        assert_eq!(queue.initialize().await.unwrap(), GroupStatus::AlreadyExists);
    }

    #[tokio::test]
    async fn test_empty_consumer_is_precondition() {
        let queue = queue();
        let err = queue.receive_message::<Value>("", 0).await.unwrap_err();
        assert!(matches!(err, QueueError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_auto_verify_clears_pending() {
        let queue = queue();
        queue.send_message(&json!("job"), Duration::ZERO).await.unwrap();

        let message = queue.receive_message::<String>("c1", 0).await.unwrap().unwrap();
        assert_eq!(message.body, "job");

        let pending = queue
            .store()
            .pending_count("stream-queue:unit", "Messages")
            .await
            .unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_pending_sends() {
        let queue = queue();
        assert_eq!(queue.pending_sends(), 0);
        assert_eq!(queue.shutdown(), 0);
    }
}
