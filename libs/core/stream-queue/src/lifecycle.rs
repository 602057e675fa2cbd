//! Delayed send tracking and shutdown
//!
//! Every delayed send runs as its own tokio task, registered in
//! [`PendingSends`] until its delay elapses. A [`ShutdownHandle`] aborts all
//! registered tasks. The queue never installs signal handlers itself; the
//! owning process calls [`ShutdownHandle::cancel_pending`] from its own
//! signal handling.
//!
//! Once a task has left the registry (its delay elapsed) the append is in
//! flight and can no longer be cancelled.

use crate::message::EntryId;
use crate::metrics::QueueMetrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
struct PendingSend {
    handle: AbortHandle,
    delay: Duration,
    due_at: DateTime<Utc>,
}

/// Registry of delayed sends that have not reached their due time.
#[derive(Debug, Clone, Default)]
pub struct PendingSends {
    inner: Arc<Mutex<HashMap<Uuid, PendingSend>>>,
}

impl PendingSends {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, PendingSend>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `task` and register it under `id`.
    ///
    /// The lock is held across the spawn so the task cannot observe the
    /// registry before its own handle is in it.
    pub(crate) fn spawn<F>(&self, id: Uuid, delay: Duration, task: F) -> DateTime<Utc>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let due_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut pending = self.lock();
        let handle = tokio::spawn(task).abort_handle();
        pending.insert(
            id,
            PendingSend {
                handle,
                delay,
                due_at,
            },
        );

        due_at
    }

    /// Claim a send whose delay elapsed. Returns `false` when it was
    /// cancelled in the meantime.
    pub(crate) fn claim(&self, id: &Uuid) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Cancel one pending send
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.lock().remove(id) {
            Some(send) => {
                send.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending send, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(Uuid, PendingSend)> = self.lock().drain().collect();

        for (id, send) in &drained {
            send.handle.abort();
            debug!(
                send_id = %id,
                delay_ms = send.delay.as_millis() as u64,
                due_at = %send.due_at,
                "Cancelled delayed send"
            );
        }

        drained.len()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Handle the owning process uses to stop a queue's delayed sends.
#[derive(Clone)]
pub struct ShutdownHandle {
    stream: String,
    pending: PendingSends,
    metrics: QueueMetrics,
}

impl ShutdownHandle {
    pub(crate) fn new(
        stream: impl Into<String>,
        pending: PendingSends,
        metrics: QueueMetrics,
    ) -> Self {
        Self {
            stream: stream.into(),
            pending,
            metrics,
        }
    }

    /// Cancel every delayed send still waiting for its due time.
    ///
    /// Sends already inside the retry executor are not interrupted.
    pub fn cancel_pending(&self) -> usize {
        let cancelled = self.pending.cancel_all();

        info!(
            stream = %self.stream,
            cancelled = cancelled,
            "Cancelled pending delayed sends"
        );
        self.metrics.sends_cancelled(cancelled);
        self.metrics.pending_sends(0);

        cancelled
    }

    /// Number of delayed sends still waiting
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// A delayed send that has been scheduled but not yet appended.
///
/// The entry id only exists once the delay has elapsed and the append
/// succeeded; await [`ScheduledSend::appended`] to observe it.
#[derive(Debug)]
pub struct ScheduledSend {
    id: Uuid,
    due_at: DateTime<Utc>,
    pending: PendingSends,
    metrics: QueueMetrics,
    result: oneshot::Receiver<Option<EntryId>>,
}

impl ScheduledSend {
    pub(crate) fn new(
        id: Uuid,
        due_at: DateTime<Utc>,
        pending: PendingSends,
        metrics: QueueMetrics,
        result: oneshot::Receiver<Option<EntryId>>,
    ) -> Self {
        Self {
            id,
            due_at,
            pending,
            metrics,
            result,
        }
    }

    /// Registry key of this send
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the append is due
    pub fn due_at(&self) -> DateTime<Utc> {
        self.due_at
    }

    /// Still waiting for its due time (not yet appending, not cancelled)
    pub fn is_pending(&self) -> bool {
        self.pending.contains(&self.id)
    }

    /// Cancel this send if it has not started appending
    pub fn cancel(&self) -> bool {
        if !self.pending.cancel(&self.id) {
            return false;
        }

        debug!(send_id = %self.id, due_at = %self.due_at, "Cancelled delayed send");
        self.metrics.sends_cancelled(1);
        self.metrics.pending_sends(self.pending.len());
        true
    }

    /// Wait for the append. `None` if the send was cancelled or every
    /// append attempt failed.
    pub async fn appended(self) -> Option<EntryId> {
        self.result.await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_claim_after_delay() {
        let pending = PendingSends::new();
        let id = Uuid::new_v4();
        let ran = Arc::new(AtomicBool::new(false));

        let registry = pending.clone();
        let flag = ran.clone();
        pending.spawn(id, Duration::from_secs(1), async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if registry.claim(&id) {
                flag.store(true, Ordering::SeqCst);
            }
        });

        assert_eq!(pending.len(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(ran.load(Ordering::SeqCst));
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_prevents_work() {
        let pending = PendingSends::new();
        let ran = Arc::new(AtomicBool::new(false));

        for _ in 0..3 {
            let id = Uuid::new_v4();
            let registry = pending.clone();
            let flag = ran.clone();
            pending.spawn(id, Duration::from_secs(5), async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                if registry.claim(&id) {
                    flag.store(true, Ordering::SeqCst);
                }
            });
        }

        assert_eq!(pending.cancel_all(), 3);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(pending.cancel_all(), 0);
    }

    #[tokio::test]
    async fn test_cancel_single() {
        let pending = PendingSends::new();
        let id = Uuid::new_v4();
        pending.spawn(id, Duration::from_secs(60), std::future::pending());

        assert!(pending.contains(&id));
        assert!(pending.cancel(&id));
        assert!(!pending.cancel(&id));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_cancel_updates_metrics() {
        let pending = PendingSends::new();
        let id = Uuid::new_v4();
        let due_at = pending.spawn(id, Duration::from_secs(60), std::future::pending());
        pending.spawn(Uuid::new_v4(), Duration::from_secs(60), std::future::pending());

        let (_tx, rx) = oneshot::channel();
        let scheduled =
            ScheduledSend::new(id, due_at, pending.clone(), QueueMetrics::new("jobs"), rx);

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            assert!(scheduled.cancel());
            assert!(!scheduled.cancel());
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"stream_queue_sends_cancelled_total{stream="jobs"} 1"#));
        assert!(rendered.contains(r#"stream_queue_pending_sends{stream="jobs"} 1"#));
        assert!(!scheduled.is_pending());
        assert_eq!(pending.len(), 1);
    }
}
