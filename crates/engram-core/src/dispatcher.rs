//! Fire-and-forget tracking dispatcher
//!
//! Access tracking must never slow down or fail a read path. Producers
//! push primitive task payloads onto a bounded queue and move on; a small
//! worker pool drains it against the store. When the queue is full the
//! task is dropped, logged, and counted - under overload the system
//! sheds tracking, not latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::learning::ActivityLog;
use crate::storage::Store;

/// A queued tracking task; carries only primitive inputs
#[derive(Debug, Clone)]
pub enum TrackTask {
    /// Record one access against a memory
    Access {
        principal_id: String,
        memory_id: String,
        context: Option<String>,
    },
}

/// Handle for enqueueing tracking work
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<TrackTask>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl Dispatcher {
    /// Spawn `workers` drain tasks over a queue of `capacity`
    pub fn spawn(
        store: Arc<Store>,
        activity: Arc<ActivityLog>,
        capacity: usize,
        workers: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel::<TrackTask>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let store = Arc::clone(&store);
            let activity = Arc::clone(&activity);
            tokio::spawn(async move {
                loop {
                    let task = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(task) = task else {
                        debug!(worker, "tracking queue closed, worker exiting");
                        break;
                    };
                    run_task(&store, &activity, task);
                }
            });
        }

        Self {
            tx,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue without blocking; drops and counts when the queue is full
    pub fn enqueue(&self, task: TrackTask) {
        if let Err(e) = self.tx.try_send(task) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "tracking queue full, dropping task");
        }
    }

    /// Current queue depth
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Tasks dropped since startup
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn run_task(store: &Store, activity: &ActivityLog, task: TrackTask) {
    match task {
        TrackTask::Access {
            principal_id,
            memory_id,
            context,
        } => {
            match store.record_access(&memory_id, context.as_deref()) {
                Ok(()) => activity.record(&principal_id, &memory_id, context.as_deref()),
                // Tracking failures never surface; the memory may have been
                // deleted between the read and this task draining.
                Err(e) => warn!(
                    memory_id,
                    error = %e,
                    "record_access failed in background"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::CreateMemoryInput;
    use crate::memory::MemoryRecord;
    use std::time::Duration;

    fn test_store() -> (Arc<Store>, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::open(Some(dir.path().join("test.db"))).unwrap();
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn test_enqueue_drains_to_store() {
        let (store, _dir) = test_store();
        let record = MemoryRecord::new("p-1", CreateMemoryInput::from_text("tracked"));
        let id = record.id.clone();
        store.insert_memory(&record, None).unwrap();

        let activity = Arc::new(ActivityLog::new());
        let dispatcher = Dispatcher::spawn(Arc::clone(&store), Arc::clone(&activity), 16, 1);

        dispatcher.enqueue(TrackTask::Access {
            principal_id: "p-1".to_string(),
            memory_id: id.clone(),
            context: Some("coding".to_string()),
        });

        // Give the worker a moment to drain.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let current = store.get_memory("p-1", &id).unwrap().unwrap();
            if current.usage_count == 1 {
                break;
            }
        }

        let current = store.get_memory("p-1", &id).unwrap().unwrap();
        assert_eq!(current.usage_count, 1);
        assert_eq!(current.access_pattern.contexts.get("coding"), Some(&1));
        assert_eq!(activity.snapshot("p-1").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_memory_is_swallowed() {
        let (store, _dir) = test_store();
        let activity = Arc::new(ActivityLog::new());
        let dispatcher = Dispatcher::spawn(store, activity, 16, 1);

        dispatcher.enqueue(TrackTask::Access {
            principal_id: "p-1".to_string(),
            memory_id: "no-such-memory".to_string(),
            context: None,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.dropped_count(), 0);
    }
}
