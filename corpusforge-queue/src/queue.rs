use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use corpusforge_core::{PipelineError, Result};
use corpusforge_lock::KvStore;
use tracing::{info, warn};

use crate::task::{Task, TaskStatus, Worker};

/// Lease TTL a task's `processing:<id>` key carries before
/// `requeue_expired` treats it as abandoned. Matches `TASK_TIMEOUT =
/// 7200` in `original_source/baselines/task_queue/task_queue.py`.
pub const LEASE_TTL: Duration = Duration::from_secs(7200);

const TASK_QUEUE_SUFFIX: &str = "task_queue";
const PROCESSING_QUEUE_SUFFIX: &str = "processing_queue";
const FINISHED_QUEUE_SUFFIX: &str = "finished_queue";
const PROCESSING_KEY_PREFIX: &str = "processing:";
const ATTEMPTS_KEY_PREFIX: &str = "attempts:";

/// Per-queue operator knobs. `max_retries: None` requeues a lost task
/// indefinitely, matching the Python original; `Some(n)` dead-letters it
/// after `n` failed attempts — the retry-policy Open Question resolution.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue_id: String,
    pub max_retries: Option<u32>,
    pub lease_ttl: Duration,
}

impl QueueConfig {
    pub fn new(queue_id: impl Into<String>) -> Self {
        Self {
            queue_id: queue_id.into(),
            max_retries: None,
            lease_ttl: LEASE_TTL,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// FIFO work queue with an at-least-once, lease-based delivery model:
/// `acquire` atomically moves a task from pending to in-flight and tags
/// it with a TTL'd lease key; `complete` clears both; `requeue_expired`
/// reclaims tasks whose lease died with their worker. Grounded on
/// `original_source/baselines/task_queue/task_queue.py::TaskQueue`.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn put(&self, task: Task) -> Result<()>;

    /// Pushes to the front of the pending queue, for fast-tracked
    /// resubmission (e.g. the oversize splitter's chunk tasks).
    async fn put_to_head(&self, task: Task) -> Result<()>;

    /// Blocks (up to `timeout`, `None` = forever) until a task is
    /// available, then claims it under `worker_key`.
    async fn acquire(&self, worker_key: &str, timeout: Option<Duration>) -> Result<Option<Task>>;

    async fn complete(&self, task: &Task) -> Result<()>;

    /// Explicit failure path: either requeues the task for another
    /// attempt or dead-letters it into the finished queue with
    /// `TaskStatus::Failed`, depending on `QueueConfig::max_retries`.
    async fn requeue(&self, task: &Task) -> Result<()>;

    /// Scans the in-flight list for tasks whose lease key has expired
    /// (worker died without completing) and requeues them. Returns the
    /// count reclaimed.
    async fn requeue_expired(&self) -> Result<usize>;

    async fn all_finished(&self) -> Result<bool>;

    async fn size(&self) -> Result<usize>;

    /// Empties the pending list. The allocator calls this once before
    /// seeding a fresh corpus walk (`spec.md` §4.4's "allocation is
    /// write-once").
    async fn clear_pending(&self) -> Result<()>;
}

/// `TaskQueue` over the generic `KvStore` abstraction: pending/in-flight
/// lists plus a per-task TTL lease key and a per-task attempt counter.
pub struct KvTaskQueue {
    kv: Arc<dyn KvStore>,
    config: QueueConfig,
}

impl KvTaskQueue {
    pub fn new(kv: Arc<dyn KvStore>, config: QueueConfig) -> Self {
        Self { kv, config }
    }

    fn pending_list(&self) -> String {
        format!("{}_{}", self.config.queue_id, TASK_QUEUE_SUFFIX)
    }

    fn processing_list(&self) -> String {
        format!("{}_{}", self.config.queue_id, PROCESSING_QUEUE_SUFFIX)
    }

    fn finished_list(&self) -> String {
        format!("{}_{}", self.config.queue_id, FINISHED_QUEUE_SUFFIX)
    }

    fn lease_key(&self, task_id: &str) -> String {
        format!("{}_{}{}", self.config.queue_id, PROCESSING_KEY_PREFIX, task_id)
    }

    fn attempts_key(&self, task_id: &str) -> String {
        format!("{}_{}{}", self.config.queue_id, ATTEMPTS_KEY_PREFIX, task_id)
    }

    fn encode(task: &Task) -> Result<String> {
        serde_json::to_string(task).map_err(|e| PipelineError::Config(e.to_string()))
    }

    fn decode(raw: &str) -> Result<Task> {
        serde_json::from_str(raw).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Shared requeue-or-dead-letter decision used by both the explicit
    /// failure path and expired-lease reclamation.
    async fn requeue_or_dead_letter(&self, mut task: Task) -> Result<()> {
        let attempts = self.kv.incr(&self.attempts_key(task.id())).await?;
        let exhausted = self
            .config
            .max_retries
            .map(|max| attempts as u64 > max as u64)
            .unwrap_or(false);

        if exhausted {
            warn!(task_id = task.id(), attempts, "dead-lettering task after max_retries");
            task.worker = Some(Worker {
                key: task
                    .worker
                    .as_ref()
                    .map(|w| w.key.clone())
                    .unwrap_or_default(),
                status: TaskStatus::Failed,
                process_time: task
                    .worker
                    .as_ref()
                    .map(|w| w.process_time)
                    .unwrap_or_else(Utc::now),
                finish_time: None,
                fail_time: Some(Utc::now()),
            });
            let encoded = Self::encode(&task)?;
            self.kv.list_push_back(&self.finished_list(), &encoded).await;
        } else {
            task.worker = None;
            let encoded = Self::encode(&task)?;
            // Requeued tasks jump to the front, matching the Python
            // original's `lpush` back onto the pending queue.
            self.kv.list_push_front(&self.pending_list(), &encoded).await;
        }
        Ok(())
    }

    async fn find_in_processing(&self, task_id: &str) -> Result<Option<String>> {
        for raw in self.kv.list_items(&self.processing_list()).await {
            if let Ok(t) = Self::decode(&raw) {
                if t.id() == task_id {
                    return Ok(Some(raw));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl TaskQueue for KvTaskQueue {
    async fn put(&self, task: Task) -> Result<()> {
        let encoded = Self::encode(&task)?;
        self.kv.list_push_back(&self.pending_list(), &encoded).await;
        Ok(())
    }

    async fn put_to_head(&self, task: Task) -> Result<()> {
        let encoded = Self::encode(&task)?;
        self.kv.list_push_front(&self.pending_list(), &encoded).await;
        Ok(())
    }

    async fn acquire(&self, worker_key: &str, timeout: Option<Duration>) -> Result<Option<Task>> {
        let raw = match self.kv.list_pop_front_block(&self.pending_list(), timeout).await {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let mut task = Self::decode(&raw)?;
        task.worker = Some(Worker {
            key: worker_key.to_string(),
            status: TaskStatus::InProgress,
            process_time: Utc::now(),
            finish_time: None,
            fail_time: None,
        });
        let encoded = Self::encode(&task)?;
        self.kv.list_push_back(&self.processing_list(), &encoded).await;
        self.kv
            .set_ex(&self.lease_key(task.id()), &encoded, self.config.lease_ttl)
            .await?;
        info!(task_id = task.id(), worker_key, "task acquired");
        Ok(Some(task))
    }

    async fn complete(&self, task: &Task) -> Result<()> {
        if let Some(raw) = self.find_in_processing(task.id()).await? {
            self.kv.list_remove_first(&self.processing_list(), &raw).await;
        } else {
            // Already completed (or was never in-flight under this
            // queue) — a no-op, matching the idempotent-complete
            // invariant.
            return Ok(());
        }
        self.kv.delete(&self.lease_key(task.id())).await?;
        self.kv.delete(&self.attempts_key(task.id())).await?;

        let mut finished = task.clone();
        let now = Utc::now();
        finished.worker = Some(Worker {
            key: finished.worker.as_ref().map(|w| w.key.clone()).unwrap_or_default(),
            status: TaskStatus::Finished,
            process_time: finished.worker.as_ref().map(|w| w.process_time).unwrap_or(now),
            finish_time: Some(now),
            fail_time: None,
        });
        let encoded = Self::encode(&finished)?;
        self.kv.list_push_back(&self.finished_list(), &encoded).await;
        Ok(())
    }

    async fn requeue(&self, task: &Task) -> Result<()> {
        if let Some(raw) = self.find_in_processing(task.id()).await? {
            self.kv.list_remove_first(&self.processing_list(), &raw).await;
        }
        self.kv.delete(&self.lease_key(task.id())).await?;
        self.requeue_or_dead_letter(task.clone()).await
    }

    async fn requeue_expired(&self) -> Result<usize> {
        let mut reclaimed = 0;
        for raw in self.kv.list_items(&self.processing_list()).await {
            let task = match Self::decode(&raw) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if self.kv.exists(&self.lease_key(task.id())).await? {
                continue;
            }
            warn!(task_id = task.id(), "requeuing expired task");
            self.kv.list_remove_first(&self.processing_list(), &raw).await;
            self.requeue_or_dead_letter(task).await?;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    async fn all_finished(&self) -> Result<bool> {
        Ok(self.kv.list_len(&self.pending_list()).await == 0
            && self.kv.list_len(&self.processing_list()).await == 0)
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.kv.list_len(&self.pending_list()).await)
    }

    async fn clear_pending(&self) -> Result<()> {
        self.kv.list_clear(&self.pending_list()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusforge_lock::InMemoryKvStore;

    fn queue(max_retries: Option<u32>) -> KvTaskQueue {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let mut config = QueueConfig::new("test");
        config.max_retries = max_retries;
        KvTaskQueue::new(kv, config)
    }

    #[tokio::test]
    async fn put_then_acquire_roundtrips_and_tags_worker() {
        let q = queue(None);
        let task = Task::new("root/shard-0", vec![0, 10], false, vec![], None);
        let id = task.id().to_string();
        q.put(task).await.unwrap();

        let acquired = q.acquire("host_1", Some(Duration::from_millis(50))).await.unwrap().unwrap();
        assert_eq!(acquired.id(), id);
        assert_eq!(acquired.worker.unwrap().key, "host_1");
        assert!(!q.all_finished().await.unwrap());
    }

    #[tokio::test]
    async fn acquire_times_out_on_empty_queue() {
        let q = queue(None);
        let result = q.acquire("host_1", Some(Duration::from_millis(20))).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn complete_clears_processing_and_lease() {
        let q = queue(None);
        let task = Task::new("root/shard-0", vec![0, 10], false, vec![], None);
        q.put(task).await.unwrap();
        let acquired = q.acquire("host_1", None).await.unwrap().unwrap();

        q.complete(&acquired).await.unwrap();
        assert!(q.all_finished().await.unwrap());
    }

    #[tokio::test]
    async fn requeue_without_max_retries_returns_to_pending_indefinitely() {
        let q = queue(None);
        let task = Task::new("root/shard-0", vec![0, 10], false, vec![], None);
        q.put(task).await.unwrap();

        for _ in 0..5 {
            let acquired = q.acquire("host_1", None).await.unwrap().unwrap();
            q.requeue(&acquired).await.unwrap();
        }
        assert_eq!(q.size().await.unwrap(), 1);
        // Not all-finished: a task still sits in pending awaiting
        // another attempt.
        assert!(!q.all_finished().await.unwrap());
    }

    #[tokio::test]
    async fn requeue_dead_letters_after_max_retries() {
        let q = queue(Some(2));
        let task = Task::new("root/shard-0", vec![0, 10], false, vec![], None);
        q.put(task).await.unwrap();

        for _ in 0..2 {
            let acquired = q.acquire("host_1", None).await.unwrap().unwrap();
            q.requeue(&acquired).await.unwrap();
        }
        // Third attempt exceeds max_retries=2 and dead-letters instead
        // of returning to pending.
        let acquired = q.acquire("host_1", None).await.unwrap().unwrap();
        q.requeue(&acquired).await.unwrap();

        assert_eq!(q.size().await.unwrap(), 0);
        assert!(q.all_finished().await.unwrap());
    }

    #[tokio::test]
    async fn requeue_expired_reclaims_tasks_with_dead_leases() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let mut config = QueueConfig::new("test");
        config.lease_ttl = Duration::from_millis(10);
        let q = KvTaskQueue::new(kv, config);

        let task = Task::new("root/shard-0", vec![0, 10], false, vec![], None);
        q.put(task).await.unwrap();
        q.acquire("host_1", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let reclaimed = q.requeue_expired().await.unwrap();
        assert_eq!(reclaimed, 1);
        assert_eq!(q.size().await.unwrap(), 1);
        assert!(!q.all_finished().await.unwrap());
    }

    #[tokio::test]
    async fn requeue_expired_ignores_tasks_with_live_leases() {
        let q = queue(None);
        let task = Task::new("root/shard-0", vec![0, 10], false, vec![], None);
        q.put(task).await.unwrap();
        q.acquire("host_1", None).await.unwrap();

        let reclaimed = q.requeue_expired().await.unwrap();
        assert_eq!(reclaimed, 0);
        assert!(!q.all_finished().await.unwrap());
    }
}
