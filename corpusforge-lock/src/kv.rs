use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use corpusforge_core::Result;
use tokio::sync::{Mutex, Notify};

/// The small set of atomic primitives the KV-backed lock and queue are
/// built on: set-if-absent with TTL, compare-and-delete, and a blocking
/// list pop (the `brpoplpush`-equivalent `spec.md` §4.3 asks for, so
/// `acquire` can avoid busy polling). Grounded on
/// `original_source/baselines/task_queue/task_queue.py`, which is built
/// directly on these same Redis primitives.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Sets `key` to `value` only if absent, with a TTL. Returns `true`
    /// iff this call won the race and set the value.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Unconditionally sets `key` to `value` with a TTL, overwriting any
    /// current value (Redis `SETEX`).
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Deletes `key` iff its current value equals `expected`. Returns
    /// `true` iff the key was deleted.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically increments the integer stored at `key` (treating an
    /// absent key as 0) and returns the new value (Redis `INCR`). Used
    /// for the queue's per-task retry counters.
    async fn incr(&self, key: &str) -> Result<i64>;

    async fn list_push_front(&self, list: &str, value: &str);
    async fn list_push_back(&self, list: &str, value: &str);

    /// Pops the oldest (front) element, blocking up to `timeout`
    /// (`None` = forever) for one to appear.
    async fn list_pop_front_block(&self, list: &str, timeout: Option<Duration>) -> Option<String>;

    async fn list_remove_first(&self, list: &str, value: &str) -> bool;
    async fn list_items(&self, list: &str) -> Vec<String>;
    async fn list_len(&self, list: &str) -> usize {
        self.list_items(list).await.len()
    }

    /// Empties `list` entirely. Used by the allocator's write-once
    /// seeding: the pending queue is cleared before new tasks are put.
    async fn list_clear(&self, list: &str);
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// Reference KV backend used by tests and single-machine runs: an
/// in-process map guarded by a mutex, with a `Notify` per list to wake
/// blocked poppers. A production deployment swaps this for a real KV
/// store (Redis, etcd, …) behind the same `KvStore` trait — no caller in
/// this workspace depends on the concrete backend.
#[derive(Default)]
pub struct InMemoryKvStore {
    keys: Mutex<std::collections::HashMap<String, Entry>>,
    lists: Mutex<std::collections::HashMap<String, VecDeque<String>>>,
    notify: Notify,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        match entry.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut keys = self.keys.lock().await;
        if let Some(existing) = keys.get(key) {
            if Self::is_live(existing) {
                return Ok(false);
            }
        }
        keys.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut keys = self.keys.lock().await;
        keys.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut keys = self.keys.lock().await;
        match keys.get(key) {
            Some(entry) if Self::is_live(entry) => Ok(Some(entry.value.clone())),
            Some(_) => {
                keys.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut keys = self.keys.lock().await;
        let current = match keys.get(key) {
            Some(entry) if Self::is_live(entry) => entry.value.parse::<i64>().unwrap_or(0),
            _ => 0,
        };
        let next = current + 1;
        keys.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let mut keys = self.keys.lock().await;
        match keys.get(key) {
            Some(entry) if Self::is_live(entry) && entry.value == expected => {
                keys.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.keys.lock().await.remove(key);
        Ok(())
    }

    async fn list_push_front(&self, list: &str, value: &str) {
        let mut lists = self.lists.lock().await;
        lists.entry(list.to_string()).or_default().push_front(value.to_string());
        self.notify.notify_waiters();
    }

    async fn list_push_back(&self, list: &str, value: &str) {
        let mut lists = self.lists.lock().await;
        lists.entry(list.to_string()).or_default().push_back(value.to_string());
        self.notify.notify_waiters();
    }

    async fn list_pop_front_block(&self, list: &str, timeout: Option<Duration>) -> Option<String> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            {
                let mut lists = self.lists.lock().await;
                if let Some(item) = lists.get_mut(list).and_then(VecDeque::pop_front) {
                    return Some(item);
                }
            }
            match deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
                }
                None => {
                    self.notify.notified().await;
                }
            }
        }
    }

    async fn list_remove_first(&self, list: &str, value: &str) -> bool {
        let mut lists = self.lists.lock().await;
        if let Some(queue) = lists.get_mut(list) {
            if let Some(pos) = queue.iter().position(|v| v == value) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    async fn list_items(&self, list: &str) -> Vec<String> {
        let lists = self.lists.lock().await;
        lists.get(list).cloned().unwrap_or_default().into()
    }

    async fn list_clear(&self, list: &str) {
        self.lists.lock().await.remove(list);
    }
}
