//! One-shot enumeration of an input corpus into queue-ready tasks
//! (`spec.md` §4.4 / C4). The allocator is a thin layer over the C1
//! `Store` listing contract and the C3 `TaskQueue`: it never touches a
//! filesystem or KV store directly, so it runs unchanged against either
//! backend pairing.

use corpusforge_core::{PipelineError, Result};
use corpusforge_queue::{Task, TaskQueue};
use corpusforge_storage::Store;
use tracing::info;

/// Whether the walk targets every leaf directory (`Process`) or only
/// `subject=`-prefixed directories' `processed_data/` subfolder
/// (`Dedup`), matching `spec.md` §4.4's two walk behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMode {
    Dedup,
    Process,
}

#[derive(Debug, Clone)]
pub struct AllocationConfig {
    pub root_uri: String,
    pub mode: AllocationMode,
    /// `-1` emits one task per shard directory covering the whole
    /// directory; any positive value chunks the directory's file
    /// listing into contiguous ranges of that size.
    pub chunk_size: i64,
}

struct Target {
    shard_dir: String,
    original_shard_dir: Option<String>,
    file_count: usize,
}

/// Walks `config.root_uri`, clears the queue's pending list (allocation
/// is write-once), and seeds one or more tasks per discovered shard
/// directory. Returns the number of tasks emitted.
pub async fn allocate(store: &dyn Store, queue: &dyn TaskQueue, config: &AllocationConfig) -> Result<usize> {
    queue.clear_pending().await?;

    let targets = discover_targets(store, config).await?;
    info!(root = %config.root_uri, targets = targets.len(), mode = ?config.mode, "allocator discovered shard targets");

    let mut emitted = 0;
    for target in &targets {
        emitted += emit_tasks_for_target(queue, target, config.chunk_size).await?;
    }
    info!(emitted, "allocator seeded queue");
    Ok(emitted)
}

async fn discover_targets(store: &dyn Store, config: &AllocationConfig) -> Result<Vec<Target>> {
    match config.mode {
        AllocationMode::Process => discover_process_targets(store, &config.root_uri).await,
        AllocationMode::Dedup => discover_dedup_targets(store, &config.root_uri).await,
    }
}

/// BFS over the tree; a directory with no subdirectories is a leaf shard
/// directory, materialised iff it has at least one file.
async fn discover_process_targets(store: &dyn Store, root_uri: &str) -> Result<Vec<Target>> {
    let mut stack = vec![root_uri.to_string()];
    let mut targets = Vec::new();

    while let Some(dir) = stack.pop() {
        let sub_dirs = store.list_sub_dirs(&dir).await?;
        if sub_dirs.is_empty() {
            let file_count = store.list_files(&dir).await?.len();
            if file_count > 0 {
                targets.push(Target {
                    shard_dir: dir,
                    original_shard_dir: None,
                    file_count,
                });
            }
        } else {
            stack.extend(sub_dirs);
        }
    }
    Ok(targets)
}

/// BFS over the tree; any directory whose basename starts with
/// `subject=` becomes a target whose files live under its
/// `processed_data/` subfolder, and whose `original_shard_dir` is the
/// `subject=` directory itself (used downstream for output naming).
/// Non-matching directories are recursed into further, since a
/// `subject=` directory may be nested arbitrarily deep.
async fn discover_dedup_targets(store: &dyn Store, root_uri: &str) -> Result<Vec<Target>> {
    let mut stack = vec![root_uri.to_string()];
    let mut targets = Vec::new();

    while let Some(dir) = stack.pop() {
        if basename(&dir).starts_with("subject=") {
            let processed_dir = format!("{}/processed_data", dir.trim_end_matches('/'));
            let file_count = match store.list_files(&processed_dir).await {
                Ok(files) => files.len(),
                Err(PipelineError::NotFound(_)) => 0,
                Err(e) => return Err(e),
            };
            if file_count > 0 {
                targets.push(Target {
                    shard_dir: processed_dir,
                    original_shard_dir: Some(dir),
                    file_count,
                });
            }
            continue;
        }
        stack.extend(store.list_sub_dirs(&dir).await?);
    }
    Ok(targets)
}

fn basename(uri: &str) -> &str {
    uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri)
}

async fn emit_tasks_for_target(queue: &dyn TaskQueue, target: &Target, chunk_size: i64) -> Result<usize> {
    if chunk_size < 0 {
        let task = Task::new(
            target.shard_dir.clone(),
            vec![0, -1],
            false,
            vec![],
            target.original_shard_dir.clone(),
        );
        queue.put(task).await?;
        return Ok(1);
    }

    if chunk_size == 0 {
        return Err(PipelineError::Config("chunk_size must be -1 or positive".to_string()));
    }

    let mut lo = 0i64;
    let total = target.file_count as i64;
    let mut count = 0;
    while lo < total {
        let hi = std::cmp::min(lo + chunk_size, total);
        let task = Task::new(
            target.shard_dir.clone(),
            vec![lo, hi],
            false,
            vec![],
            target.original_shard_dir.clone(),
        );
        queue.put(task).await?;
        count += 1;
        lo = hi;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusforge_core::Document;
    use corpusforge_lock::InMemoryKvStore;
    use corpusforge_queue::{KvTaskQueue, QueueConfig};
    use corpusforge_storage::{MemoryBlobStore, WriteMode};
    use std::sync::Arc;

    async fn seeded_store() -> MemoryBlobStore {
        let store = MemoryBlobStore::new();
        let doc = vec![Document::with_text("x")];
        for shard in ["root/lang=en/shard-0", "root/lang=en/shard-1", "root/lang=fr/shard-0"] {
            for i in 0..3 {
                store
                    .write_jsonl(&doc, &format!("{shard}/part-{i}.jsonl"), WriteMode::Overwrite)
                    .await
                    .unwrap();
            }
        }
        store
    }

    fn queue() -> KvTaskQueue {
        KvTaskQueue::new(Arc::new(InMemoryKvStore::new()), QueueConfig::new("alloc-test"))
    }

    #[tokio::test]
    async fn process_mode_emits_one_task_per_leaf_with_chunk_size_negative_one() {
        let store = seeded_store().await;
        let q = queue();
        let config = AllocationConfig {
            root_uri: "root".to_string(),
            mode: AllocationMode::Process,
            chunk_size: -1,
        };

        let emitted = allocate(&store, &q, &config).await.unwrap();
        assert_eq!(emitted, 3);
        assert_eq!(q.size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn process_mode_chunks_by_file_count() {
        let store = seeded_store().await;
        let q = queue();
        let config = AllocationConfig {
            root_uri: "root".to_string(),
            mode: AllocationMode::Process,
            chunk_size: 2,
        };

        // 3 leaves * 2 chunks each (files=3, chunk_size=2 -> ranges [0,2),[2,3))
        let emitted = allocate(&store, &q, &config).await.unwrap();
        assert_eq!(emitted, 6);
    }

    #[tokio::test]
    async fn dedup_mode_only_materialises_subject_dirs_processed_data() {
        let store = MemoryBlobStore::new();
        let doc = vec![Document::with_text("x")];
        store
            .write_jsonl(&doc, "root/subject=bio/processed_data/part-0.jsonl", WriteMode::Overwrite)
            .await
            .unwrap();
        store
            .write_jsonl(&doc, "root/subject=bio/raw/part-0.jsonl", WriteMode::Overwrite)
            .await
            .unwrap();
        store
            .write_jsonl(&doc, "root/other/part-0.jsonl", WriteMode::Overwrite)
            .await
            .unwrap();

        let q = queue();
        let config = AllocationConfig {
            root_uri: "root".to_string(),
            mode: AllocationMode::Dedup,
            chunk_size: -1,
        };
        let emitted = allocate(&store, &q, &config).await.unwrap();
        assert_eq!(emitted, 1);

        let task = q.acquire("w", None).await.unwrap().unwrap();
        assert_eq!(task.shard_dir(), "root/subject=bio/processed_data");
        assert_eq!(task.original_shard_dir(), Some("root/subject=bio"));
    }

    #[tokio::test]
    async fn allocation_is_write_once_and_clears_prior_pending_tasks() {
        let store = seeded_store().await;
        let q = queue();
        q.put(Task::new("stale/shard", vec![0, -1], false, vec![], None))
            .await
            .unwrap();
        assert_eq!(q.size().await.unwrap(), 1);

        let config = AllocationConfig {
            root_uri: "root".to_string(),
            mode: AllocationMode::Process,
            chunk_size: -1,
        };
        allocate(&store, &q, &config).await.unwrap();
        assert_eq!(q.size().await.unwrap(), 3);
    }
}
