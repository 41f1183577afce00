use corpusforge_core::{Document, Result};
use corpusforge_queue::{Task, TaskQueue};
use corpusforge_storage::{Store, WriteMode};
use tracing::info;

use crate::paths::basename;

/// Byte-estimate threshold below the configured maximum at which a
/// buffer is flushed to a chunk file, leaving headroom so the actual
/// written size rarely exceeds `max_bytes` (`spec.md` §4.6's ≈10%
/// margin).
const MARGIN: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct SplitterConfig {
    pub max_shard_bytes: u64,
    pub temp_dir_uri: String,
    /// Number of chunk files grouped into one downstream temp task.
    pub chunk_group_size: usize,
}

/// Guard invoked before loading a task's input into memory: if the
/// combined size of its input files exceeds `config.max_shard_bytes`
/// and the task is not itself a temp (already-split) task, slices the
/// input into deterministically-named chunk files under the temp
/// directory, enqueues one new temp `Task` per group of
/// `chunk_group_size` chunks, and reports back so the caller can
/// complete the original task without ever building a mapper pipeline.
/// Returns `None` when no split was necessary.
pub async fn maybe_split(
    store: &dyn Store,
    queue: &dyn TaskQueue,
    task: &Task,
    input_files: &[String],
    config: &SplitterConfig,
) -> Result<Option<usize>> {
    if task.is_temp() {
        return Ok(None);
    }

    let mut total = 0u64;
    for uri in input_files {
        total += store.size(uri).await?;
    }
    if total <= config.max_shard_bytes {
        return Ok(None);
    }

    info!(shard = task.shard_dir(), total, max = config.max_shard_bytes, "splitting oversize shard");

    let ext = crate::paths::extension(input_files)?;
    let stem = basename(task.shard_dir());
    let threshold = (config.max_shard_bytes as f64 * MARGIN) as u64;

    let mut docs: Vec<Document> = Vec::new();
    for uri in input_files {
        docs.extend(store.read_jsonl(uri).await?);
    }

    let mut chunk_files = Vec::new();
    let mut buffer: Vec<Document> = Vec::new();
    let mut buffer_bytes = 0u64;
    let mut chunk_index = 0usize;

    for doc in docs {
        let doc_bytes = serde_json::to_vec(&doc).map(|v| v.len() as u64).unwrap_or(0);
        if buffer_bytes + doc_bytes > threshold && !buffer.is_empty() {
            chunk_files.push(flush_chunk(store, &config.temp_dir_uri, stem, chunk_index, ext, &buffer).await?);
            chunk_index += 1;
            buffer.clear();
            buffer_bytes = 0;
        }
        buffer_bytes += doc_bytes;
        buffer.push(doc);
    }
    if !buffer.is_empty() {
        chunk_files.push(flush_chunk(store, &config.temp_dir_uri, stem, chunk_index, ext, &buffer).await?);
    }

    let mut tasks_emitted = 0;
    for group in chunk_files.chunks(config.chunk_group_size.max(1)) {
        let temp_task = Task::new(
            config.temp_dir_uri.clone(),
            vec![],
            true,
            group.to_vec(),
            task.original_shard_dir().map(str::to_string),
        );
        queue.put(temp_task).await?;
        tasks_emitted += 1;
    }

    info!(chunks = chunk_files.len(), tasks = tasks_emitted, "oversize split complete");
    Ok(Some(tasks_emitted))
}

async fn flush_chunk(
    store: &dyn Store,
    temp_dir_uri: &str,
    stem: &str,
    index: usize,
    ext: &str,
    docs: &[Document],
) -> Result<String> {
    let uri = format!("{}/{stem}_chunk{index}.{ext}", temp_dir_uri.trim_end_matches('/'));
    store.write_jsonl(docs, &uri, WriteMode::Overwrite).await?;
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusforge_lock::InMemoryKvStore;
    use corpusforge_queue::{KvTaskQueue, QueueConfig};
    use corpusforge_storage::MemoryBlobStore;
    use std::sync::Arc;

    fn queue() -> KvTaskQueue {
        KvTaskQueue::new(Arc::new(InMemoryKvStore::new()), QueueConfig::new("splitter-test"))
    }

    #[tokio::test]
    async fn undersized_shard_is_left_alone() {
        let store = MemoryBlobStore::new();
        let docs = vec![Document::with_text("x")];
        store.write_jsonl(&docs, "root/shard-0/part-0.jsonl", WriteMode::Overwrite).await.unwrap();

        let task = Task::new("root/shard-0", vec![0, -1], false, vec![], None);
        let config = SplitterConfig {
            max_shard_bytes: 1_000_000,
            temp_dir_uri: "tmp".to_string(),
            chunk_group_size: 4,
        };
        let q = queue();
        let result = maybe_split(&store, &q, &task, &["root/shard-0/part-0.jsonl".to_string()], &config)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn oversized_shard_is_split_and_temp_tasks_enqueued() {
        let store = MemoryBlobStore::new();
        let docs: Vec<Document> = (0..200).map(|i| Document::with_text(format!("document body number {i}"))).collect();
        store.write_jsonl(&docs, "root/shard-0/part-0.jsonl", WriteMode::Overwrite).await.unwrap();

        let task = Task::new("root/shard-0", vec![0, -1], false, vec![], None);
        let config = SplitterConfig {
            max_shard_bytes: 500,
            temp_dir_uri: "tmp".to_string(),
            chunk_group_size: 2,
        };
        let q = queue();
        let result = maybe_split(&store, &q, &task, &["root/shard-0/part-0.jsonl".to_string()], &config)
            .await
            .unwrap();
        assert!(result.unwrap() > 0);
        assert!(q.size().await.unwrap() > 0);

        let acquired = q.acquire("w", None).await.unwrap().unwrap();
        assert!(acquired.is_temp());
        assert!(!acquired.files().is_empty());
    }

    #[tokio::test]
    async fn temp_tasks_are_never_re_split() {
        let store = MemoryBlobStore::new();
        let task = Task::new("tmp", vec![], true, vec!["tmp/shard-0_chunk0.jsonl".to_string()], None);
        let config = SplitterConfig {
            max_shard_bytes: 1,
            temp_dir_uri: "tmp".to_string(),
            chunk_group_size: 2,
        };
        let q = queue();
        let result = maybe_split(&store, &q, &task, task.files(), &config).await.unwrap();
        assert!(result.is_none());
    }
}
