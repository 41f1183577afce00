use corpusforge_core::Result;
use corpusforge_executor::{maybe_split, run_shard, ExecutorConfig, ExecutorOutcome, SplitterConfig};
use corpusforge_mappers::Step;
use corpusforge_queue::{Task, TaskQueue};
use corpusforge_storage::Store;
use tracing::info;

use crate::config::WorkerConfig;

/// Legacy `useTask=false` path: synthesises a single task from
/// `config.root_uri` instead of acquiring one from a queue, then runs it
/// through the same split-guard-then-executor path as the worker loop.
/// `queue` still backs the oversize splitter's temp-task emission; a
/// caller with no durable queue available may pass an in-process one,
/// since a single-shot run by definition never revisits those chunks
/// itself.
pub async fn run_single_shot(
    store: &dyn Store,
    queue: &dyn TaskQueue,
    config: &WorkerConfig,
    steps: Vec<Step>,
) -> Result<ExecutorOutcome> {
    let task = Task::new(config.root_uri.clone(), vec![0, -1], false, vec![], None);
    let input_files = corpusforge_executor::resolve_task_files(store, &task).await?;

    let splitter_config = SplitterConfig {
        max_shard_bytes: config.max_shard_size_mb * 1024 * 1024,
        temp_dir_uri: config.temp_dir_uri.clone(),
        chunk_group_size: config.splitter_chunk_group_size,
    };
    if maybe_split(store, queue, &task, &input_files, &splitter_config).await?.is_some() {
        info!("single-shot input was oversize and has been split; re-run per chunk to process it");
        return Ok(ExecutorOutcome::Completed { pages_in: 0, pages_out: 0, resumed: false });
    }

    let output_base = format!(
        "{}/{}/{}",
        config.output_uri.trim_end_matches('/'),
        config.readable_name,
        corpusforge_executor::output_tree_segment(&task)
    );
    let exec_config = ExecutorConfig {
        base_output_uri: output_base,
        steps,
        overwrite: config.overwrite,
    };
    run_shard(store, &task, &exec_config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusforge_core::Document;
    use corpusforge_lock::InMemoryKvStore;
    use corpusforge_mappers::{MapperKind, StepConfig};
    use corpusforge_queue::{KvTaskQueue, QueueConfig};
    use corpusforge_storage::{MemoryBlobStore, WriteMode};
    use std::sync::Arc;

    #[tokio::test]
    async fn synthesises_and_runs_a_single_task() {
        let store = MemoryBlobStore::new();
        store
            .write_jsonl(&[Document::with_text("hello")], "root/shard-0/part-0.jsonl", WriteMode::Overwrite)
            .await
            .unwrap();
        let queue = KvTaskQueue::new(Arc::new(InMemoryKvStore::new()), QueueConfig::new("single-shot-test"));

        let mut config = WorkerConfig::default();
        config.root_uri = "root/shard-0".to_string();
        config.output_uri = "out".to_string();
        config.readable_name = "demo".to_string();

        let steps = vec![Step::Mapper(StepConfig {
            kind: MapperKind::Uppercase,
            safe: true,
            profile: false,
            aggregate: None,
        })];

        let outcome = run_single_shot(&store, &queue, &config, steps).await.unwrap();
        assert_eq!(outcome, ExecutorOutcome::Completed { pages_in: 1, pages_out: 1, resumed: false });
    }
}
