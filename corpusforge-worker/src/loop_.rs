use std::sync::Arc;
use std::time::{Duration, Instant};

use corpusforge_core::{PipelineError, Result};
use corpusforge_executor::{
    append_global_stat, maybe_split, run_shard, ExecutorConfig, ExecutorOutcome, GlobalStatEntry, SplitterConfig,
};
use corpusforge_mappers::Step;
use corpusforge_queue::{Task, TaskQueue};
use corpusforge_storage::Store;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Why the loop stopped: a clean shutdown (queue drained, or an
/// operator-requested signal) exits `0`; a fatal per-shard error that
/// the executor could not recover from exits non-zero, matching
/// `spec.md` §6's exit-code contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    QueueDrained,
    ShutdownSignal,
}

/// Acquires tasks until the queue reports `all_finished` or a shutdown
/// signal arrives, running the executor (behind the oversize-split
/// guard) on each and reporting success/failure back to the queue.
/// Matches the per-worker pseudocode in `spec.md` §4.7.
pub async fn run(
    store: Arc<dyn Store>,
    queue: Arc<dyn TaskQueue>,
    worker_key: &str,
    config: &WorkerConfig,
    steps: Vec<Step>,
) -> Result<StopReason> {
    let splitter_config = SplitterConfig {
        max_shard_bytes: config.max_shard_size_mb * 1024 * 1024,
        temp_dir_uri: config.temp_dir_uri.clone(),
        chunk_group_size: config.splitter_chunk_group_size,
    };

    loop {
        if let Err(e) = queue.requeue_expired().await {
            warn!(error = %e, "requeue_expired sweep failed; continuing");
        }

        let acquired = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received; exiting after any in-flight task");
                return Ok(StopReason::ShutdownSignal);
            }
            result = queue.acquire(worker_key, Some(ACQUIRE_TIMEOUT)) => result?,
        };

        let Some(task) = acquired else {
            if queue.all_finished().await? {
                info!("queue drained; exiting cleanly");
                return Ok(StopReason::QueueDrained);
            }
            continue;
        };

        process_task(store.as_ref(), queue.as_ref(), &task, config, &steps, &splitter_config).await;
        tokio::time::sleep(IDLE_SLEEP).await;
    }
}

async fn process_task(
    store: &dyn Store,
    queue: &dyn TaskQueue,
    task: &Task,
    config: &WorkerConfig,
    steps: &[Step],
    splitter_config: &SplitterConfig,
) {
    match execute(store, queue, task, config, steps, splitter_config).await {
        Ok(()) => {
            if let Err(e) = queue.complete(task).await {
                error!(task = task.id(), error = %e, "failed to mark task complete");
                return;
            }
            if task.is_temp() {
                cleanup_temp_files(store, task).await;
            }
        }
        Err(e) => {
            error!(task = task.id(), error = %e, "task execution failed; requeuing");
            if let Err(e) = queue.requeue(task).await {
                error!(task = task.id(), error = %e, "failed to requeue task after failure");
            }
        }
    }
}

async fn execute(
    store: &dyn Store,
    queue: &dyn TaskQueue,
    task: &Task,
    config: &WorkerConfig,
    steps: &[Step],
    splitter_config: &SplitterConfig,
) -> Result<()> {
    let input_files = corpusforge_executor::resolve_task_files(store, task).await?;
    if maybe_split(store, queue, task, &input_files, splitter_config).await?.is_some() {
        info!(task = task.id(), "oversize shard split into temp tasks; original task complete");
        return Ok(());
    }

    let output_base = format!(
        "{}/{}/{}",
        config.output_uri.trim_end_matches('/'),
        config.readable_name,
        corpusforge_executor::output_tree_segment(task)
    );
    let shard = corpusforge_executor::shard_name(task, &input_files);
    let exec_config = ExecutorConfig {
        base_output_uri: output_base.clone(),
        steps: steps.to_vec(),
        overwrite: config.overwrite,
    };

    let started = Instant::now();
    let outcome = run_shard(store, task, &exec_config).await;
    let secs = started.elapsed().as_secs_f64();

    match outcome {
        Ok(ExecutorOutcome::Completed { pages_in, pages_out, resumed }) => {
            info!(task = task.id(), pages_in, pages_out, "shard complete");
            record_global_stat(
                store,
                &output_base,
                GlobalStatEntry::success(shard, secs, pages_in, pages_out, output_base.clone(), resumed),
            )
            .await;
            Ok(())
        }
        Ok(ExecutorOutcome::GlobalStep { func, args, .. }) => {
            // Cross-shard global operations are specified only by their
            // orchestration boundary: a global step hands back a new
            // working directory and halts. No concrete global function
            // is implemented here, so the step is logged and the task
            // is treated as finished at the halt point.
            info!(task = task.id(), %func, ?args, "global step reached; task considered complete at halt point");
            Ok(())
        }
        Err(e) => {
            record_global_stat(store, &output_base, GlobalStatEntry::failure(shard, secs, output_base.clone())).await;
            Err(e)
        }
    }
}

async fn record_global_stat(store: &dyn Store, output_base: &str, entry: GlobalStatEntry) {
    if let Err(e) = append_global_stat(store, output_base, &entry).await {
        warn!(error = %e, shard = entry.name, "failed to append global stats entry");
    }
}

async fn cleanup_temp_files(store: &dyn Store, task: &Task) {
    for file in task.files() {
        if let Err(e) = store.delete(file).await {
            if !matches!(e, PipelineError::NotFound(_)) {
                warn!(file, error = %e, "failed to delete temp file after completion");
            }
        }
    }
}
