use corpusforge_core::{Document, Result};
use corpusforge_mappers::{run_step, Step};
use corpusforge_queue::Task;
use corpusforge_storage::{Store, WriteMode};
use tracing::{info, warn};

use crate::paths::{extension, output_uri, resolve_task_files, shard_name, stats_uri};
use crate::stats::{self, StatRecord};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub base_output_uri: String,
    pub steps: Vec<Step>,
    /// Ignore any existing stats file and start the shard from scratch.
    pub overwrite: bool,
}

/// What `run_shard` hands back to the worker loop: either the shard ran
/// to completion (possibly having done nothing, if every step was
/// already satisfied by a prior checkpoint), or execution halted on a
/// global-function step and control passes to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorOutcome {
    Completed { pages_in: usize, pages_out: usize, resumed: bool },
    GlobalStep {
        shard_files: Vec<String>,
        base_output_path: String,
        func: String,
        args: serde_json::Value,
    },
}

/// Runs one task's configured pipeline to completion, resuming from a
/// prior stats checkpoint when one exists (`spec.md` §4.5 / C5).
pub async fn run_shard(store: &dyn Store, task: &Task, config: &ExecutorConfig) -> Result<ExecutorOutcome> {
    let input_files = resolve_task_files(store, task).await?;
    if input_files.is_empty() {
        return Ok(ExecutorOutcome::Completed { pages_in: 0, pages_out: 0, resumed: false });
    }

    let shard = shard_name(task, &input_files);
    let ext = extension(&input_files)?;
    let out_uri = output_uri(&config.base_output_uri, &shard, ext);
    let stats_path = stats_uri(&config.base_output_uri, &shard);

    let mut docs = Vec::new();
    for uri in &input_files {
        docs.extend(store.read_jsonl(uri).await?);
    }
    let pages_in = docs.len();

    let prior = load_prior_stats(store, &stats_path, config.overwrite).await?;
    let prior_names = stats::prior_step_names(&prior);
    let configured_names: Vec<String> = config
        .steps
        .iter()
        .filter_map(|s| match s {
            Step::Mapper(cfg) => Some(cfg.kind.name().to_string()),
            _ => None,
        })
        .collect();
    let skip_count = stats::resolve_skip_count(&shard, &prior_names, &configured_names)?;
    let graceful = stats::graceful_continuation(&prior);

    write_stats(
        store,
        &stats_path,
        &[StatRecord::ProcessSetup { graceful_continuation: graceful }],
        WriteMode::Append,
    )
    .await?;
    info!(shard, skip_count, graceful, "executor starting shard");

    let mut mapper_seen = 0usize;
    let mut updated = false;
    let mut pending = Vec::new();

    for step in &config.steps {
        match step {
            Step::Commit => {
                if updated {
                    commit(store, &docs, &out_uri, &stats_path, &mut pending).await?;
                    updated = false;
                }
            }
            Step::Global(global) => {
                return Ok(ExecutorOutcome::GlobalStep {
                    shard_files: input_files,
                    base_output_path: config.base_output_uri.clone(),
                    func: global.func.clone(),
                    args: global.args.clone(),
                });
            }
            Step::Mapper(cfg) => {
                if mapper_seen < skip_count {
                    mapper_seen += 1;
                    continue;
                }
                let (new_docs, step_stats) = run_step(&shard, cfg, &docs)?;
                mapper_seen += 1;
                docs = new_docs;
                updated = true;
                pending.push(StatRecord::Step(step_stats));
                if docs.is_empty() {
                    warn!(shard, "document list emptied mid-pipeline; stopping early");
                    break;
                }
            }
        }
    }

    let pages_out = docs.len();
    pending.push(StatRecord::ProcessFinished { pages_in, pages_out });
    if updated {
        commit(store, &docs, &out_uri, &stats_path, &mut pending).await?;
    }
    write_stats(store, &stats_path, &pending, WriteMode::Append).await?;

    info!(shard, pages_in, pages_out, "executor finished shard");
    Ok(ExecutorOutcome::Completed { pages_in, pages_out, resumed: skip_count > 0 })
}

async fn commit(
    store: &dyn Store,
    docs: &[Document],
    out_uri: &str,
    stats_path: &str,
    pending: &mut Vec<StatRecord>,
) -> Result<()> {
    store.write_jsonl(docs, out_uri, WriteMode::Overwrite).await?;
    pending.push(StatRecord::Commit);
    write_stats(store, stats_path, pending, WriteMode::Append).await?;
    pending.clear();
    Ok(())
}

async fn load_prior_stats(store: &dyn Store, stats_path: &str, overwrite: bool) -> Result<Vec<StatRecord>> {
    if overwrite || !store.exists(stats_path).await? {
        return Ok(vec![]);
    }
    let docs = store.read_jsonl(stats_path).await?;
    docs.iter().map(stats::from_document).collect()
}

async fn write_stats(store: &dyn Store, stats_path: &str, records: &[StatRecord], mode: WriteMode) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let docs: Vec<Document> = records.iter().map(stats::to_document).collect();
    store.write_jsonl(&docs, stats_path, mode).await
}
