//! Worker process entry point. Three subcommands: `allocate` seeds a
//! queue from a corpus root, `run` acquires and executes tasks until the
//! queue drains or a shutdown signal arrives, `single-shot` runs one
//! task synthesised directly from CLI args with no queue involvement.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corpusforge_allocator::{allocate, AllocationConfig, AllocationMode};
use corpusforge_lock::{worker_key, BlobLock, InMemoryBlobLockBackend, InMemoryKvStore};
use corpusforge_mappers::Step;
use corpusforge_queue::{BlobTaskQueue, KvTaskQueue, QueueConfig, TaskQueue};
use corpusforge_storage::{LocalFsStore, Store};
use corpusforge_worker::{run_single_shot, QueueBackend, WorkerConfig, WorkerConfigOverrides};
use tracing::info;

#[derive(Parser)]
#[command(name = "corpusforge-worker", about = "Distributed document pipeline worker")]
struct Cli {
    /// Path to a YAML worker config file. Falls back to `corpusforge.yaml`
    /// in the working directory, then built-in defaults.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk a corpus root and seed the queue with tasks.
    Allocate {
        #[command(flatten)]
        overrides: CliOverrides,
        /// Enumerate `subject=`-prefixed dedup groups instead of plain shards.
        #[arg(long)]
        dedup: bool,
    },
    /// Acquire and execute tasks until the queue drains or a shutdown signal arrives.
    Run {
        #[command(flatten)]
        overrides: CliOverrides,
    },
    /// Run one task synthesised from `--root-uri`, bypassing the queue entirely.
    SingleShot {
        #[command(flatten)]
        overrides: CliOverrides,
    },
}

#[derive(clap::Args, Default)]
struct CliOverrides {
    #[arg(long)]
    queue_backend: Option<QueueBackendArg>,
    #[arg(long)]
    queue_id: Option<String>,
    #[arg(long)]
    pipeline_config_path: Option<String>,
    #[arg(long)]
    source_name: Option<String>,
    #[arg(long)]
    root_uri: Option<String>,
    #[arg(long)]
    output_uri: Option<String>,
    #[arg(long)]
    readable_name: Option<String>,
    #[arg(long)]
    max_shard_size_mb: Option<u64>,
    #[arg(long)]
    temp_dir_uri: Option<String>,
    #[arg(long)]
    chunk_size: Option<i64>,
    #[arg(long)]
    pool_width: Option<usize>,
    #[arg(long)]
    overwrite: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum QueueBackendArg {
    Kv,
    Blob,
}

impl From<CliOverrides> for WorkerConfigOverrides {
    fn from(c: CliOverrides) -> Self {
        Self {
            queue_backend: c.queue_backend.map(|b| match b {
                QueueBackendArg::Kv => QueueBackend::Kv,
                QueueBackendArg::Blob => QueueBackend::Blob,
            }),
            queue_id: c.queue_id,
            pipeline_config_path: c.pipeline_config_path,
            source_name: c.source_name,
            root_uri: c.root_uri,
            output_uri: c.output_uri,
            readable_name: c.readable_name,
            max_shard_size_mb: c.max_shard_size_mb,
            temp_dir_uri: c.temp_dir_uri,
            chunk_size: c.chunk_size,
            pool_width: c.pool_width,
            overwrite: if c.overwrite { Some(true) } else { None },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("corpusforge=info".parse()?))
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Allocate { overrides, dedup } => {
            let config = WorkerConfig::resolve(cli.config.as_deref(), overrides.into()).context("resolving worker config")?;
            let store = build_store(&config);
            let queue = build_queue(&config, store.clone());
            let alloc_config = AllocationConfig {
                root_uri: config.root_uri.clone(),
                mode: if dedup { AllocationMode::Dedup } else { AllocationMode::Process },
                chunk_size: config.chunk_size,
            };
            let emitted = allocate(store.as_ref(), queue.as_ref(), &alloc_config).await?;
            info!(emitted, "allocation complete");
        }
        Command::Run { overrides } => {
            let config = WorkerConfig::resolve(cli.config.as_deref(), overrides.into()).context("resolving worker config")?;
            let store = build_store(&config);
            let queue = build_queue(&config, store.clone());
            let steps = load_pipeline(&config)?;
            let key = worker_key();
            info!(worker_key = %key, "starting worker loop");
            let reason = corpusforge_worker::run(store, queue, &key, &config, steps).await?;
            info!(?reason, "worker loop exited");
        }
        Command::SingleShot { overrides } => {
            let config = WorkerConfig::resolve(cli.config.as_deref(), overrides.into()).context("resolving worker config")?;
            let store = build_store(&config);
            let queue = build_queue(&config, store.clone());
            let steps = load_pipeline(&config)?;
            let outcome = run_single_shot(store.as_ref(), queue.as_ref(), &config, steps).await?;
            info!(?outcome, "single-shot run complete");
        }
    }

    Ok(())
}

fn build_store(_config: &WorkerConfig) -> Arc<dyn Store> {
    Arc::new(LocalFsStore::new())
}

fn build_queue(config: &WorkerConfig, store: Arc<dyn Store>) -> Arc<dyn TaskQueue> {
    let queue_config = QueueConfig::new(config.queue_id.clone());
    match config.queue_backend {
        QueueBackend::Kv => {
            let kv = Arc::new(InMemoryKvStore::new());
            Arc::new(KvTaskQueue::new(kv, queue_config))
        }
        QueueBackend::Blob => {
            let backend = Arc::new(InMemoryBlobLockBackend::new());
            let lock = Arc::new(BlobLock::new(backend, format!("{}-lock", config.queue_id), worker_key()));
            let root = format!("{}/_queue", config.output_uri.trim_end_matches('/'));
            Arc::new(BlobTaskQueue::new(store, lock, root, queue_config))
        }
    }
}

fn load_pipeline(config: &WorkerConfig) -> Result<Vec<Step>> {
    let yaml = std::fs::read_to_string(&config.pipeline_config_path)
        .with_context(|| format!("reading pipeline config at {}", config.pipeline_config_path))?;
    Ok(Step::parse_pipeline_for_source(&yaml, &config.source_name)?)
}
