use std::path::PathBuf;

use corpusforge_core::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Which `TaskQueue`/lock backing a worker should use. `Kv` is preferred
/// for throughput; `Blob` is the fallback for environments with no KV
/// store, intended only for low task-churn rates (`spec.md` §9 REDESIGN
/// FLAGS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    Kv,
    Blob,
}

/// The full surface named in `spec.md` §6: queue backend choice and id,
/// the pipeline config path, source/output naming, the splitter's
/// size/chunking knobs, and the resume/overwrite flag. Every field has a
/// built-in default; `resolve` layers a config file and environment
/// variables on top of those defaults, then the CLI layers its own
/// explicitly-set flags on top of that: CLI > env > file > defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub queue_backend: QueueBackend,
    pub queue_id: String,
    pub pipeline_config_path: String,
    pub source_name: String,
    pub root_uri: String,
    pub output_uri: String,
    pub readable_name: String,
    pub max_shard_size_mb: u64,
    pub temp_dir_uri: String,
    pub chunk_size: i64,
    pub splitter_chunk_group_size: usize,
    pub pool_width: usize,
    pub overwrite: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_backend: QueueBackend::Kv,
            queue_id: "corpusforge".to_string(),
            pipeline_config_path: "pipeline.yaml".to_string(),
            source_name: "default-source".to_string(),
            root_uri: "input".to_string(),
            output_uri: "output".to_string(),
            readable_name: "default-source".to_string(),
            max_shard_size_mb: 512,
            temp_dir_uri: "tmp".to_string(),
            chunk_size: -1,
            splitter_chunk_group_size: 4,
            pool_width: 1,
            overwrite: false,
        }
    }
}

/// Per-field overrides collected from the CLI, applied last. `None`
/// means "not passed on the command line; fall through to env/file/
/// default."
#[derive(Debug, Clone, Default)]
pub struct WorkerConfigOverrides {
    pub queue_backend: Option<QueueBackend>,
    pub queue_id: Option<String>,
    pub pipeline_config_path: Option<String>,
    pub source_name: Option<String>,
    pub root_uri: Option<String>,
    pub output_uri: Option<String>,
    pub readable_name: Option<String>,
    pub max_shard_size_mb: Option<u64>,
    pub temp_dir_uri: Option<String>,
    pub chunk_size: Option<i64>,
    pub pool_width: Option<usize>,
    pub overwrite: Option<bool>,
}

const ENV_PREFIX: &str = "CORPUSFORGE";

impl WorkerConfig {
    /// Loads defaults, merges in a YAML config file (if `file_path` is
    /// given and exists) and `CORPUSFORGE_*` environment variables via
    /// the `config` crate's layered `Figment`-style builder, then
    /// applies `overrides` (CLI flags) last, giving precedence order:
    /// CLI > env > file > defaults.
    pub fn resolve(file_path: Option<&str>, overrides: WorkerConfigOverrides) -> Result<Self> {
        let defaults = Self::default();
        let file_source = match file_path {
            Some(path) => config::File::from(PathBuf::from(path)).required(false),
            None => config::File::with_name("corpusforge").required(false),
        };
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults).map_err(config_err)?)
            .add_source(file_source)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let mut resolved: Self = builder.build().map_err(config_err)?.try_deserialize().map_err(config_err)?;

        resolved.apply_overrides(overrides);
        resolved.validate()?;
        Ok(resolved)
    }

    fn apply_overrides(&mut self, overrides: WorkerConfigOverrides) {
        if let Some(v) = overrides.queue_backend {
            self.queue_backend = v;
        }
        if let Some(v) = overrides.queue_id {
            self.queue_id = v;
        }
        if let Some(v) = overrides.pipeline_config_path {
            self.pipeline_config_path = v;
        }
        if let Some(v) = overrides.source_name {
            self.source_name = v;
        }
        if let Some(v) = overrides.root_uri {
            self.root_uri = v;
        }
        if let Some(v) = overrides.output_uri {
            self.output_uri = v;
        }
        if let Some(v) = overrides.readable_name {
            self.readable_name = v;
        }
        if let Some(v) = overrides.max_shard_size_mb {
            self.max_shard_size_mb = v;
        }
        if let Some(v) = overrides.temp_dir_uri {
            self.temp_dir_uri = v;
        }
        if let Some(v) = overrides.chunk_size {
            self.chunk_size = v;
        }
        if let Some(v) = overrides.pool_width {
            self.pool_width = v;
        }
        if let Some(v) = overrides.overwrite {
            self.overwrite = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Config("chunk_size must be -1 or positive".to_string()));
        }
        if self.pool_width == 0 {
            return Err(PipelineError::Config("pool_width must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn config_err(e: config::ConfigError) -> PipelineError {
    PipelineError::Config(e.to_string())
}
