//! Per-task execution: load a shard's input, run its configured mapper
//! pipeline with checkpoint-aware resumption, and the oversize-shard
//! splitting guard invoked ahead of it (`spec.md` §4.5 / §4.6, C5/C6).

mod executor;
mod global_stats;
mod paths;
mod splitter;
mod stats;

pub use executor::{run_shard, ExecutorConfig, ExecutorOutcome};
pub use global_stats::{append as append_global_stat, GlobalStatEntry};
pub use paths::{output_tree_segment, output_uri, resolve_task_files, shard_name, stats_uri};
pub use splitter::{maybe_split, SplitterConfig};
pub use stats::StatRecord;
