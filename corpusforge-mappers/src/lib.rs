//! The mapper registry and per-step runner (`spec.md` §4.8 / C8): a
//! closed set of built-in mappers, a config-time-validated step
//! descriptor, and the classification/stats bookkeeping the executor
//! threads through a shard's pipeline.

mod mapper;
mod runner;
mod step;

pub use mapper::{AlwaysError, LengthFilter, Mapper, SplitOnBlankLine, Uppercase};
pub use runner::{run_step, StepStats};
pub use step::{AggregateSpec, Aggregator, GlobalStep, MapperKind, Step, StepConfig, Transform, GLOBAL_FUNCTIONS};
