//! The worker process (`spec.md` §4.7 / C7): layered configuration, the
//! acquire-execute-report loop, and single-shot mode.

mod config;
mod loop_;
mod single_shot;

pub use config::{QueueBackend, WorkerConfig, WorkerConfigOverrides};
pub use loop_::{run, StopReason};
pub use single_shot::run_single_shot;
