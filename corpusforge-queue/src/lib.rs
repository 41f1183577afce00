//! The distributed work queue: content-addressed [`Task`]s moving
//! through pending → in-flight → finished, with at-least-once delivery
//! backed by either a [`KvStore`](corpusforge_lock::KvStore) or a
//! [`BlobLock`](corpusforge_lock::BlobLock)-guarded blob namespace.

mod queue;
mod queue_blob;
mod task;

pub use queue::{KvTaskQueue, QueueConfig, TaskQueue, LEASE_TTL};
pub use queue_blob::BlobTaskQueue;
pub use task::{Task, TaskStatus, Worker};
