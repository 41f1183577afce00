//! Distributed mutual exclusion for the shard allocator and pipeline
//! executor: a fingerprinted lease over either a KV store (`KvLock`) or
//! a conditional-put blob namespace (`BlobLock`), matching the two
//! backends `original_source/baselines/lock/distri_lock.py` supports.

mod fingerprint;
mod kv;
mod lock;

pub use fingerprint::worker_key;
pub use kv::{InMemoryKvStore, KvStore};
pub use lock::{
    BlobLock, BlobLockBackend, DistributedLock, InMemoryBlobLockBackend, KvLock, DEFAULT_TTL,
};
