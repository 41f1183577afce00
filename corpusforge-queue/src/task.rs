use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work: either a contiguous file-index range within one shard
/// directory, or an explicit file list (used by the oversize splitter's
/// chunk tasks and by dedup-mode allocation). Grounded on
/// `original_source/baselines/task_queue/task.py::TaskItem`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: String,
    shard_dir: String,
    file_range: Vec<i64>,
    is_temp: bool,
    files: Vec<String>,
    original_shard_dir: Option<String>,
    /// Present once a worker has accepted the task; absent while it sits
    /// in the pending queue.
    pub worker: Option<Worker>,
}

/// Lease bookkeeping for the worker currently (or most recently) holding
/// a task, matching the fields the Python original threads through
/// `to_dict`/lease-key logic but gathered into one sub-struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub key: String,
    pub status: TaskStatus,
    pub process_time: DateTime<Utc>,
    pub finish_time: Option<DateTime<Utc>>,
    pub fail_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    InProgress,
    Finished,
    Failed,
}

impl Task {
    pub fn new(
        shard_dir: impl Into<String>,
        file_range: Vec<i64>,
        is_temp: bool,
        files: Vec<String>,
        original_shard_dir: Option<String>,
    ) -> Self {
        let shard_dir = shard_dir.into();
        let id = compute_id(&shard_dir, &file_range, &files, &original_shard_dir);
        Self {
            id,
            shard_dir,
            file_range,
            is_temp,
            files,
            original_shard_dir,
            worker: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shard_dir(&self) -> &str {
        &self.shard_dir
    }

    pub fn original_shard_dir(&self) -> Option<&str> {
        self.original_shard_dir.as_deref()
    }

    pub fn file_range(&self) -> &[i64] {
        &self.file_range
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn is_temp(&self) -> bool {
        self.is_temp
    }
}

/// Content-addressable id: a BLAKE3 digest of the canonical (sorted-key)
/// JSON object `{shard_dir, file_range, files, original_shard_dir}`.
/// Deliberately excludes `worker`/`is_temp` so re-submitting the same
/// unit of work — before or after a worker claims it — always resolves
/// to the same id, matching `task.py::_generate_id`'s field set exactly
/// (the Python hashes with `md5`; this crate uses `blake3`, already the
/// teacher's content-hash of choice, as the Open Question resolution
/// recorded alongside this module).
fn compute_id(
    shard_dir: &str,
    file_range: &[i64],
    files: &[String],
    original_shard_dir: &Option<String>,
) -> String {
    let mut canonical: BTreeMap<&str, Value> = BTreeMap::new();
    canonical.insert("shard_dir", Value::from(shard_dir));
    canonical.insert("file_range", Value::from(file_range.to_vec()));
    canonical.insert("files", Value::from(files.to_vec()));
    canonical.insert(
        "original_shard_dir",
        original_shard_dir
            .clone()
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    let json = serde_json::to_string(&canonical).expect("canonical task key always serializes");
    blake3::hash(json.as_bytes()).to_hex().to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_across_equivalent_constructions() {
        let a = Task::new("root/shard-0", vec![0, 10], false, vec![], None);
        let b = Task::new("root/shard-0", vec![0, 10], false, vec![], None);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn id_ignores_worker_and_is_temp() {
        let mut a = Task::new("root/shard-0", vec![0, 10], false, vec![], None);
        let b = Task::new("root/shard-0", vec![0, 10], true, vec![], None);
        a.worker = Some(Worker {
            key: "host_1".to_string(),
            status: TaskStatus::InProgress,
            process_time: Utc::now(),
            finish_time: None,
            fail_time: None,
        });
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn id_differs_when_files_differ() {
        let a = Task::new("root/shard-0", vec![], false, vec!["a.jsonl".to_string()], None);
        let b = Task::new("root/shard-0", vec![], false, vec!["b.jsonl".to_string()], None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn id_differs_when_original_shard_dir_differs() {
        let a = Task::new("root/shard-0", vec![0, 1], false, vec![], None);
        let b = Task::new(
            "root/shard-0",
            vec![0, 1],
            false,
            vec![],
            Some("root/original".to_string()),
        );
        assert_ne!(a.id(), b.id());
    }
}
