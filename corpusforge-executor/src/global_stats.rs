use corpusforge_core::{Document, Result};
use corpusforge_storage::{Store, WriteMode};
use serde::{Deserialize, Serialize};

/// One line of `{outputBase}/global_stats.jsonl`: the per-chunk ledger a
/// shard's processing history accumulates across attempts, crash
/// recoveries, and (for an oversize shard) the temp tasks its splitter
/// run spawned (`spec.md` §3 "Global shard stats", §6). Appended once per
/// task outcome reported back to the worker loop; never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStatEntry {
    pub name: String,
    pub secs: f64,
    pub num_successes: u32,
    pub num_failures: u32,
    pub pages_in: usize,
    pub pages_out: usize,
    pub working_dir: String,
    pub resumptions: u32,
    pub failed_shards: Vec<String>,
}

impl GlobalStatEntry {
    pub fn success(name: String, secs: f64, pages_in: usize, pages_out: usize, working_dir: String, resumed: bool) -> Self {
        GlobalStatEntry {
            name,
            secs,
            num_successes: 1,
            num_failures: 0,
            pages_in,
            pages_out,
            working_dir,
            resumptions: resumed as u32,
            failed_shards: vec![],
        }
    }

    pub fn failure(name: String, secs: f64, working_dir: String) -> Self {
        GlobalStatEntry {
            name: name.clone(),
            secs,
            num_successes: 0,
            num_failures: 1,
            pages_in: 0,
            pages_out: 0,
            working_dir,
            resumptions: 0,
            failed_shards: vec![name],
        }
    }
}

/// Appends one entry to the shard-pipeline's `global_stats.jsonl`. Unlike
/// a shard's own stats file, this is a flat append with no resumption
/// bookkeeping of its own — the oracle it serves is the commit/stats file
/// pair per shard; this file is an audit trail over all of them.
pub async fn append(store: &dyn Store, base_output_uri: &str, entry: &GlobalStatEntry) -> Result<()> {
    let uri = format!("{}/global_stats.jsonl", base_output_uri.trim_end_matches('/'));
    let value = serde_json::to_value(entry).expect("GlobalStatEntry always serializes");
    let doc: Document = serde_json::from_value(value).expect("a serialized GlobalStatEntry is always a JSON object");
    store.write_jsonl(&[doc], &uri, WriteMode::Append).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusforge_storage::MemoryBlobStore;

    #[tokio::test]
    async fn appends_are_cumulative_and_ordered() {
        let store = MemoryBlobStore::new();
        let first = GlobalStatEntry::success("shard-0".to_string(), 1.5, 3, 3, "out".to_string(), false);
        let second = GlobalStatEntry::failure("shard-1".to_string(), 0.2, "out".to_string());

        append(&store, "out", &first).await.unwrap();
        append(&store, "out", &second).await.unwrap();

        let docs = store.read_jsonl("out/global_stats.jsonl").await.unwrap();
        assert_eq!(docs.len(), 2);
        let entries: Vec<GlobalStatEntry> =
            docs.iter().map(|d| serde_json::from_value(serde_json::to_value(d).unwrap()).unwrap()).collect();
        assert_eq!(entries[0].name, "shard-0");
        assert_eq!(entries[0].num_successes, 1);
        assert_eq!(entries[1].name, "shard-1");
        assert_eq!(entries[1].num_failures, 1);
        assert_eq!(entries[1].failed_shards, vec!["shard-1".to_string()]);
    }
}
