use corpusforge_core::{PipelineError, Result};
use corpusforge_queue::Task;
use corpusforge_storage::Store;

/// The concrete set of input file URIs a task resolves to: either the
/// task's explicit `files` list (temp chunk tasks, dedup targets), or a
/// slice of `shard_dir`'s sorted file listing selected by `file_range`
/// (`[lo, hi)`, `hi == -1` meaning "through the end").
pub async fn resolve_task_files(store: &dyn Store, task: &Task) -> Result<Vec<String>> {
    if !task.files().is_empty() {
        return Ok(task.files().to_vec());
    }

    let mut files = store.list_files(task.shard_dir()).await?;
    files.sort();

    let range = task.file_range();
    let (lo, hi) = match range {
        [] => (0, files.len() as i64),
        [lo] => (*lo, files.len() as i64),
        [lo, hi, ..] => (*lo, if *hi < 0 { files.len() as i64 } else { *hi }),
    };
    let lo = lo.max(0) as usize;
    let hi = (hi.max(0) as usize).min(files.len());
    if lo >= hi {
        return Ok(vec![]);
    }
    Ok(files[lo..hi].to_vec())
}

/// A shard's logical name, used to derive output/stats paths and as the
/// `shard` label on fatal errors. A single-file task takes the file's
/// stem; a multi-file task (chunked range, dedup group) takes the
/// directory's basename with the range appended so distinct ranges over
/// the same directory never collide.
pub fn shard_name(task: &Task, input_files: &[String]) -> String {
    if input_files.len() == 1 {
        return stem(&input_files[0]).to_string();
    }
    let base = basename(task.shard_dir());
    match task.file_range() {
        [lo, hi, ..] => format!("{base}_{lo}-{hi}"),
        _ => base.to_string(),
    }
}

/// Idempotent output path derivation: strips a trailing `_processed`
/// from the shard stem before re-appending it, so re-running against an
/// already-processed output name does not produce a doubled suffix.
pub fn output_uri(base_output_uri: &str, shard: &str, ext: &str) -> String {
    let clean = shard.strip_suffix("_processed").unwrap_or(shard);
    format!(
        "{}/processed_data/{clean}_processed.{ext}",
        base_output_uri.trim_end_matches('/')
    )
}

pub fn stats_uri(base_output_uri: &str, shard: &str) -> String {
    let clean = shard.strip_suffix("_processed").unwrap_or(shard);
    format!("{}/stats/{clean}_stats.jsonl", base_output_uri.trim_end_matches('/'))
}

/// The extension of the first input file, reused for the output object
/// (`.jsonl`, `.jsonl.gz`, `.jsonl.zst`).
pub fn extension(input_files: &[String]) -> Result<&str> {
    let first = input_files
        .first()
        .ok_or_else(|| PipelineError::Config("cannot derive extension from an empty file list".to_string()))?;
    let name = basename(first);
    name.find('.').map(|i| &name[i + 1..]).ok_or_else(|| PipelineError::Codec {
        uri: first.clone(),
        reason: "input file has no extension".to_string(),
    })
}

pub fn basename(uri: &str) -> &str {
    uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri)
}

fn stem(uri: &str) -> &str {
    let name = basename(uri);
    name.split_once('.').map(|(s, _)| s).unwrap_or(name)
}

/// Output naming rule (`spec.md` §4.7): the effective shard directory is
/// `original_shard_dir` when the task carries one (dedup groups, temp
/// chunks split from an oversize shard), otherwise `shard_dir` itself.
/// `shardName` is the penultimate path segment of that effective
/// directory; the dataset name segment — included only when the task
/// carries an `original_shard_dir` — is the segment above it.
pub fn output_tree_segment(task: &Task) -> String {
    let original = task.original_shard_dir();
    let eff = original.unwrap_or_else(|| task.shard_dir());
    let eff = eff.trim_end_matches('/');
    let shard = basename(eff);
    match original.and_then(|_| parent_basename(eff)) {
        Some(dataset) => format!("{dataset}/{shard}"),
        None => shard.to_string(),
    }
}

fn parent_basename(path: &str) -> Option<&str> {
    let idx = path.rfind('/')?;
    Some(basename(&path[..idx]))
}
