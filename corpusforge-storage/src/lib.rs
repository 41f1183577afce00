//! Uniform read/write/list/delete/size over multiple URI schemes, with
//! compression-transparent JSONL streaming — the `Store` capability the
//! rest of the workspace is built against (`spec.md` §4.1 / C1).
//!
//! Two backends ship with this crate: [`LocalFsStore`] for local-disk
//! corpora and worker temp directories, and [`MemoryBlobStore`], an
//! in-process stand-in for an object-store-shaped backend (S3/OSS) used
//! in tests and to prove the `Store` trait is transport-agnostic. Wiring
//! a real object-store SDK behind the same trait is explicitly out of
//! scope (`spec.md` §1 Non-goals).

mod codec;
mod local_fs;
mod memory_blob;

pub use codec::Codec;
pub use local_fs::LocalFsStore;
pub use memory_blob::MemoryBlobStore;

use async_trait::async_trait;
use corpusforge_core::{Document, Result};

/// Write mode for `write_jsonl`: overwrite the object entirely, or append
/// to it (used for append-only remotes where a full rewrite would be
/// wasteful).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    Append,
}

/// Uniform storage capability consumed by the allocator, executor, and
/// splitter. Every operation fails with a typed `PipelineError` variant
/// from `corpusforge_core`; a partial write must never leave a
/// partially-committed object behind (see `LocalFsStore::write_jsonl`'s
/// temp-then-rename implementation).
#[async_trait]
pub trait Store: Send + Sync {
    async fn exists(&self, uri: &str) -> Result<bool>;

    /// Fails with `PipelineError::NotFound` if the object does not exist.
    async fn delete(&self, uri: &str) -> Result<()>;

    async fn size(&self, uri: &str) -> Result<u64>;

    /// Non-recursive listing of a directory's immediate children (files
    /// and subdirectories), excluding hidden entries (names starting with
    /// `.`).
    async fn list(&self, dir_uri: &str) -> Result<Vec<String>>;

    /// Subset of `list` containing only subdirectories.
    async fn list_sub_dirs(&self, dir_uri: &str) -> Result<Vec<String>>;

    /// Subset of `list` containing only files.
    async fn list_files(&self, dir_uri: &str) -> Result<Vec<String>>;

    /// Reads every line of a (possibly compressed) JSONL object. A line
    /// that fails to parse is dropped with a logged warning
    /// (`PipelineError::Codec` is not returned for a single bad line —
    /// only when the object cannot be read or decompressed at all).
    async fn read_jsonl(&self, uri: &str) -> Result<Vec<Document>>;

    /// Writes `docs` to `uri`, choosing the codec by suffix. `Overwrite`
    /// replaces the object wholesale (used by commits); `Append` adds
    /// lines without disturbing existing ones (used for stats files).
    async fn write_jsonl(&self, docs: &[Document], uri: &str, mode: WriteMode) -> Result<()>;

    /// No-op for object stores; ensures parent directories exist for
    /// filesystem-backed stores.
    async fn make_dirs_if_missing(&self, uri: &str) -> Result<()>;
}

/// Renders documents as newline-delimited JSON text (one object per line,
/// trailing newline), the uncompressed representation every codec wraps.
pub(crate) fn render_jsonl(docs: &[Document]) -> Result<String> {
    let mut out = String::new();
    for doc in docs {
        let line = serde_json::to_string(doc).map_err(|e| corpusforge_core::PipelineError::Codec {
            uri: String::new(),
            reason: format!("failed to serialize document: {e}"),
        })?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Parses newline-delimited JSON text into documents, dropping and
/// logging any line that fails to parse.
pub(crate) fn parse_jsonl(text: &str, uri: &str) -> Vec<Document> {
    let mut docs = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Document>(line) {
            Ok(doc) => docs.push(doc),
            Err(e) => {
                tracing::warn!(uri, lineno, error = %e, "dropping unparseable JSONL line");
            }
        }
    }
    docs
}
