use std::collections::BTreeSet;

use async_trait::async_trait;
use corpusforge_core::{Document, PipelineError, Result};
use dashmap::DashMap;
use tracing::debug;

use crate::{codec::Codec, parse_jsonl, render_jsonl, Store, WriteMode};

/// In-process stand-in for an object-store-shaped backend (S3/OSS): a
/// flat key/value namespace with `/`-delimited keys simulating
/// directories. Used in integration tests and to demonstrate that the
/// allocator/executor/splitter are written against `Store` and not
/// against any one transport — wiring a real object-store SDK behind
/// this same trait is out of scope (`spec.md` §1 Non-goals).
///
/// Mirrors the conditional-put/forbid-overwrite semantics a real blob
/// store exposes: every write here is a single atomic map insert, so
/// there is no partial-write window to guard against.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }

    fn normalize(uri: &str) -> String {
        uri.trim_end_matches('/').to_string()
    }
}

#[async_trait]
impl Store for MemoryBlobStore {
    async fn exists(&self, uri: &str) -> Result<bool> {
        Ok(self.objects.contains_key(&Self::normalize(uri)))
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let key = Self::normalize(uri);
        debug!(uri, "deleting blob");
        self.objects
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| PipelineError::NotFound(uri.to_string()))
    }

    async fn size(&self, uri: &str) -> Result<u64> {
        self.objects
            .get(&Self::normalize(uri))
            .map(|v| v.len() as u64)
            .ok_or_else(|| PipelineError::NotFound(uri.to_string()))
    }

    async fn list(&self, dir_uri: &str) -> Result<Vec<String>> {
        Ok(self
            .child_segments(dir_uri)
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    async fn list_sub_dirs(&self, dir_uri: &str) -> Result<Vec<String>> {
        Ok(self
            .child_segments(dir_uri)
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .map(|(name, _)| name)
            .collect())
    }

    async fn list_files(&self, dir_uri: &str) -> Result<Vec<String>> {
        Ok(self
            .child_segments(dir_uri)
            .into_iter()
            .filter(|(_, is_dir)| !*is_dir)
            .map(|(name, _)| name)
            .collect())
    }

    async fn read_jsonl(&self, uri: &str) -> Result<Vec<Document>> {
        let key = Self::normalize(uri);
        let raw = self
            .objects
            .get(&key)
            .ok_or_else(|| PipelineError::NotFound(uri.to_string()))?
            .clone();
        let codec = Codec::from_uri(uri);
        let text = codec.decode(&raw, uri)?;
        Ok(parse_jsonl(&text, uri))
    }

    async fn write_jsonl(&self, docs: &[Document], uri: &str, mode: WriteMode) -> Result<()> {
        let key = Self::normalize(uri);
        let codec = Codec::from_uri(uri);

        let all_docs = match mode {
            WriteMode::Overwrite => docs.to_vec(),
            WriteMode::Append => {
                let mut existing = if self.objects.contains_key(&key) {
                    self.read_jsonl(uri).await?
                } else {
                    Vec::new()
                };
                existing.extend_from_slice(docs);
                existing
            }
        };

        debug!(uri, count = all_docs.len(), ?mode, "writing blob");
        let text = render_jsonl(&all_docs)?;
        let encoded = codec.encode(&text, uri)?;
        self.objects.insert(key, encoded);
        Ok(())
    }

    async fn make_dirs_if_missing(&self, _uri: &str) -> Result<()> {
        Ok(())
    }
}

impl MemoryBlobStore {
    /// Returns the immediate child segment of every key nested under
    /// `dir_uri`, paired with whether that segment is itself a directory
    /// (has further path components beneath it).
    fn child_segments(&self, dir_uri: &str) -> Vec<(String, bool)> {
        let prefix = format!("{}/", Self::normalize(dir_uri));
        let mut dirs = BTreeSet::new();
        let mut files = BTreeSet::new();

        for entry in self.objects.iter() {
            let key = entry.key();
            if let Some(rest) = key.strip_prefix(&prefix) {
                if rest.is_empty() || rest.starts_with('.') {
                    continue;
                }
                match rest.split_once('/') {
                    Some((head, _)) => {
                        dirs.insert(format!("{}{}", prefix, head));
                    }
                    None => {
                        files.insert(format!("{}{}", prefix, rest));
                    }
                }
            }
        }

        dirs.into_iter()
            .map(|d| (d, true))
            .chain(files.into_iter().map(|f| (f, false)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusforge_core::Document;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let store = MemoryBlobStore::new();
        let docs = vec![Document::with_text("a"), Document::with_text("b")];
        store
            .write_jsonl(&docs, "root/shard.jsonl", WriteMode::Overwrite)
            .await
            .unwrap();
        let back = store.read_jsonl("root/shard.jsonl").await.unwrap();
        assert_eq!(back, docs);
    }

    #[tokio::test]
    async fn append_extends_existing_object() {
        let store = MemoryBlobStore::new();
        let first = vec![Document::with_text("a")];
        let second = vec![Document::with_text("b")];
        store
            .write_jsonl(&first, "root/stats.jsonl", WriteMode::Overwrite)
            .await
            .unwrap();
        store
            .write_jsonl(&second, "root/stats.jsonl", WriteMode::Append)
            .await
            .unwrap();
        let back = store.read_jsonl("root/stats.jsonl").await.unwrap();
        assert_eq!(back, vec![Document::with_text("a"), Document::with_text("b")]);
    }

    #[tokio::test]
    async fn lists_sub_dirs_and_files_separately() {
        let store = MemoryBlobStore::new();
        let doc = vec![Document::with_text("a")];
        store
            .write_jsonl(&doc, "root/subject=en/processed_data/f.jsonl", WriteMode::Overwrite)
            .await
            .unwrap();
        store
            .write_jsonl(&doc, "root/manifest.json", WriteMode::Overwrite)
            .await
            .unwrap();

        let dirs = store.list_sub_dirs("root").await.unwrap();
        let files = store.list_files("root").await.unwrap();
        assert_eq!(dirs, vec!["root/subject=en".to_string()]);
        assert_eq!(files, vec!["root/manifest.json".to_string()]);
    }

    #[tokio::test]
    async fn delete_missing_fails_not_found() {
        let store = MemoryBlobStore::new();
        let err = store.delete("nope").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
