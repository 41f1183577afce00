use std::path::{Path, PathBuf};

use async_trait::async_trait;
use corpusforge_core::{Document, PipelineError, Result};
use tracing::debug;

use crate::{codec::Codec, parse_jsonl, render_jsonl, Store, WriteMode};

/// Local-filesystem `Store` backend. URIs are plain paths (an optional
/// `file://` prefix is stripped).
///
/// `tokio::fs` for async I/O, `tracing::debug!` on every operation,
/// directories created eagerly where the filesystem requires them.
#[derive(Debug, Clone, Default)]
pub struct LocalFsStore;

impl LocalFsStore {
    pub fn new() -> Self {
        Self
    }

    fn path_of(uri: &str) -> PathBuf {
        PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
    }
}

#[async_trait]
impl Store for LocalFsStore {
    async fn exists(&self, uri: &str) -> Result<bool> {
        let path = Self::path_of(uri);
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let path = Self::path_of(uri);
        debug!(uri, "deleting object");
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| to_io_or_not_found(uri, e))
    }

    async fn size(&self, uri: &str) -> Result<u64> {
        let path = Self::path_of(uri);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| to_io_or_not_found(uri, e))?;
        Ok(meta.len())
    }

    async fn list(&self, dir_uri: &str) -> Result<Vec<String>> {
        list_entries(dir_uri, None).await
    }

    async fn list_sub_dirs(&self, dir_uri: &str) -> Result<Vec<String>> {
        list_entries(dir_uri, Some(true)).await
    }

    async fn list_files(&self, dir_uri: &str) -> Result<Vec<String>> {
        list_entries(dir_uri, Some(false)).await
    }

    async fn read_jsonl(&self, uri: &str) -> Result<Vec<Document>> {
        let path = Self::path_of(uri);
        debug!(uri, "reading jsonl shard");
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| to_io_or_not_found(uri, e))?;
        let codec = Codec::from_uri(uri);
        let text = codec.decode(&raw, uri)?;
        Ok(parse_jsonl(&text, uri))
    }

    async fn write_jsonl(&self, docs: &[Document], uri: &str, mode: WriteMode) -> Result<()> {
        let path = Self::path_of(uri);
        self.make_dirs_if_missing(uri).await?;
        let codec = Codec::from_uri(uri);
        debug!(uri, count = docs.len(), ?mode, "writing jsonl shard");

        match mode {
            WriteMode::Overwrite => {
                let text = render_jsonl(docs)?;
                let encoded = codec.encode(&text, uri)?;
                write_atomic(&path, &encoded).await?;
            }
            WriteMode::Append => {
                // Plain-text append-friendly codecs can append directly;
                // compressed append-only remotes must buffer the whole
                // object and rewrite it, matching `spec.md`'s
                // "buffered-then-upload for append-only remotes" note.
                if codec == Codec::Plain {
                    let text = render_jsonl(docs)?;
                    append_plain(&path, &text).await?;
                } else {
                    let mut existing = if tokio::fs::metadata(&path).await.is_ok() {
                        self.read_jsonl(uri).await?
                    } else {
                        Vec::new()
                    };
                    existing.extend_from_slice(docs);
                    let text = render_jsonl(&existing)?;
                    let encoded = codec.encode(&text, uri)?;
                    write_atomic(&path, &encoded).await?;
                }
            }
        }
        Ok(())
    }

    async fn make_dirs_if_missing(&self, uri: &str) -> Result<()> {
        let path = Self::path_of(uri);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Io {
                    uri: uri.to_string(),
                    source: e,
                })?;
        }
        Ok(())
    }
}

/// Writes via a sibling temp file then renames into place, so a crash
/// mid-write never leaves a partially-committed object (`spec.md` §4.1's
/// "temp-then-rename" error contract).
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("part")
    ));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| PipelineError::Io {
            uri: path.display().to_string(),
            source: e,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| PipelineError::Io {
            uri: path.display().to_string(),
            source: e,
        })
}

async fn append_plain(path: &Path, text: &str) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| PipelineError::Io {
            uri: path.display().to_string(),
            source: e,
        })?;
    file.write_all(text.as_bytes())
        .await
        .map_err(|e| PipelineError::Io {
            uri: path.display().to_string(),
            source: e,
        })
}

async fn list_entries(dir_uri: &str, want_dirs: Option<bool>) -> Result<Vec<String>> {
    let path = LocalFsStore::path_of(dir_uri);
    let mut rd = tokio::fs::read_dir(&path)
        .await
        .map_err(|e| to_io_or_not_found(dir_uri, e))?;
    let mut out = Vec::new();
    while let Some(entry) = rd.next_entry().await.map_err(|e| PipelineError::Io {
        uri: dir_uri.to_string(),
        source: e,
    })? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let is_dir = entry
            .file_type()
            .await
            .map_err(|e| PipelineError::Io {
                uri: dir_uri.to_string(),
                source: e,
            })?
            .is_dir();
        if let Some(want) = want_dirs {
            if want != is_dir {
                continue;
            }
        }
        out.push(entry.path().display().to_string());
    }
    out.sort();
    Ok(out)
}

fn to_io_or_not_found(uri: &str, e: std::io::Error) -> PipelineError {
    if e.kind() == std::io::ErrorKind::NotFound {
        PipelineError::NotFound(uri.to_string())
    } else {
        PipelineError::Io {
            uri: uri.to_string(),
            source: e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusforge_core::Document;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = tempdir();
        let store = LocalFsStore::new();
        let uri = dir.join("shard.jsonl").display().to_string();
        let docs = vec![Document::with_text("a"), Document::with_text("b")];

        store.write_jsonl(&docs, &uri, WriteMode::Overwrite).await.unwrap();
        let read_back = store.read_jsonl(&uri).await.unwrap();
        assert_eq!(read_back, docs);
        assert!(store.exists(&uri).await.unwrap());
    }

    #[tokio::test]
    async fn compressed_roundtrip() {
        let dir = tempdir();
        let store = LocalFsStore::new();
        let uri = dir.join("shard.jsonl.gz").display().to_string();
        let docs = vec![Document::with_text("a")];

        store.write_jsonl(&docs, &uri, WriteMode::Overwrite).await.unwrap();
        let read_back = store.read_jsonl(&uri).await.unwrap();
        assert_eq!(read_back, docs);
    }

    #[tokio::test]
    async fn delete_missing_fails_not_found() {
        let dir = tempdir();
        let store = LocalFsStore::new();
        let uri = dir.join("missing.jsonl").display().to_string();
        let err = store.delete(&uri).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_sub_dirs_excludes_hidden_and_files() {
        let dir = tempdir();
        tokio::fs::create_dir(dir.join("subject=en")).await.unwrap();
        tokio::fs::create_dir(dir.join(".hidden")).await.unwrap();
        tokio::fs::write(dir.join("file.txt"), b"x").await.unwrap();

        let store = LocalFsStore::new();
        let dirs = store
            .list_sub_dirs(&dir.display().to_string())
            .await
            .unwrap();
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].ends_with("subject=en"));
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("corpusforge-test-{}", uuid_like()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn uuid_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }
}
