use std::io::{Read, Write};

use corpusforge_core::{PipelineError, Result};

/// The line-oriented codecs the Store hides behind a uniform JSONL API.
/// Chosen by inspecting a URI's suffix, matching `spec.md` §4.1: ".gz" and
/// ".zst"/".zstd" are transparently decompressed on read and compressed on
/// write; anything else is treated as plain-text JSONL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Plain,
    Gzip,
    Zstd,
}

impl Codec {
    pub fn from_uri(uri: &str) -> Self {
        if uri.ends_with(".gz") {
            Codec::Gzip
        } else if uri.ends_with(".zst") || uri.ends_with(".zstd") {
            Codec::Zstd
        } else {
            Codec::Plain
        }
    }

    pub fn decode(&self, raw: &[u8], uri: &str) -> Result<String> {
        let bytes = match self {
            Codec::Plain => raw.to_vec(),
            Codec::Gzip => {
                let mut decoder = flate2::read::GzDecoder::new(raw);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| PipelineError::Codec {
                        uri: uri.to_string(),
                        reason: format!("gzip decode failed: {e}"),
                    })?;
                out
            }
            Codec::Zstd => zstd::decode_all(raw).map_err(|e| PipelineError::Codec {
                uri: uri.to_string(),
                reason: format!("zstd decode failed: {e}"),
            })?,
        };
        String::from_utf8(bytes).map_err(|e| PipelineError::Codec {
            uri: uri.to_string(),
            reason: format!("invalid utf-8: {e}"),
        })
    }

    pub fn encode(&self, text: &str, uri: &str) -> Result<Vec<u8>> {
        match self {
            Codec::Plain => Ok(text.as_bytes().to_vec()),
            Codec::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(text.as_bytes())
                    .map_err(|e| PipelineError::Codec {
                        uri: uri.to_string(),
                        reason: format!("gzip encode failed: {e}"),
                    })?;
                encoder.finish().map_err(|e| PipelineError::Codec {
                    uri: uri.to_string(),
                    reason: format!("gzip finish failed: {e}"),
                })
            }
            Codec::Zstd => {
                zstd::encode_all(text.as_bytes(), 0).map_err(|e| PipelineError::Codec {
                    uri: uri.to_string(),
                    reason: format!("zstd encode failed: {e}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_codec_by_suffix() {
        assert_eq!(Codec::from_uri("a/b.jsonl"), Codec::Plain);
        assert_eq!(Codec::from_uri("a/b.jsonl.gz"), Codec::Gzip);
        assert_eq!(Codec::from_uri("a/b.jsonl.zst"), Codec::Zstd);
    }

    #[test]
    fn gzip_roundtrips() {
        let text = "hello\nworld\n";
        let encoded = Codec::Gzip.encode(text, "x.gz").unwrap();
        let decoded = Codec::Gzip.decode(&encoded, "x.gz").unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn zstd_roundtrips() {
        let text = "hello\nworld\n";
        let encoded = Codec::Zstd.encode(text, "x.zst").unwrap();
        let decoded = Codec::Zstd.decode(&encoded, "x.zst").unwrap();
        assert_eq!(decoded, text);
    }
}
