use corpusforge_core::{Document, PipelineError, Result};

/// A pure function over one document, returning zero or more
/// documents. Mapper factories may hold expensive immutable state
/// (models, regexes, wordlists); the built-ins here are stateless since
/// the concrete mapper library is out of scope — they exist only to
/// exercise every classification path the step runner must support.
pub trait Mapper: Send + Sync {
    fn call(&self, doc: &Document) -> Result<Vec<Document>>;
}

/// Drops documents whose text content is shorter than `min` characters.
/// The `0 → removed` classification path.
pub struct LengthFilter {
    pub min: usize,
}

impl Mapper for LengthFilter {
    fn call(&self, doc: &Document) -> Result<Vec<Document>> {
        let len = doc.text().map(|t| t.chars().count()).unwrap_or(0);
        if len < self.min {
            Ok(vec![])
        } else {
            Ok(vec![doc.clone()])
        }
    }
}

/// Splits a document's text on blank-line boundaries into one document
/// per non-empty paragraph. The `≥2 → split` classification path.
pub struct SplitOnBlankLine;

impl Mapper for SplitOnBlankLine {
    fn call(&self, doc: &Document) -> Result<Vec<Document>> {
        let text = doc.text().unwrap_or("");
        let parts: Vec<&str> = text.split("\n\n").filter(|p| !p.trim().is_empty()).collect();
        Ok(parts
            .into_iter()
            .map(|p| {
                let mut out = doc.clone();
                out.set_text(p);
                out
            })
            .collect())
    }
}

/// Uppercases a document's text in place. The `1 → kept` classification
/// path for a pure modifier.
pub struct Uppercase;

impl Mapper for Uppercase {
    fn call(&self, doc: &Document) -> Result<Vec<Document>> {
        let mut out = doc.clone();
        if let Some(text) = doc.text() {
            out.set_text(text.to_uppercase());
        }
        Ok(vec![out])
    }
}

/// Always fails. Used only in tests to exercise the all-documents-
/// errored fatal path.
pub struct AlwaysError;

impl Mapper for AlwaysError {
    fn call(&self, _doc: &Document) -> Result<Vec<Document>> {
        Err(PipelineError::Mapper {
            mapper: "always_error".to_string(),
            reason: "synthetic failure".to_string(),
        })
    }
}
