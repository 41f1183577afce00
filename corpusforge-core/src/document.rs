use serde_json::Value;
use std::collections::BTreeMap;

/// The structural key holding a document's primary text payload.
pub const CONTENT_KEY: &str = "text";

/// The structural key an annotating filter may set to explain a drop/keep decision.
pub const FILTER_REASON_KEY: &str = "filter_reason";

/// A single unit flowing through the pipeline: an arbitrary JSON object with
/// two reserved, otherwise-opaque keys (`text`, `filter_reason`).
///
/// `BTreeMap` keeps key order stable so re-serialized documents are
/// byte-comparable across runs, which the resumption tests rely on.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Document(pub BTreeMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Document(BTreeMap::new())
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(CONTENT_KEY.to_string(), Value::String(text.into()));
        Document(map)
    }

    pub fn text(&self) -> Option<&str> {
        self.0.get(CONTENT_KEY).and_then(Value::as_str)
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.0
            .insert(CONTENT_KEY.to_string(), Value::String(text.into()));
    }

    pub fn filter_reason(&self) -> Option<&str> {
        self.0.get(FILTER_REASON_KEY).and_then(Value::as_str)
    }

    /// Sets the filter reason iff one is not already present, matching the
    /// original mapper convention of never overwriting an earlier reason.
    pub fn set_filter_reason_if_absent(&mut self, reason: impl Into<String>) {
        self.0
            .entry(FILTER_REASON_KEY.to_string())
            .or_insert_with(|| Value::String(reason.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_roundtrip() {
        let mut doc = Document::with_text("hello");
        assert_eq!(doc.text(), Some("hello"));
        doc.set_text("world");
        assert_eq!(doc.text(), Some("world"));
    }

    #[test]
    fn filter_reason_does_not_overwrite() {
        let mut doc = Document::with_text("x");
        doc.set_filter_reason_if_absent("too_short");
        doc.set_filter_reason_if_absent("other_reason");
        assert_eq!(doc.filter_reason(), Some("too_short"));
    }

    #[test]
    fn serializes_as_flat_object() {
        let doc = Document::with_text("hi");
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"text":"hi"}"#);
    }
}
