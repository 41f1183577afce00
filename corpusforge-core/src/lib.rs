//! Common types shared by every corpusforge crate: the document model and
//! the closed error taxonomy the executor and worker loop match on.

mod document;
mod error;

pub use document::{Document, CONTENT_KEY, FILTER_REASON_KEY};
pub use error::{PipelineError, Result};
