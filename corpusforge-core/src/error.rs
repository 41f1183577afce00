use thiserror::Error;

/// The closed set of error kinds named in the error-handling design: each
/// carries enough context for the worker loop to decide whether to retry,
/// dead-letter, or abort the process.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("io error on {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("codec error decoding {uri}: {reason}")]
    Codec { uri: String, reason: String },

    #[error("mapper '{mapper}' failed on a document: {reason}")]
    Mapper { mapper: String, reason: String },

    #[error("lock acquisition timed out after {0:?}")]
    LockTimeout(std::time::Duration),

    #[error("queue operation lost a race and must be retried: {0}")]
    QueueContention(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("shard {shard} failed fatally at step '{step}': {reason}")]
    FatalShard {
        shard: String,
        step: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Whether this error kind is safe for the queue-level lease-expiry
    /// machinery to recover from by simply retrying the task later.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PipelineError::Io { .. }
                | PipelineError::LockTimeout(_)
                | PipelineError::QueueContention(_)
        )
    }
}
