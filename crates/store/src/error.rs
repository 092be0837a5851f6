use std::path::PathBuf;

/// Errors surfaced by the storage engine.
///
/// Retry exhaustion in the retry-write protocol is deliberately *not* an
/// error; it is reported as [`crate::retry::WriteStatus::RetriesExhausted`]
/// because the competing writer's output remains valid.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A UID supplied for path construction was empty or not in canonical
    /// form. Always fatal to the single operation.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// A level-specific stream open required an identity field that has not
    /// been populated yet.
    #[error("missing identity field: {0}")]
    MissingIdentity(&'static str),

    /// Neither the uncompressed nor the `.gz` variant of a document exists.
    #[error("not found: {path}/{name}")]
    NotFound { path: String, name: String },

    /// A stored document failed to parse as JSON.
    #[error("malformed document {}: {source}", path.display())]
    MalformedDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An I/O error was recorded on a streaming sink. `finish()` reports it
    /// rather than panicking so the owning writer can decide whether to
    /// clean up a partial file.
    #[error("stream failure on {name}: {message}")]
    StreamFailure { name: String, message: String },

    /// A bulk or frame write produced zero payload bytes; indicates an
    /// upstream data-shape bug.
    #[error("empty write to {0}")]
    EmptyWrite(String),

    /// An attribute value could not be normalised to a byte sequence.
    #[error("unsupported binary value: {0}")]
    UnsupportedBinaryValue(&'static str),

    /// A stream key was closed or written that is not in the open registry.
    #[error("no open stream for {0}")]
    UnknownStream(String),

    /// A stream was opened twice for the same (path, name) key.
    #[error("stream already open for {0}")]
    StreamAlreadyOpen(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Uid(#[from] wado_types::UidError),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
