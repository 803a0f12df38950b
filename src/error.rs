//! Error taxonomy shared by the client, stream and KV layers.
//!
//! Collaborator failures are translated into these variants at the boundary
//! where they occur and propagated unchanged from there; nothing downstream
//! remaps or swallows them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TfsError {
    /// Malformed path/URI, out-of-range seek, oversized KV record, and similar
    /// caller mistakes.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// File, directory or KV key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Second `close()` on the same stream.
    #[error("stream already closed")]
    AlreadyClosed,

    /// Any operation other than `close()` on a closed in-stream.
    #[error("stream closed")]
    StreamClosed,

    /// Operation on an out-stream that was already completed or canceled.
    #[error("stream finalized: {0}")]
    StreamFinalized(&'static str),

    /// The block-serving service does not currently hold the block. Transient
    /// for the service, terminal for the call that hit it.
    #[error("block unavailable: file {file_id} block {index}")]
    BlockUnavailable { file_id: i64, index: u32 },

    /// Namespace or block service unreachable after the retry budget.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// KV get with a caller buffer smaller than the stored value.
    #[error("buffer too small: need {need} bytes, capacity {capacity}")]
    BufferTooSmall { need: usize, capacity: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TfsError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TfsError::InvalidArgument(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        TfsError::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        TfsError::AlreadyExists(what.into())
    }

    pub fn permission_denied(what: impl Into<String>) -> Self {
        TfsError::PermissionDenied(what.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        TfsError::ServiceUnavailable(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TfsError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, TfsError::AlreadyExists(_))
    }

    /// Failures worth another attempt at the collaborator boundary. Everything
    /// else is either a hard error or handled by the collaborator itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TfsError::ServiceUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, TfsError>;
