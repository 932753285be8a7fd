//! Error types for the bridge protocol

use thiserror::Error;

use crate::sync::lock::{LockState, Party};

/// Chunk addressing failures.
///
/// `MalformedUrl` and `SpecNotFound` mean the URL producer and consumer
/// disagree about the protocol version; callers must surface them.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("could not parse chunk URL {0}")]
    MalformedUrl(String),

    #[error("could not find spec that served {0}")]
    SpecNotFound(String),

    #[error("chunk {index} out of range for {name} ({count} chunks)")]
    IndexOutOfRange {
        name: String,
        index: usize,
        count: usize,
    },

    #[error("inconsistent chunk spec {name}: {reason}")]
    InconsistentSpec { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("illegal lock transition by {party} thread: {from} -> {to}")]
    IllegalTransition {
        party: Party,
        from: LockState,
        to: LockState,
    },

    #[error("invalid lock state value {0}")]
    InvalidState(i32),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("fallback channel disconnected")]
    Disconnected,

    #[error("payload of {needed} bytes does not fit shared buffer of {capacity} bytes")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("upload {name} needs {needed} bytes but the files buffer holds {capacity}")]
    UploadTooLarge {
        name: String,
        needed: usize,
        capacity: usize,
    },

    #[error("fallback transport selected for {0} but no command channel was provided")]
    MissingChannel(&'static str),

    #[error("{what} declares {declared} bytes but its buffer holds {actual}")]
    SizeMismatch {
        what: &'static str,
        declared: usize,
        actual: usize,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("malformed file actions: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid entry name {0:?}")]
    InvalidName(String),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode snapshot: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
