use std::sync::Arc;

use thiserror::Error;

/// Error type carried by pile backends, the same boxed shape the object
/// adapters return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = ChunkBufferError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ChunkBufferError {
    #[error("chunk {name}/{part} not found")]
    NotFound { name: String, part: u64 },

    #[error("backend I/O failed on chunk {name}/{part}: {source}")]
    BackendIo {
        name: String,
        part: u64,
        #[source]
        source: BoxError,
    },

    // Raised by the reassembly stream; the source is shared so every later
    // read can report it again.
    #[error("stream aborted at chunk {part}: {source}")]
    Stream {
        part: u64,
        #[source]
        source: Arc<ChunkBufferError>,
    },

    // The caller's input failed, not the pile.
    #[error("reading the source stream failed: {0}")]
    Source(#[source] std::io::Error),

    #[error("writer is closed")]
    WriterClosed,

    #[error("writer is poisoned by an earlier chunk flush failure")]
    Poisoned,

    #[error("offset {0} was already released from the shared buffer")]
    Released(u64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ChunkBufferError {
    pub fn not_found(name: impl Into<String>, part: u64) -> Self {
        Self::NotFound {
            name: name.into(),
            part,
        }
    }

    pub fn backend(name: impl Into<String>, part: u64, source: impl Into<BoxError>) -> Self {
        Self::BackendIo {
            name: name.into(),
            part,
            source: source.into(),
        }
    }

    /// True for `NotFound`, including one surfaced through the read stream.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Stream { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Maps a filesystem error on a chunk, keeping `NotFound` distinct from other
/// I/O failures.
pub(crate) fn io_error(name: &str, part: u64, err: std::io::Error) -> ChunkBufferError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ChunkBufferError::not_found(name, part)
    } else {
        ChunkBufferError::backend(name, part, err)
    }
}
