//! Buffer configuration.

use crate::error::{ChunkBufferError, Result};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;
pub const DEFAULT_PREFETCH_DEPTH: usize = 16;

/// Options shared by the writer and reader engines of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBufferConfig {
    /// Bytes per flushed chunk; only the tail chunk may be shorter.
    pub chunk_size: u64,
    /// Number of parallel fetch workers on the read side.
    pub workers: usize,
    /// Size of each piece a fetch worker reads from a chunk.
    pub read_size: usize,
    /// Pieces a worker may queue for one chunk before it waits for the reader.
    pub prefetch_depth: usize,
}

impl Default for ChunkBufferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            read_size: DEFAULT_READ_SIZE,
            prefetch_depth: DEFAULT_PREFETCH_DEPTH,
        }
    }
}

impl ChunkBufferConfig {
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size;
        self
    }

    pub fn with_prefetch_depth(mut self, prefetch_depth: usize) -> Self {
        self.prefetch_depth = prefetch_depth;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.chunk_size == 0 {
            errors.push("chunk_size must be greater than zero");
        }
        if self.workers == 0 {
            errors.push("workers must be greater than zero");
        }
        if self.read_size == 0 {
            errors.push("read_size must be greater than zero");
        }
        if self.prefetch_depth == 0 {
            errors.push("prefetch_depth must be greater than zero");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ChunkBufferError::InvalidConfig(errors.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ChunkBufferConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_values() {
        let cfg = ChunkBufferConfig::default()
            .with_chunk_size(0)
            .with_workers(0);
        let err = cfg.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: chunk_size must be greater than zero, workers must be greater than zero"
        );
    }
}
