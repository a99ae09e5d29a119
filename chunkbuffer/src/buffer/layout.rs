//! Chunk arithmetic: mapping stream offsets to chunk indices.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_size: u64,
}

/// What one write has to flush, given the byte counts around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushPlan {
    /// Chunks that were not started before and are now complete.
    pub full: Range<u64>,
    /// The previous write's tail chunk got completed and must be awaited.
    pub await_tail: bool,
    /// A new incomplete tail chunk to start flushing in the background.
    pub new_tail: Option<u64>,
}

impl ChunkLayout {
    pub fn new(chunk_size: u64) -> Self {
        Self { chunk_size }
    }

    #[inline]
    pub fn chunk_index_of(&self, offset: u64) -> u64 {
        offset / self.chunk_size
    }

    #[inline]
    pub fn within_chunk_offset(&self, offset: u64) -> u64 {
        offset % self.chunk_size
    }

    #[inline]
    pub fn chunk_start(&self, index: u64) -> u64 {
        index * self.chunk_size
    }

    /// Chunks entirely covered by the first `bytes` bytes.
    pub fn complete_chunks(&self, bytes: u64) -> u64 {
        bytes / self.chunk_size
    }

    /// Chunks holding any of the first `bytes` bytes; also the part of the
    /// sentinel once the stream ends at `bytes`.
    pub fn started_chunks(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.chunk_size)
    }

    pub fn has_tail(&self, bytes: u64) -> bool {
        self.within_chunk_offset(bytes) != 0
    }

    pub fn plan_write(&self, old: u64, written: u64) -> FlushPlan {
        let next = self.started_chunks(old);
        let done = self.complete_chunks(written);
        let await_tail = self.has_tail(old) && self.chunk_index_of(old) < done;
        let tail = self.chunk_index_of(written);
        let new_tail = (self.has_tail(written) && tail >= next).then_some(tail);
        FlushPlan {
            full: next..done.max(next),
            await_tail,
            new_tail,
        }
    }
}
