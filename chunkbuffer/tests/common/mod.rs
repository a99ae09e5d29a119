use async_trait::async_trait;
use chunkbuffer::{
    ChunkBuffer, ChunkBufferConfig, ChunkBufferError, ChunkRead, ChunkWrite, MemoryPile, Pile,
    Result,
};
use std::sync::Arc;
use std::time::Duration;

/// Deterministic, non-repeating-per-chunk test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn config(chunk_size: u64) -> ChunkBufferConfig {
    ChunkBufferConfig::default()
        .with_chunk_size(chunk_size)
        .with_workers(4)
        .with_read_size(100)
}

pub async fn write_all(buf: &mut ChunkBuffer, data: &[u8], step: usize) {
    for piece in data.chunks(step.max(1)) {
        assert_eq!(buf.write(piece).await.unwrap(), piece.len());
    }
}

#[allow(dead_code)]
pub async fn read_back(pile: Arc<dyn Pile>, name: &str, chunk_size: u64) -> Result<Vec<u8>> {
    let mut buf = ChunkBuffer::with_config(name, pile, config(chunk_size))?;
    let mut out = Vec::new();
    buf.read_to_end(&mut out).await?;
    Ok(out)
}

/// Memory pile whose chunk opens finish in reverse part order: part `p` waits
/// `(parts - p)` ticks before it opens.
#[allow(dead_code)]
pub struct ReversedPile {
    pub inner: MemoryPile,
    pub parts: u64,
    pub tick: Duration,
}

#[async_trait]
impl Pile for ReversedPile {
    async fn chunk_reader(&self, name: &str, part: u64) -> Result<Box<dyn ChunkRead>> {
        let wait = self.parts.saturating_sub(part) as u32;
        tokio::time::sleep(self.tick * wait).await;
        self.inner.chunk_reader(name, part).await
    }

    async fn chunk_writer(&self, name: &str, part: u64) -> Result<Box<dyn ChunkWrite>> {
        self.inner.chunk_writer(name, part).await
    }

    async fn mark_last(&self, name: &str, part: u64) -> Result<()> {
        self.inner.mark_last(name, part).await
    }
}

/// Memory pile that refuses to store one part.
#[allow(dead_code)]
pub struct FailingPile {
    pub inner: MemoryPile,
    pub fail_part: u64,
}

#[async_trait]
impl Pile for FailingPile {
    async fn chunk_reader(&self, name: &str, part: u64) -> Result<Box<dyn ChunkRead>> {
        self.inner.chunk_reader(name, part).await
    }

    async fn chunk_writer(&self, name: &str, part: u64) -> Result<Box<dyn ChunkWrite>> {
        if part == self.fail_part {
            return Err(ChunkBufferError::backend(name, part, "disk full"));
        }
        self.inner.chunk_writer(name, part).await
    }
}
