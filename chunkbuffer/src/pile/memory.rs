//! In-memory pile: every chunk is a `Bytes` slab keyed by (name, part).

use super::{ChunkRead, ChunkWrite, Pile};
use crate::error::{ChunkBufferError, Result};
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type ChunkMap = HashMap<String, BTreeMap<u64, Bytes>>;

/// Pile kept entirely in process memory. Clones share the same chunks.
#[derive(Clone, Default)]
pub struct MemoryPile {
    chunks: Arc<RwLock<ChunkMap>>,
}

impl MemoryPile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy-free handle to the stored chunk, if any.
    pub async fn chunk(&self, name: &str, part: u64) -> Option<Bytes> {
        let chunks = self.chunks.read().await;
        chunks.get(name).and_then(|parts| parts.get(&part)).cloned()
    }

    /// Parts of `name` and their lengths, ascending by part.
    pub async fn chunk_lens(&self, name: &str) -> Vec<(u64, usize)> {
        let chunks = self.chunks.read().await;
        chunks
            .get(name)
            .map(|parts| parts.iter().map(|(p, d)| (*p, d.len())).collect())
            .unwrap_or_default()
    }

    async fn put(&self, name: &str, part: u64, data: Bytes) {
        let mut chunks = self.chunks.write().await;
        chunks
            .entry(name.to_string())
            .or_default()
            .insert(part, data);
    }
}

#[async_trait]
impl Pile for MemoryPile {
    async fn chunk_reader(&self, name: &str, part: u64) -> Result<Box<dyn ChunkRead>> {
        match self.chunk(name, part).await {
            Some(data) => Ok(Box::new(MemoryChunkReader {
                last: data.is_empty(),
                data,
            })),
            None => Err(ChunkBufferError::not_found(name, part)),
        }
    }

    // Nothing is stored until the writer closes.
    async fn chunk_writer(&self, name: &str, part: u64) -> Result<Box<dyn ChunkWrite>> {
        Ok(Box::new(MemoryChunkWriter {
            pile: self.clone(),
            name: name.to_string(),
            part,
            buf: BytesMut::new(),
            closed: false,
        }))
    }

    async fn mark_last(&self, name: &str, part: u64) -> Result<()> {
        self.put(name, part, Bytes::new()).await;
        Ok(())
    }
}

struct MemoryChunkReader {
    data: Bytes,
    last: bool,
}

#[async_trait]
impl ChunkRead for MemoryChunkReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data.advance(n);
        Ok(n)
    }

    async fn last(&mut self) -> Result<bool> {
        Ok(self.last)
    }

    async fn close(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }
}

struct MemoryChunkWriter {
    pile: MemoryPile,
    name: String,
    part: u64,
    buf: BytesMut,
    closed: bool,
}

#[async_trait]
impl ChunkWrite for MemoryChunkWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(ChunkBufferError::backend(
                &self.name,
                self.part,
                "write to closed chunk",
            ));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            let data = self.buf.split().freeze();
            self.pile.put(&self.name, self.part, data).await;
            self.closed = true;
        }
        Ok(())
    }

    async fn set_last(&mut self) -> Result<()> {
        self.pile.mark_last(&self.name, self.part + 1).await
    }
}
