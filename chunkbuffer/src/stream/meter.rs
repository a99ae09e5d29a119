//! Byte-counting wrappers for chunk handles.

use crate::error::Result;
use crate::pile::{ChunkRead, ChunkWrite};
use async_trait::async_trait;

pub struct ReadMeter<R> {
    inner: R,
    count: u64,
    eof: bool,
}

impl<R: ChunkRead> ReadMeter<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            count: 0,
            eof: false,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.count
    }

    /// Set once a read returned no data.
    pub fn at_eof(&self) -> bool {
        self.eof
    }
}

#[async_trait]
impl<R: ChunkRead> ChunkRead for ReadMeter<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(buf).await?;
        if n == 0 && !buf.is_empty() {
            self.eof = true;
        }
        self.count += n as u64;
        Ok(n)
    }

    async fn last(&mut self) -> Result<bool> {
        self.inner.last().await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Counts the bytes written through a chunk writer. The write side reaches its
/// end when `close` returns.
pub struct WriteMeter<W> {
    inner: W,
    count: u64,
}

impl<W: ChunkWrite> WriteMeter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn bytes(&self) -> u64 {
        self.count
    }
}

#[async_trait]
impl<W: ChunkWrite> ChunkWrite for WriteMeter<W> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf).await?;
        self.count += n as u64;
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    async fn set_last(&mut self) -> Result<()> {
        self.inner.set_last().await
    }
}
