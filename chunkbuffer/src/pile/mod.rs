//! Pile: chunk-addressable storage backends.
//!
//! A pile stores the chunks of named buffers. A chunk is addressed by
//! `(name, part)` with parts dense from 0; the stream's end is marked by a
//! zero-length sentinel chunk one part past the last data chunk.
//!
//! Submodules:
//! - `memory`: in-process pile, useful for tests and small buffers
//! - `localfs`: one file per chunk under a base directory
//! - `s3`: one object per chunk in an S3-compatible bucket

pub mod localfs;
pub mod memory;
pub mod s3;

use crate::error::Result;
use async_trait::async_trait;

pub use localfs::FilePile;
pub use memory::MemoryPile;
pub use s3::{S3Config, S3Pile};

/// Reading end of one chunk.
#[async_trait]
pub trait ChunkRead: Send {
    /// Reads into `buf`; `Ok(0)` means the chunk has no more data.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Whether this chunk terminates the stream, i.e. it is zero-length.
    /// Backends may need I/O (a stat or head request) to answer.
    async fn last(&mut self) -> Result<bool>;

    async fn close(&mut self) -> Result<()>;
}

/// Writing end of one chunk. Data is only guaranteed to be stored once
/// `close` returns.
#[async_trait]
pub trait ChunkWrite: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    async fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()>;

    /// Marks the following part as the stream's sentinel.
    async fn set_last(&mut self) -> Result<()>;
}

#[async_trait]
impl<R: ChunkRead + ?Sized> ChunkRead for Box<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf).await
    }

    async fn last(&mut self) -> Result<bool> {
        (**self).last().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<W: ChunkWrite + ?Sized> ChunkWrite for Box<W> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }

    async fn set_last(&mut self) -> Result<()> {
        (**self).set_last().await
    }
}

#[async_trait]
pub trait Pile: Send + Sync {
    /// Opens a chunk for reading, failing with `NotFound` if it does not exist.
    async fn chunk_reader(&self, name: &str, part: u64) -> Result<Box<dyn ChunkRead>>;

    /// Opens or creates a chunk for writing.
    async fn chunk_writer(&self, name: &str, part: u64) -> Result<Box<dyn ChunkWrite>>;

    /// Places the zero-length sentinel chunk at `part`.
    async fn mark_last(&self, name: &str, part: u64) -> Result<()> {
        let mut sentinel = self.chunk_writer(name, part).await?;
        sentinel.close().await
    }
}

/// Object key of a chunk, `"{name}/{part}"`.
pub fn chunk_key(name: &str, part: u64) -> String {
    format!("{name}/{part}")
}
