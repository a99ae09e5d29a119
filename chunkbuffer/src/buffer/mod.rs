//! ChunkBuffer: a named byte stream stored as chunks in a pile.
//!
//! Writes go to the writer engine, reads to the reader engine; the two halves
//! share nothing but the pile and the buffer name. A buffer is normally
//! written to the end and closed before it is read. Reading while a write is
//! still in progress may fail with `NotFound` for chunks not flushed yet.
//!
//! ```no_run
//! # async fn demo() -> chunkbuffer::Result<()> {
//! use std::sync::Arc;
//! use chunkbuffer::{ChunkBuffer, MemoryPile};
//!
//! let pile = Arc::new(MemoryPile::new());
//! let mut buf = ChunkBuffer::new("greeting", pile.clone());
//! buf.write(b"hello").await?;
//! buf.close().await?;
//!
//! let mut back = ChunkBuffer::new("greeting", pile);
//! let mut out = Vec::new();
//! back.read_to_end(&mut out).await?;
//! # Ok(())
//! # }
//! ```

pub mod layout;
pub mod reader;
pub mod writer;

use crate::config::ChunkBufferConfig;
use crate::error::Result;
use crate::pile::Pile;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub use layout::ChunkLayout;
pub use reader::{BufferReader, FetchCursor};
pub use writer::BufferWriter;

pub struct ChunkBuffer {
    config: ChunkBufferConfig,
    writer: BufferWriter,
    reader: BufferReader,
}

impl ChunkBuffer {
    /// Opens `name` in `pile` with the default configuration.
    pub fn new(name: impl Into<String>, pile: Arc<dyn Pile>) -> Self {
        Self::build(name.into(), pile, ChunkBufferConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        pile: Arc<dyn Pile>,
        config: ChunkBufferConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(name.into(), pile, config))
    }

    fn build(name: String, pile: Arc<dyn Pile>, config: ChunkBufferConfig) -> Self {
        let name: Arc<str> = Arc::from(name);
        Self {
            config,
            writer: BufferWriter::new(name.clone(), pile.clone(), &config),
            reader: BufferReader::new(name, pile, &config),
        }
    }

    pub fn name(&self) -> &str {
        self.writer.name()
    }

    pub fn config(&self) -> &ChunkBufferConfig {
        &self.config
    }

    pub async fn write(&mut self, p: &[u8]) -> Result<usize> {
        self.writer.write(p).await
    }

    pub async fn copy_from<R>(&mut self, src: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.writer.copy_from(src).await
    }

    /// Closes the writing half: flushes the tail chunk and places the
    /// sentinel.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader.read(buf).await
    }

    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<u64> {
        self.reader.read_to_end(out).await
    }

    /// Stops the reading half's fetch workers.
    pub async fn close_reader(&mut self) {
        self.reader.close().await
    }

    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    pub fn bytes_read(&self) -> u64 {
        self.reader.bytes_read()
    }

    /// Splits into halves that can be driven from different tasks.
    pub fn split(self) -> (BufferWriter, BufferReader) {
        (self.writer, self.reader)
    }
}
