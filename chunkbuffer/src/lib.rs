//! Streaming chunked buffer over a pluggable pile.
//!
//! A [`ChunkBuffer`] splits a byte stream into fixed-size chunks, flushes them
//! to a [`Pile`] in parallel while the producer keeps writing, and reads them
//! back with parallel prefetch in strict order. The stream's end is a
//! zero-length sentinel chunk, so a reader needs nothing but the pile and the
//! buffer name.

pub mod buffer;
pub mod config;
pub mod error;
pub mod pile;
pub mod stream;

pub use buffer::{BufferReader, BufferWriter, ChunkBuffer};
pub use config::ChunkBufferConfig;
pub use error::{ChunkBufferError, Result};
pub use pile::{ChunkRead, ChunkWrite, FilePile, MemoryPile, Pile, S3Config, S3Pile};
