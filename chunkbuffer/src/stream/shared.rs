//! SharedBuffer: growable byte store with one appender and many readers.
//!
//! Readers start at an absolute offset and block until bytes past their
//! position are appended, or until the buffer is closed. The writer may
//! release a flushed prefix to bound memory; offsets stay absolute.

use crate::error::{ChunkBufferError, Result};
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::sync::{RwLock, watch};

#[derive(Clone, Copy, Debug, Default)]
struct Progress {
    len: u64,
    closed: bool,
}

// Bytes held in memory; `base` is the absolute offset of `bytes[0]`.
#[derive(Default)]
struct Window {
    base: u64,
    bytes: BytesMut,
}

struct Inner {
    window: RwLock<Window>,
    progress: watch::Sender<Progress>,
}

#[derive(Clone)]
pub struct SharedBuffer {
    inner: Arc<Inner>,
}

impl Default for SharedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedBuffer {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            inner: Arc::new(Inner {
                window: RwLock::new(Window::default()),
                progress,
            }),
        }
    }

    pub async fn append(&self, p: &[u8]) -> Result<usize> {
        let mut window = self.inner.window.write().await;
        if self.is_closed() {
            return Err(ChunkBufferError::WriterClosed);
        }
        window.bytes.extend_from_slice(p);
        let len = window.base + window.bytes.len() as u64;
        self.inner.progress.send_modify(|progress| progress.len = len);
        Ok(p.len())
    }

    /// Total bytes appended so far, including released ones.
    pub fn appended(&self) -> u64 {
        self.inner.progress.borrow().len
    }

    pub fn is_closed(&self) -> bool {
        self.inner.progress.borrow().closed
    }

    /// Declares that no more bytes will be appended. Idempotent.
    pub fn close(&self) {
        self.inner.progress.send_if_modified(|progress| {
            let changed = !progress.closed;
            progress.closed = true;
            changed
        });
    }

    /// Drops bytes before absolute offset `upto`. Readers positioned before
    /// it fail from then on.
    pub async fn release(&self, upto: u64) {
        let mut window = self.inner.window.write().await;
        if upto <= window.base {
            return;
        }
        let n = ((upto - window.base) as usize).min(window.bytes.len());
        window.bytes.advance(n);
        window.base += n as u64;
    }

    /// Bytes currently held in memory.
    pub async fn resident(&self) -> usize {
        self.inner.window.read().await.bytes.len()
    }

    pub fn reader_at(&self, offset: u64) -> SharedReader {
        SharedReader {
            buf: self.clone(),
            pos: offset,
            progress: self.inner.progress.subscribe(),
        }
    }
}

/// Cursor into a [`SharedBuffer`]; never mutates the buffer.
pub struct SharedReader {
    buf: SharedBuffer,
    pos: u64,
    progress: watch::Receiver<Progress>,
}

impl SharedReader {
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reads bytes at the cursor, waiting for them to be appended. Returns
    /// `Ok(0)` once the buffer is closed and nothing is left past the cursor.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let pos = self.pos;
        let len = {
            let progress = self
                .progress
                .wait_for(|p| p.len > pos || p.closed)
                .await
                .map_err(|_| ChunkBufferError::WriterClosed)?;
            progress.len
        };
        if len <= pos {
            return Ok(0);
        }

        let window = self.buf.inner.window.read().await;
        if pos < window.base {
            return Err(ChunkBufferError::Released(pos));
        }
        let start = (pos - window.base) as usize;
        let n = (window.bytes.len() - start).min(out.len());
        out[..n].copy_from_slice(&window.bytes[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}
