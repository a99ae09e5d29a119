//! Writer engine: turns a byte stream into flushed chunks.
//!
//! Every `write` appends to a [`SharedBuffer`] and hands each chunk it
//! completes to a flush task. The chunk still being filled gets a background
//! flush task too; that task blocks on the shared buffer until the chunk is
//! full or the buffer is closed, and the next `write` or `close` that
//! completes it awaits its handle.
//!
//! Every spawned flush is tracked in the writer before the first await, so a
//! cancelled `write` or `close` leaves nothing detached: the next call awaits
//! whatever the cancelled one did not. Bytes a cancelled `write` already
//! appended stay in the stream.

use super::layout::ChunkLayout;
use crate::config::ChunkBufferConfig;
use crate::error::{ChunkBufferError, Result};
use crate::pile::{ChunkWrite, Pile};
use crate::stream::{SharedBuffer, SharedReader, WriteMeter};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, trace, warn};

type FlushHandle = JoinHandle<Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Closed,
    Poisoned,
}

pub struct BufferWriter {
    name: Arc<str>,
    pile: Arc<dyn Pile>,
    layout: ChunkLayout,
    read_size: usize,
    buf: SharedBuffer,
    // Flushes of complete chunks not yet awaited, oldest first.
    pending: VecDeque<FlushHandle>,
    tail: Option<FlushHandle>,
    state: WriterState,
}

impl BufferWriter {
    pub fn new(name: Arc<str>, pile: Arc<dyn Pile>, config: &ChunkBufferConfig) -> Self {
        Self {
            name,
            pile,
            layout: ChunkLayout::new(config.chunk_size),
            read_size: config.read_size,
            buf: SharedBuffer::new(),
            pending: VecDeque::new(),
            tail: None,
            state: WriterState::Open,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_written(&self) -> u64 {
        self.buf.appended()
    }

    pub fn is_closed(&self) -> bool {
        self.state == WriterState::Closed
    }

    /// Appends `p` to the stream. Returns once every chunk this call
    /// completed is stored in the pile.
    pub async fn write(&mut self, p: &[u8]) -> Result<usize> {
        self.check_open()?;
        if p.is_empty() {
            return Ok(0);
        }
        self.settle().await?;

        let old = self.buf.appended();
        let n = self.buf.append(p).await?;
        let written = old + n as u64;
        let plan = self.layout.plan_write(old, written);

        if plan.await_tail {
            if let Some(tail) = self.tail.take() {
                self.pending.push_back(tail);
            }
        }
        for c in plan.full {
            let handle = self.spawn_flush(c);
            self.pending.push_back(handle);
        }
        if let Some(c) = plan.new_tail {
            self.tail = Some(self.spawn_flush(c));
        }
        self.settle().await?;

        self.buf
            .release(self.layout.chunk_start(self.layout.complete_chunks(written)))
            .await;
        let resident = self.buf.resident().await;
        trace!(name = %self.name, written, resident, "write settled");
        Ok(n)
    }

    /// Drains `src` into the stream, returning the number of bytes copied.
    /// The writer is left open.
    pub async fn copy_from<R>(&mut self, src: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut chunk = vec![0u8; self.read_size];
        let mut copied = 0u64;
        loop {
            let n = src.read(&mut chunk).await.map_err(ChunkBufferError::Source)?;
            if n == 0 {
                return Ok(copied);
            }
            self.write(&chunk[..n]).await?;
            copied += n as u64;
        }
    }

    /// Flushes the tail chunk and places the sentinel. Closing twice is a
    /// no-op.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            WriterState::Closed => return Ok(()),
            WriterState::Poisoned => return Err(ChunkBufferError::Poisoned),
            WriterState::Open => {}
        }

        self.buf.close();
        if let Some(tail) = self.tail.take() {
            self.pending.push_back(tail);
        }
        self.settle().await?;

        let written = self.buf.appended();
        let sentinel = self.layout.started_chunks(written);
        // Every chunk is stored; a failed sentinel can be retried by closing again.
        self.pile.mark_last(&self.name, sentinel).await?;
        self.buf.release(written).await;
        self.state = WriterState::Closed;
        debug!(
            name = %self.name,
            bytes = written,
            sentinel,
            "closed chunk buffer writer"
        );
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Closed => Err(ChunkBufferError::WriterClosed),
            WriterState::Poisoned => Err(ChunkBufferError::Poisoned),
        }
    }

    // Awaits every pending flush. A handle leaves the queue only once it
    // resolved, so cancelling this future loses nothing.
    async fn settle(&mut self) -> Result<()> {
        let mut first_err = None;
        while let Some(handle) = self.pending.front_mut() {
            let res = handle.await;
            self.pending.pop_front();
            record(&mut first_err, res);
        }
        match first_err {
            Some(err) => Err(self.poison(err)),
            None => Ok(()),
        }
    }

    fn poison(&mut self, err: ChunkBufferError) -> ChunkBufferError {
        warn!(name = %self.name, "chunk flush failed, writer poisoned: {err}");
        self.state = WriterState::Poisoned;
        self.abort_flushes();
        err
    }

    fn abort_flushes(&mut self) {
        for handle in self.pending.drain(..).chain(self.tail.take()) {
            handle.abort();
        }
    }

    fn spawn_flush(&self, part: u64) -> FlushHandle {
        let src = self.buf.reader_at(self.layout.chunk_start(part));
        tokio::spawn(flush_chunk(
            self.pile.clone(),
            self.name.clone(),
            part,
            src,
            self.layout.chunk_size,
            self.read_size,
        ))
    }
}

impl Drop for BufferWriter {
    fn drop(&mut self) {
        // An unclosed writer never commits its tail.
        self.abort_flushes();
    }
}

fn record(first_err: &mut Option<ChunkBufferError>, res: Result<Result<()>, JoinError>) {
    let err = match res {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(join) => ChunkBufferError::Join(join),
    };
    if first_err.is_none() {
        *first_err = Some(err);
    }
}

/// Copies `[part * chunk_size, (part + 1) * chunk_size)` from the shared
/// buffer into a new pile chunk, stopping early if the buffer closes.
///
/// The pile chunk is opened only once its first bytes are available, so a
/// chunk still waiting for data never exists in the pile.
async fn flush_chunk(
    pile: Arc<dyn Pile>,
    name: Arc<str>,
    part: u64,
    mut src: SharedReader,
    chunk_size: u64,
    read_size: usize,
) -> Result<()> {
    let mut scratch = vec![0u8; read_size.min(chunk_size as usize).max(1)];
    let want = chunk_size.min(scratch.len() as u64) as usize;
    let n = src.read(&mut scratch[..want]).await?;
    if n == 0 {
        return Ok(());
    }

    let mut chunk = WriteMeter::new(pile.chunk_writer(&name, part).await?);
    chunk.write_all(&scratch[..n]).await?;
    let mut remaining = chunk_size - n as u64;
    while remaining > 0 {
        let want = remaining.min(scratch.len() as u64) as usize;
        let n = src.read(&mut scratch[..want]).await?;
        if n == 0 {
            break;
        }
        chunk.write_all(&scratch[..n]).await?;
        remaining -= n as u64;
        trace!(name = %name, part, offset = src.position(), "chunk flush progress");
    }
    chunk.close().await?;
    debug!(name = %name, part, bytes = chunk.bytes(), "flushed chunk");
    Ok(())
}
