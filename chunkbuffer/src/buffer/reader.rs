//! Reader engine: parallel chunk fetch with in-order delivery.
//!
//! `workers` fetch loops run ahead of the consumer. Loop `w` fetches parts
//! `w`, `w + workers`, `w + 2 * workers`, ... and feeds each into its slot of
//! an ordered reassembly stream, which the consumer drains by part number.

use crate::config::ChunkBufferConfig;
use crate::error::{ChunkBufferError, Result};
use crate::pile::{ChunkRead, Pile};
use crate::stream::{OrderedReader, ReadMeter, Slots, ordered};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, trace, warn};

/// Position of one fetch loop in the strided part assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCursor {
    worker: usize,
    workers: usize,
    part: u64,
}

impl FetchCursor {
    pub fn new(worker: usize, workers: usize) -> Self {
        Self {
            worker,
            workers,
            part: worker as u64,
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn part(&self) -> u64 {
        self.part
    }

    pub fn advance(&mut self) {
        self.part += self.workers as u64;
    }
}

pub struct BufferReader {
    name: Arc<str>,
    pile: Arc<dyn Pile>,
    config: ChunkBufferConfig,
    stream: Option<OrderedReader>,
    supervisor: Option<JoinHandle<()>>,
    bytes_read: u64,
    closed: bool,
}

impl BufferReader {
    pub fn new(name: Arc<str>, pile: Arc<dyn Pile>, config: &ChunkBufferConfig) -> Self {
        Self {
            name,
            pile,
            config: *config,
            stream: None,
            supervisor: None,
            bytes_read: 0,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Reads the next bytes of the stream. Fetching starts on the first call.
    /// `Ok(0)` means the sentinel was reached, or the reader was closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(stream) = self.started() else {
            return Ok(0);
        };
        let n = stream.read(buf).await?;
        self.bytes_read += n as u64;
        Ok(n)
    }

    /// Returns the next piece of the stream without copying, or `None` at the
    /// end.
    pub async fn next_bytes(&mut self) -> Result<Option<Bytes>> {
        let Some(stream) = self.started() else {
            return Ok(None);
        };
        let piece = stream.next_piece().await?;
        if let Some(piece) = &piece {
            self.bytes_read += piece.len() as u64;
        }
        Ok(piece)
    }

    /// Reads the rest of the stream into `out`, returning the bytes added.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<u64> {
        let mut total = 0u64;
        while let Some(piece) = self.next_bytes().await? {
            out.extend_from_slice(&piece);
            total += piece.len() as u64;
        }
        Ok(total)
    }

    /// Stops the fetch workers. Later reads return end of stream.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(stream) = self.stream.as_mut() {
            debug!(name = %self.name, part = stream.head(), "stopping chunk fetch");
            stream.close().await;
        }
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
        debug!(name = %self.name, bytes = self.bytes_read, "closed chunk buffer reader");
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send {
        futures::stream::unfold(Some(self), |reader| async move {
            let mut reader = reader?;
            match reader.next_bytes().await {
                Ok(Some(piece)) => Some((Ok(piece), Some(reader))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    fn started(&mut self) -> Option<&mut OrderedReader> {
        if self.closed {
            return None;
        }
        if self.stream.is_none() {
            self.start();
        }
        self.stream.as_mut()
    }

    fn start(&mut self) {
        let (slots, stream) = ordered(self.config.prefetch_depth);
        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers {
            workers.spawn(fetch_loop(
                FetchCursor::new(worker, self.config.workers),
                self.name.clone(),
                self.pile.clone(),
                slots.clone(),
                self.config.read_size,
            ));
        }
        debug!(name = %self.name, workers = self.config.workers, "started chunk fetch");
        self.supervisor = Some(tokio::spawn(supervise(workers, slots)));
        self.stream = Some(stream);
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        // Aborting the supervisor drops its JoinSet, which aborts the workers.
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

async fn supervise(mut workers: JoinSet<()>, slots: Slots) {
    while let Some(res) = workers.join_next().await {
        if let Err(err) = res {
            warn!("chunk fetch worker failed: {err}");
            slots.fail(ChunkBufferError::Join(err)).await;
        }
    }
    slots.close().await;
}

enum Fetched {
    More,
    Last,
    Abandoned,
}

async fn fetch_loop(
    mut cursor: FetchCursor,
    name: Arc<str>,
    pile: Arc<dyn Pile>,
    slots: Slots,
    read_size: usize,
) {
    loop {
        if slots.is_done().await {
            return;
        }
        let part = cursor.part();
        match fetch_chunk(&name, pile.as_ref(), &slots, part, read_size).await {
            Ok(Fetched::More) => cursor.advance(),
            Ok(Fetched::Last) => {
                debug!(name = %name, part, worker = cursor.worker(), "reached sentinel chunk");
                return;
            }
            Ok(Fetched::Abandoned) => return,
            Err(err) => {
                // Past the sentinel this is expected; the stream drops it.
                trace!(name = %name, part, worker = cursor.worker(), "fetch stopped: {err}");
                slots.add_error(part, err).await;
                return;
            }
        }
    }
}

async fn fetch_chunk(
    name: &str,
    pile: &dyn Pile,
    slots: &Slots,
    part: u64,
    read_size: usize,
) -> Result<Fetched> {
    let reader = pile.chunk_reader(name, part).await?;
    let Some(tx) = slots.add(part).await else {
        return Ok(Fetched::Abandoned);
    };
    let mut chunk = ReadMeter::new(reader);

    while !chunk.at_eof() {
        let mut piece = BytesMut::zeroed(read_size);
        let n = match chunk.read(&mut piece).await {
            Ok(n) => n,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return Ok(Fetched::Abandoned);
            }
        };
        if n == 0 {
            continue;
        }
        piece.truncate(n);
        if tx.send(Ok(piece.freeze())).await.is_err() {
            return Ok(Fetched::Abandoned);
        }
    }

    // Only an empty chunk can end the stream.
    let last = if chunk.bytes() > 0 {
        Ok(false)
    } else {
        chunk.last().await
    };
    if let Err(err) = chunk.close().await {
        warn!(name, part, "closing chunk reader failed: {err}");
    }
    match last {
        Ok(true) => {
            // Declare the end while the slot is still open so the consumer
            // never steps past it first.
            slots.finish(part).await;
            Ok(Fetched::Last)
        }
        Ok(false) => {
            trace!(name, part, bytes = chunk.bytes(), "fetched chunk");
            Ok(Fetched::More)
        }
        Err(err) => {
            let _ = tx.send(Err(err)).await;
            Ok(Fetched::Abandoned)
        }
    }
}
