//! Ordered reassembly of chunk data produced out of order.
//!
//! Producers register one slot per part and push the part's bytes into it;
//! the single consumer drains slots strictly by part number, whatever order
//! they were registered or filled in. The stream ends after the slot passed
//! to [`Slots::finish`], or when a missing slot is reached after
//! [`Slots::close`]. An error slot or a terminal failure aborts the stream,
//! and the error latches.

use crate::error::{ChunkBufferError, Result};
use bytes::{Buf, Bytes};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::debug;

pub type SlotItem = Result<Bytes>;

/// Producer end of one slot. Dropping it marks the slot exhausted.
pub type SlotSender = mpsc::Sender<SlotItem>;

enum Slot {
    Data(mpsc::Receiver<SlotItem>),
    Failed(ChunkBufferError),
}

#[derive(Default)]
struct State {
    slots: BTreeMap<u64, Slot>,
    end: Option<u64>,
    closed: bool,
    failure: Option<ChunkBufferError>,
    // Set by the consumer once it stopped; producers give up.
    done: bool,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// Producer handle, cloned into every fetch worker.
#[derive(Clone)]
pub struct Slots {
    shared: Arc<Shared>,
    depth: usize,
}

/// Creates a reassembly stream whose slots each buffer up to `depth` pieces.
pub fn ordered(depth: usize) -> (Slots, OrderedReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
        notify: Notify::new(),
    });
    let slots = Slots {
        shared: shared.clone(),
        depth: depth.max(1),
    };
    let reader = OrderedReader {
        shared,
        head: 0,
        current: None,
        pending: Bytes::new(),
        failure: None,
        finished: false,
    };
    (slots, reader)
}

impl Slots {
    /// Registers the slot for `part`. Returns `None` when the part can never
    /// be read: the consumer stopped, or the stream already ends before it.
    pub async fn add(&self, part: u64) -> Option<SlotSender> {
        let mut st = self.shared.state.lock().await;
        if st.done || st.end.is_some_and(|end| part > end) {
            return None;
        }
        let (tx, rx) = mpsc::channel(self.depth);
        st.slots.insert(part, Slot::Data(rx));
        drop(st);
        self.shared.notify.notify_one();
        Some(tx)
    }

    /// Registers `part` as failed; the consumer reports `err` when it gets
    /// there.
    pub async fn add_error(&self, part: u64, err: ChunkBufferError) {
        let mut st = self.shared.state.lock().await;
        if st.done || st.end.is_some_and(|end| part > end) {
            return;
        }
        st.slots.insert(part, Slot::Failed(err));
        drop(st);
        self.shared.notify.notify_one();
    }

    /// Declares `part` the final slot of the stream.
    pub async fn finish(&self, part: u64) {
        let mut st = self.shared.state.lock().await;
        st.end = Some(st.end.map_or(part, |end| end.min(part)));
        st.slots.retain(|p, _| *p <= part);
        drop(st);
        self.shared.notify.notify_one();
    }

    /// Aborts the stream at the consumer's current position.
    pub async fn fail(&self, err: ChunkBufferError) {
        let mut st = self.shared.state.lock().await;
        if st.failure.is_none() {
            st.failure = Some(err);
        }
        drop(st);
        self.shared.notify.notify_one();
    }

    /// Declares that no further slots will be added.
    pub async fn close(&self) {
        self.shared.state.lock().await.closed = true;
        self.shared.notify.notify_one();
    }

    pub async fn is_done(&self) -> bool {
        self.shared.state.lock().await.done
    }
}

/// Consumer end: reads the stream in part order.
pub struct OrderedReader {
    shared: Arc<Shared>,
    head: u64,
    current: Option<mpsc::Receiver<SlotItem>>,
    pending: Bytes,
    failure: Option<Arc<ChunkBufferError>>,
    finished: bool,
}

impl OrderedReader {
    /// The part currently being drained.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Reads the next bytes in order. `Ok(0)` means end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let piece = match self.next_piece().await? {
            Some(piece) => piece,
            None => return Ok(0),
        };
        let n = piece.len().min(buf.len());
        buf[..n].copy_from_slice(&piece[..n]);
        self.pending = piece;
        self.pending.advance(n);
        Ok(n)
    }

    /// Returns the next non-empty piece of data, or `None` at end of stream.
    pub async fn next_piece(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(err) = &self.failure {
                return Err(ChunkBufferError::Stream {
                    part: self.head,
                    source: err.clone(),
                });
            }
            if !self.pending.is_empty() {
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
            if self.finished {
                return Ok(None);
            }
            let Some(rx) = self.current.as_mut() else {
                self.advance().await;
                continue;
            };
            let item = rx.recv().await;
            match item {
                Some(Ok(piece)) => self.pending = piece,
                Some(Err(err)) => self.abort(err).await,
                None => {
                    self.current = None;
                    self.head += 1;
                }
            }
        }
    }

    /// Stops the stream: producers are told to give up and pending slots are
    /// dropped.
    pub async fn close(&mut self) {
        if !self.finished {
            self.finished = true;
            self.shutdown().await;
        }
    }

    // Waits until the head slot is registered, the stream ends, or it fails.
    async fn advance(&mut self) {
        loop {
            let mut st = self.shared.state.lock().await;
            if let Some(err) = st.failure.take() {
                drop(st);
                self.abort(err).await;
                return;
            }
            if st.end.is_some_and(|end| self.head > end) {
                drop(st);
                self.close().await;
                return;
            }
            match st.slots.remove(&self.head) {
                Some(Slot::Data(rx)) => {
                    self.current = Some(rx);
                    return;
                }
                Some(Slot::Failed(err)) => {
                    drop(st);
                    self.abort(err).await;
                    return;
                }
                None if st.closed => {
                    drop(st);
                    self.close().await;
                    return;
                }
                None => {}
            }
            drop(st);
            self.shared.notify.notified().await;
        }
    }

    async fn abort(&mut self, err: ChunkBufferError) {
        debug!("ordered stream aborted at part {}: {err}", self.head);
        self.failure = Some(Arc::new(err));
        self.current = None;
        self.pending = Bytes::new();
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        let mut st = self.shared.state.lock().await;
        st.done = true;
        st.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn drain(reader: &mut OrderedReader) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_drains_by_part_not_registration() {
        let (slots, mut reader) = ordered(4);
        let two = slots.add(2).await.unwrap();
        let one = slots.add(1).await.unwrap();
        let zero = slots.add(0).await.unwrap();

        two.send(Ok(Bytes::from_static(b"cc"))).await.unwrap();
        one.send(Ok(Bytes::from_static(b"bbbb"))).await.unwrap();
        zero.send(Ok(Bytes::from_static(b"a"))).await.unwrap();
        drop((zero, one, two));
        slots.finish(2).await;

        assert_eq!(drain(&mut reader).await.unwrap(), b"abbbbcc");
    }

    #[tokio::test]
    async fn test_waits_for_late_head() {
        let (slots, mut reader) = ordered(4);
        let one = slots.add(1).await.unwrap();
        one.send(Ok(Bytes::from_static(b"world"))).await.unwrap();
        drop(one);

        let producer = slots.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let zero = producer.add(0).await.unwrap();
            zero.send(Ok(Bytes::from_static(b"hello "))).await.unwrap();
            drop(zero);
            producer.finish(1).await;
        });

        assert_eq!(drain(&mut reader).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_error_slot_latches_after_earlier_data() {
        let (slots, mut reader) = ordered(4);
        let zero = slots.add(0).await.unwrap();
        zero.send(Ok(Bytes::from_static(b"ok"))).await.unwrap();
        drop(zero);
        slots
            .add_error(1, ChunkBufferError::not_found("buf", 1))
            .await;

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.is_not_found());
        // Never reported as a clean end afterwards.
        assert!(reader.read(&mut buf).await.is_err());
        assert!(slots.is_done().await);
        assert!(slots.add(2).await.is_none());
    }

    #[tokio::test]
    async fn test_error_past_end_is_ignored() {
        let (slots, mut reader) = ordered(4);
        let zero = slots.add(0).await.unwrap();
        zero.send(Ok(Bytes::from_static(b"data"))).await.unwrap();
        drop(zero);
        let _ = slots.add(1).await.unwrap();
        slots.finish(1).await;
        slots
            .add_error(3, ChunkBufferError::not_found("buf", 3))
            .await;

        assert_eq!(drain(&mut reader).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_close_ends_stream_without_more_slots() {
        let (slots, mut reader) = ordered(1);
        slots.close().await;
        assert_eq!(drain(&mut reader).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_terminal_failure() {
        let (slots, mut reader) = ordered(1);
        slots
            .fail(ChunkBufferError::InvalidConfig("boom".into()))
            .await;
        let err = reader.read(&mut [0u8; 4]).await.unwrap_err();
        assert!(matches!(err, ChunkBufferError::Stream { part: 0, .. }));
    }
}
