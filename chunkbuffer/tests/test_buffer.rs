mod common;

use chunkbuffer::{ChunkBuffer, ChunkBufferError, ChunkRead, MemoryPile, Pile};
use common::{FailingPile, ReversedPile, config, pattern, read_back, write_all};
use std::sync::Arc;
use std::time::Duration;

const CS: u64 = 256;

async fn round_trip(len: usize, step: usize) {
    let pile = MemoryPile::new();
    let name = format!("rt-{len}-{step}");
    let data = pattern(len);

    let mut buf = ChunkBuffer::with_config(name.as_str(), Arc::new(pile.clone()), config(CS))
        .unwrap();
    write_all(&mut buf, &data, step).await;
    buf.close().await.unwrap();
    assert_eq!(buf.bytes_written(), len as u64);

    // Every chunk but the tail is full, followed by one empty sentinel.
    let lens = pile.chunk_lens(&name).await;
    let data_chunks = (len as u64).div_ceil(CS);
    assert_eq!(lens.len() as u64, data_chunks + 1, "chunks for {len} bytes");
    for (part, chunk_len) in &lens[..lens.len() - 1] {
        let expected = (len as u64 - part * CS).min(CS);
        assert_eq!(*chunk_len as u64, expected, "chunk {part} of {len} bytes");
    }
    assert_eq!(lens.last(), Some(&(data_chunks, 0)));

    let out = read_back(Arc::new(pile), &name, CS).await.unwrap();
    assert_eq!(out, data, "{len} bytes in writes of {step}");
}

#[tokio::test]
async fn test_round_trip_single_write() {
    for len in [0, CS as usize, CS as usize + 1, 5 * CS as usize] {
        round_trip(len, len).await;
    }
}

#[tokio::test]
async fn test_round_trip_small_writes() {
    for len in [CS as usize, CS as usize + 1, 5 * CS as usize, 1000] {
        round_trip(len, 37).await;
        round_trip(len, 1).await;
    }
}

#[tokio::test]
async fn test_uneven_writes_scenario() {
    let pile = MemoryPile::new();
    let data = pattern(2600);
    let mut buf = ChunkBuffer::with_config("scenario", Arc::new(pile.clone()), config(1024))
        .unwrap();
    buf.write(&data[..1000]).await.unwrap();
    buf.write(&data[1000..2000]).await.unwrap();
    buf.write(&data[2000..]).await.unwrap();
    buf.close().await.unwrap();

    assert_eq!(
        pile.chunk_lens("scenario").await,
        vec![(0, 1024), (1, 1024), (2, 552), (3, 0)]
    );
    for part in 0..3 {
        let mut chunk = pile.chunk_reader("scenario", part).await.unwrap();
        assert!(!chunk.last().await.unwrap());
    }
    let mut sentinel = pile.chunk_reader("scenario", 3).await.unwrap();
    assert!(sentinel.last().await.unwrap());

    let out = read_back(Arc::new(pile), "scenario", 1024).await.unwrap();
    assert_eq!(out, data);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let pile = MemoryPile::new();
    let mut buf = ChunkBuffer::with_config("twice", Arc::new(pile.clone()), config(CS)).unwrap();
    buf.write(&pattern(300)).await.unwrap();
    buf.close().await.unwrap();
    let after_first = pile.chunk_lens("twice").await;
    buf.close().await.unwrap();
    assert_eq!(pile.chunk_lens("twice").await, after_first);
    assert!(matches!(
        buf.write(b"x").await,
        Err(ChunkBufferError::WriterClosed)
    ));
}

#[tokio::test]
async fn test_ordered_under_reversed_completion() {
    let memory = MemoryPile::new();
    let data = pattern(10 * CS as usize + 17);
    let mut buf = ChunkBuffer::with_config("skew", Arc::new(memory.clone()), config(CS)).unwrap();
    buf.write(&data).await.unwrap();
    buf.close().await.unwrap();

    let pile = ReversedPile {
        inner: memory,
        parts: 12,
        tick: Duration::from_millis(5),
    };
    let out = read_back(Arc::new(pile), "skew", CS).await.unwrap();
    assert_eq!(out, data);
}

#[tokio::test]
async fn test_unwritten_buffer_is_not_found() {
    let pile: Arc<dyn Pile> = Arc::new(MemoryPile::new());
    let err = read_back(pile, "never", CS).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_flush_failure_poisons_writer() {
    let pile = FailingPile {
        inner: MemoryPile::new(),
        fail_part: 1,
    };
    let mut buf = ChunkBuffer::with_config("poison", Arc::new(pile), config(16)).unwrap();
    assert!(buf.write(&pattern(8)).await.is_ok());

    let err = buf.write(&pattern(32)).await.unwrap_err();
    assert!(matches!(err, ChunkBufferError::BackendIo { part: 1, .. }));
    assert!(matches!(
        buf.write(b"more").await,
        Err(ChunkBufferError::Poisoned)
    ));
    assert!(matches!(buf.close().await, Err(ChunkBufferError::Poisoned)));
}

#[tokio::test]
async fn test_split_halves_across_tasks() {
    let pile = MemoryPile::new();
    let data = pattern(3 * CS as usize + 5);

    let buf = ChunkBuffer::with_config("split", Arc::new(pile.clone()), config(CS)).unwrap();
    let (mut writer, mut reader) = buf.split();
    let payload = data.clone();
    tokio::spawn(async move {
        writer.write(&payload).await?;
        writer.close().await
    })
    .await
    .unwrap()
    .unwrap();

    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, data);
    assert_eq!(reader.bytes_read(), data.len() as u64);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let pile: Arc<dyn Pile> = Arc::new(MemoryPile::new());
    let res = ChunkBuffer::with_config("bad", pile, config(0));
    assert!(matches!(res, Err(ChunkBufferError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_dropped_writer_reads_as_missing() {
    let pile = MemoryPile::new();
    let mut buf = ChunkBuffer::with_config("dropped", Arc::new(pile.clone()), config(16)).unwrap();
    buf.write(&pattern(20)).await.unwrap();
    drop(buf);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(pile.chunk_lens("dropped").await, vec![(0, 16)]);
    let err = read_back(Arc::new(pile), "dropped", 16).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_read_during_open_tail_is_not_short() {
    let pile = MemoryPile::new();
    let data = pattern(20);
    let mut buf = ChunkBuffer::with_config("open", Arc::new(pile.clone()), config(16)).unwrap();
    buf.write(&data).await.unwrap();

    // The tail chunk is still being filled: the stream is incomplete.
    let err = read_back(Arc::new(pile.clone()), "open", 16).await.unwrap_err();
    assert!(err.is_not_found());

    buf.close().await.unwrap();
    let out = read_back(Arc::new(pile), "open", 16).await.unwrap();
    assert_eq!(out, data);
}
