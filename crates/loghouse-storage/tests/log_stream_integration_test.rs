//! End-to-end tests for the assembled log stream: writers feeding the
//! appender task, the index controller scanning in the background, and
//! commit-gated readers over the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use loghouse_storage::{LogConfig, LogStream, ReadMode};
use tempfile::TempDir;

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn test_config(dir: &TempDir) -> LogConfig {
    let mut config = LogConfig::new("orders-0", dir.path());
    config.controller_retry_interval_ms = 5;
    config.snapshot_interval_ms = 0;
    config
}

/// Write one entry through the writer and wait for the appender to persist it.
async fn write_and_await(stream: &LogStream, key: i64, value: &'static [u8]) -> i64 {
    let mut writer = stream.new_writer();
    writer.key(key).value(Bytes::from_static(value));
    let position = writer
        .try_write()
        .expect("write accepted")
        .expect("buffer has capacity");
    wait_until("appender to persist", || {
        stream.current_appender_position() >= position
    })
    .await;
    position
}

#[tokio::test]
async fn test_open_write_commit_read_roundtrip() {
    let dir = TempDir::new().unwrap();
    let mut stream = LogStream::open(test_config(&dir)).await.unwrap();

    let position = write_and_await(&stream, 2, b"event").await;
    assert_eq!(position, 1);

    // Not visible until the replication layer commits it
    let mut reader = stream.new_reader(ReadMode::Committed).unwrap();
    assert!(!reader.has_next().unwrap());

    stream.advance_commit_position(position);
    assert!(reader.has_next().unwrap());
    let entry = reader.next().unwrap();
    assert_eq!(entry.position, 1);
    assert_eq!(entry.key, 2);
    assert_eq!(entry.value, Bytes::from_static(b"event"));
    assert!(!reader.has_next().unwrap());

    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_batch_write_is_atomic_and_ordered() {
    let dir = TempDir::new().unwrap();
    let mut stream = LogStream::open(test_config(&dir)).await.unwrap();

    let mut batch = stream.new_batch_writer();
    batch.producer_id(7).source_event(3, 100);
    batch.entry().key(10).value(Bytes::from_static(b"a")).done().unwrap();
    batch.entry().key(11).value(Bytes::from_static(b"b")).done().unwrap();
    batch
        .entry()
        .key_from_position()
        .value(Bytes::from_static(b"c"))
        .done()
        .unwrap();
    let last = batch.try_write().unwrap().unwrap();
    assert_eq!(last, 3);

    wait_until("appender to persist", || {
        stream.current_appender_position() >= last
    })
    .await;
    stream.advance_commit_position(last);

    let mut reader = stream.new_reader(ReadMode::Committed).unwrap();
    let mut entries = Vec::new();
    while reader.has_next().unwrap() {
        entries.push(reader.next().unwrap());
    }
    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries.iter().map(|e| e.position).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(entries[2].key, 3);
    for e in &entries {
        assert_eq!(e.producer_id, 7);
        assert_eq!(e.source_event_partition_id, 3);
        assert_eq!(e.source_event_position, 100);
    }

    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_truncate_commit_conflict() {
    let dir = TempDir::new().unwrap();
    let mut stream = LogStream::open(test_config(&dir)).await.unwrap();

    for (key, value) in [(1, b"a" as &'static [u8]), (2, b"b"), (3, b"c")] {
        write_and_await(&stream, key, value).await;
    }
    stream.advance_commit_position(2);

    // Truncating at or below the commit watermark is rejected
    assert!(stream.truncate(2).await.is_err());

    // Above the watermark it succeeds and the tail disappears
    stream.truncate(3).await.unwrap();

    let mut reader = stream.new_reader(ReadMode::Uncommitted).unwrap();
    let mut positions = Vec::new();
    while reader.has_next().unwrap() {
        positions.push(reader.next().unwrap().position);
    }
    assert_eq!(positions, vec![1, 2]);

    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_delete_respects_export_watermark() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    // Tiny segments: entry 1 fills a segment alone, entries 2 and 3 share
    // the next one, entry 4 starts a third
    config.segment_size = 256;
    config.index_block_size = 200;
    config.max_frame_length = 200;
    config.max_append_block_size = 240;
    let mut stream = LogStream::open(config).await.unwrap();

    let big = vec![0x11u8; 150];
    let small = vec![0x22u8; 8];
    for (key, value) in [(1i64, &big), (2, &small), (3, &small), (4, &big)] {
        let mut writer = stream.new_writer();
        writer.key(key).value(Bytes::from(value.clone()));
        let position = writer.try_write().unwrap().unwrap();
        wait_until("appender to persist", || {
            stream.current_appender_position() >= position
        })
        .await;
    }
    stream.advance_commit_position(4);

    // Exporters have durably exported up to entry 3
    stream.set_exported_position_supplier(Arc::new(|| 3i64));

    // Wait for the controller to index past entry 2 so a safe deletion
    // boundary exists, then delete: only entry 1's segment is removable
    wait_until("segment of entry 1 deleted", || {
        stream.delete(4).unwrap() > 0
    })
    .await;

    let mut reader = stream.new_reader(ReadMode::Committed).unwrap();
    let mut positions = Vec::new();
    while reader.has_next().unwrap() {
        positions.push(reader.next().unwrap().position);
    }
    assert_eq!(positions, vec![2, 3, 4]);

    // A second delete has nothing more to remove
    assert_eq!(stream.delete(4).unwrap(), 0);

    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_delete_without_supplier_is_noop() {
    let dir = TempDir::new().unwrap();
    let mut stream = LogStream::open(test_config(&dir)).await.unwrap();

    let position = write_and_await(&stream, 1, b"kept").await;
    stream.advance_commit_position(position);

    assert_eq!(stream.delete(position).unwrap(), 0);
    assert_eq!(stream.delete(-1).unwrap(), 0);

    let mut reader = stream.new_reader(ReadMode::Committed).unwrap();
    assert!(reader.has_next().unwrap());

    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_reopen_recovers_index_from_snapshot() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    // One 64-byte frame per index block so every entry is indexed
    config.index_block_size = 64;
    config.max_frame_length = 64;

    let last = {
        let mut stream = LogStream::open(config.clone()).await.unwrap();
        let mut last = 0;
        for key in 1..=4i64 {
            let mut writer = stream.new_writer();
            // 16-byte values make each frame exactly 64 bytes
            writer.key(key).value(Bytes::from(vec![0x33u8; 16]));
            last = writer.try_write().unwrap().unwrap();
            wait_until("appender to persist", || {
                stream.current_appender_position() >= last
            })
            .await;
        }
        stream.advance_commit_position(last);
        let index = stream.block_index();
        wait_until("controller to index all blocks", || index.size() >= 4).await;
        stream.close().await.unwrap();
        last
    };

    // A fresh stream over the same directory seeds its index from the
    // snapshot written on close and serves reads immediately
    let mut stream = LogStream::open(config).await.unwrap();
    assert!(stream.block_index().size() >= 4);
    stream.advance_commit_position(last);

    let mut reader = stream.new_reader(ReadMode::Committed).unwrap();
    let mut positions = Vec::new();
    while reader.has_next().unwrap() {
        positions.push(reader.next().unwrap().position);
    }
    assert_eq!(positions, vec![1, 2, 3, 4]);

    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut stream = LogStream::open(test_config(&dir)).await.unwrap();
    stream.close().await.unwrap();
    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_delete_on_close_removes_state() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.delete_on_close = true;
    let mut stream = LogStream::open(config).await.unwrap();

    let position = write_and_await(&stream, 1, b"ephemeral").await;
    stream.advance_commit_position(position);
    stream.close().await.unwrap();

    assert!(!dir.path().join("orders-0").exists());
}

#[tokio::test]
async fn test_seek_against_live_stream() {
    let dir = TempDir::new().unwrap();
    let mut stream = LogStream::open(test_config(&dir)).await.unwrap();

    for key in 1..=5i64 {
        write_and_await(&stream, key, b"payload").await;
    }
    stream.advance_commit_position(5);

    let mut reader = stream.new_reader(ReadMode::Committed).unwrap();
    assert!(reader.seek(3).unwrap());
    assert_eq!(reader.next().unwrap().position, 3);

    reader.seek_to_last_event().unwrap();
    assert_eq!(reader.position().unwrap(), 5);
    assert!(!reader.has_next().unwrap());

    reader.seek_to_first_event().unwrap();
    assert_eq!(reader.next().unwrap().position, 1);

    stream.close().await.unwrap();
}
