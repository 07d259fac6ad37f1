//! Buffered Log Reader
//!
//! Single-cursor, seekable, commit-aware iterator over persisted entries.
//!
//! ## Read Flow
//!
//! ```text
//! seek(position)
//!     ↓
//! Block index floor lookup ──▶ nearest block address (or first block)
//!     ↓
//! Batched backend read ──▶ whole frames into the grow-on-demand buffer
//!     ↓
//! Linear scan forward to the exact position
//!     ↓
//! has_next()/next() replay buffered entries, commit-gated
//! ```
//!
//! ## Buffering
//!
//! The reader owns a growable byte arena. It starts at the configured
//! initial capacity (a few KB) and doubles whenever the backend signals
//! `InsufficientCapacity`, up to a hard maximum; needing more than the
//! maximum is a configuration error surfaced immediately (a single entry is
//! never allowed to exceed it). Each backend read batches as many whole
//! frames as fit, so sequential consumption replays buffered entries without
//! touching the backend again.
//!
//! ## Commit Gating
//!
//! In the default committed mode, an entry becomes visible only once its
//! position is at or below the commit watermark; `has_next()` flips to true
//! when the watermark advances past a buffered entry, without re-wrapping.
//! Uncommitted mode skips the gate entirely (for local, non-replicated
//! logs). End-of-data is signalled by `has_next() == false`; errors are
//! reserved for protocol misuse.

use std::sync::Arc;

use loghouse_core::frame::{self, FrameType};
use loghouse_core::{CommitPosition, LogEntry};

use crate::block_index::LogBlockIndex;
use crate::error::{Error, Result};
use crate::storage::{LogStorage, ReadOutcome};

/// Visibility mode of a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Entries are visible only up to the commit watermark.
    Committed,
    /// All persisted entries are visible (local/non-replicated contexts).
    Uncommitted,
}

/// Everything a reader needs to bind to one log.
#[derive(Clone)]
pub struct ReaderSource {
    pub storage: Arc<dyn LogStorage>,
    pub index: Arc<LogBlockIndex>,
    pub commit: CommitPosition,
}

struct Pending {
    entry: LogEntry,
    framed_length: usize,
}

/// Stateful iterator over one partition log.
pub struct LogReader {
    mode: ReadMode,
    max_capacity: usize,

    source: Option<ReaderSource>,

    buffer: Vec<u8>,
    /// Valid bytes in the buffer
    buffer_length: usize,
    /// Consume offset within the buffer
    read_offset: usize,
    /// Where the next backend read resumes
    next_read_address: u64,

    /// Decoded-but-not-returned next entry
    pending: Option<Pending>,
    /// Entry most recently returned by `next()`
    current: Option<LogEntry>,
}

impl LogReader {
    pub fn new(mode: ReadMode, initial_capacity: usize, max_capacity: usize) -> Self {
        Self {
            mode,
            max_capacity,
            source: None,
            buffer: vec![0u8; initial_capacity.max(frame::FRAME_HEADER_LENGTH)],
            buffer_length: 0,
            read_offset: 0,
            next_read_address: 0,
            pending: None,
            current: None,
        }
    }

    /// Bind the reader and position it before the first entry.
    pub fn wrap(&mut self, source: ReaderSource) -> Result<()> {
        self.source = Some(source);
        self.seek_to_first_event()
    }

    /// Bind the reader and seek to `position`; see [`LogReader::seek`].
    pub fn wrap_at(&mut self, source: ReaderSource, position: i64) -> Result<bool> {
        self.source = Some(source);
        self.seek(position)
    }

    /// True when an entry exists at the cursor and is visible.
    pub fn has_next(&mut self) -> Result<bool> {
        let source = self.bound_source()?;
        self.fetch_pending(&source)?;
        match &self.pending {
            None => Ok(false),
            Some(p) => Ok(self.is_visible(&source, p.entry.position)),
        }
    }

    /// Return the entry at the cursor and advance past it.
    ///
    /// Errors with [`Error::NoNextEntry`] unless a preceding `has_next()`
    /// would have returned true.
    pub fn next(&mut self) -> Result<LogEntry> {
        let source = self.bound_source()?;
        self.fetch_pending(&source)?;

        let visible = self
            .pending
            .as_ref()
            .map(|p| self.is_visible(&source, p.entry.position))
            .unwrap_or(false);
        if !visible {
            return Err(Error::NoNextEntry);
        }

        let pending = self.pending.take().expect("visibility implies pending");
        self.read_offset += pending.framed_length;
        self.current = Some(pending.entry.clone());
        Ok(pending.entry)
    }

    /// Seek to `position`.
    ///
    /// Resolves the nearest block at or below the position through the index
    /// (or the backend's first address), then scans forward. Returns true
    /// iff an entry with exactly that position exists and is visible;
    /// otherwise the cursor rests on the next higher entry (or at the end).
    pub fn seek(&mut self, position: i64) -> Result<bool> {
        let source = self.bound_source()?;

        let start = source
            .index
            .lookup_block_address(position)
            .or_else(|| source.storage.first_block_address());
        let Some(start) = start else {
            return Ok(false);
        };

        self.rewind_to(start);
        loop {
            self.fetch_pending(&source)?;
            match &self.pending {
                None => return Ok(false),
                Some(p) if p.entry.position < position => {
                    let framed = p.framed_length;
                    self.pending = None;
                    self.read_offset += framed;
                }
                Some(p) => {
                    return Ok(p.entry.position == position
                        && self.is_visible(&source, p.entry.position));
                }
            }
        }
    }

    /// Position the cursor before the lowest entry.
    pub fn seek_to_first_event(&mut self) -> Result<()> {
        let source = self.bound_source()?;
        if let Some(first) = source.storage.first_block_address() {
            self.rewind_to(first);
        }
        Ok(())
    }

    /// Position the reader on the last visible entry (bounded by the commit
    /// watermark in committed mode). After this, `position()` reports the
    /// last visible entry and `has_next()` is false until more entries
    /// become visible.
    pub fn seek_to_last_event(&mut self) -> Result<()> {
        let source = self.bound_source()?;

        let target = match self.mode {
            ReadMode::Committed => source.commit.get(),
            ReadMode::Uncommitted => i64::MAX,
        };
        if target < 0 {
            // Nothing is visible yet
            return self.seek_to_first_event();
        }

        let start = source
            .index
            .lookup_block_address(target)
            .or_else(|| source.storage.first_block_address());
        let Some(start) = start else {
            return Ok(());
        };

        self.rewind_to(start);
        let mut last = None;
        loop {
            self.fetch_pending(&source)?;
            match &self.pending {
                Some(p)
                    if p.entry.position <= target
                        && self.is_visible(&source, p.entry.position) =>
                {
                    let framed = p.framed_length;
                    last = self.pending.take().map(|p| p.entry);
                    self.read_offset += framed;
                }
                _ => break,
            }
        }
        self.current = last;
        Ok(())
    }

    /// Position of the entry most recently returned by `next()` (or settled
    /// on by `seek_to_last_event()`).
    ///
    /// Errors when the reader is unbound, has no current entry, or the
    /// current entry is not committed.
    pub fn position(&self) -> Result<i64> {
        let source = self.source.as_ref().ok_or(Error::NotInitialized)?;
        let current = self.current.as_ref().ok_or(Error::NoCurrentEntry)?;

        let commit_position = source.commit.get();
        if current.position > commit_position {
            return Err(Error::Uncommitted {
                position: current.position,
                commit_position,
            });
        }
        Ok(current.position)
    }

    fn bound_source(&self) -> Result<ReaderSource> {
        self.source.clone().ok_or(Error::NotInitialized)
    }

    fn is_visible(&self, source: &ReaderSource, position: i64) -> bool {
        match self.mode {
            ReadMode::Uncommitted => true,
            ReadMode::Committed => position <= source.commit.get(),
        }
    }

    fn rewind_to(&mut self, address: u64) {
        self.next_read_address = address;
        self.buffer_length = 0;
        self.read_offset = 0;
        self.pending = None;
        self.current = None;
    }

    /// Make `pending` hold the next entry at the cursor, if one exists.
    ///
    /// Replays the buffer first and only then issues another backend read,
    /// growing the buffer on `InsufficientCapacity` up to the hard cap.
    fn fetch_pending(&mut self, source: &ReaderSource) -> Result<()> {
        if self.pending.is_some() {
            return Ok(());
        }

        loop {
            // Replay buffered frames
            while self.read_offset < self.buffer_length {
                let window = &self.buffer[self.read_offset..self.buffer_length];
                let Some(f) = frame::decode_frame(window)? else {
                    // The backend only hands out whole frames
                    return Err(loghouse_core::Error::CorruptFrame(
                        "partial frame in read buffer".to_string(),
                    )
                    .into());
                };
                if f.frame_type == FrameType::Padding {
                    self.read_offset += f.framed_length;
                    continue;
                }
                let entry = frame::decode_entry(f.payload)?;
                self.pending = Some(Pending {
                    entry,
                    framed_length: f.framed_length,
                });
                return Ok(());
            }

            // Buffer exhausted: fetch the next batch
            match source
                .storage
                .read_into(&mut self.buffer, self.next_read_address)?
            {
                ReadOutcome::Advanced {
                    next_address,
                    length,
                } => {
                    self.buffer_length = length;
                    self.read_offset = 0;
                    self.next_read_address = next_address;
                }
                ReadOutcome::NoData | ReadOutcome::Deferred => return Ok(()),
                ReadOutcome::InsufficientCapacity => self.grow()?,
            }
        }
    }

    fn grow(&mut self) -> Result<()> {
        if self.buffer.len() >= self.max_capacity {
            return Err(Error::BufferCapacityExceeded {
                required: self.buffer.len() * 2,
                max: self.max_capacity,
            });
        }
        let new_len = (self.buffer.len() * 2).min(self.max_capacity);
        self.buffer.resize(new_len, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsLogStorage;
    use bytes::{Bytes, BytesMut};
    use loghouse_core::entry::{NO_PRODUCER_ID, NO_SOURCE_PARTITION};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        storage: Arc<FsLogStorage>,
        index: Arc<LogBlockIndex>,
        commit: CommitPosition,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let storage = Arc::new(FsLogStorage::open(dir.path(), "orders", 1024 * 1024).unwrap());
            Self {
                _dir: dir,
                storage,
                index: Arc::new(LogBlockIndex::new(64)),
                commit: CommitPosition::new(),
            }
        }

        fn source(&self) -> ReaderSource {
            ReaderSource {
                storage: self.storage.clone(),
                index: self.index.clone(),
                commit: self.commit.clone(),
            }
        }

        fn append(&self, entries: &[LogEntry]) -> u64 {
            let mut buf = BytesMut::new();
            for e in entries {
                frame::encode_entry(&mut buf, e);
            }
            self.storage.append(&buf).unwrap()
        }
    }

    fn entry(position: i64, key: i64, value: &[u8]) -> LogEntry {
        LogEntry {
            position,
            raft_term: 1,
            producer_id: NO_PRODUCER_ID,
            source_event_partition_id: NO_SOURCE_PARTITION,
            source_event_position: -1,
            key,
            source_log_name: None,
            metadata: None,
            value: Bytes::copy_from_slice(value),
        }
    }

    fn reader(mode: ReadMode) -> LogReader {
        LogReader::new(mode, 4 * 1024, 64 * 1024)
    }

    #[test]
    fn test_append_read_roundtrip_scenario() {
        let fixture = Fixture::new();
        fixture.append(&[entry(1, 2, b"event")]);
        fixture.commit.advance(1);

        let mut reader = reader(ReadMode::Committed);
        reader.wrap(fixture.source()).unwrap();

        assert!(reader.has_next().unwrap());
        let e = reader.next().unwrap();
        assert_eq!(e.position, 1);
        assert_eq!(e.key, 2);
        assert_eq!(e.value, Bytes::from_static(b"event"));
        assert!(e.metadata.is_none());

        assert!(!reader.has_next().unwrap());
        assert_eq!(reader.position().unwrap(), 1);
    }

    #[test]
    fn test_unwrapped_reader_errors() {
        let mut r = reader(ReadMode::Committed);
        assert!(matches!(r.has_next(), Err(Error::NotInitialized)));
        assert!(matches!(r.next(), Err(Error::NotInitialized)));
        assert!(matches!(r.seek(1), Err(Error::NotInitialized)));
        assert!(matches!(r.position(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_next_without_has_next_errors_at_end() {
        let fixture = Fixture::new();
        let mut r = reader(ReadMode::Committed);
        r.wrap(fixture.source()).unwrap();
        assert!(matches!(r.next(), Err(Error::NoNextEntry)));
    }

    #[test]
    fn test_position_before_first_next_errors() {
        let fixture = Fixture::new();
        fixture.append(&[entry(1, 1, b"v")]);
        fixture.commit.advance(1);

        let mut r = reader(ReadMode::Committed);
        r.wrap(fixture.source()).unwrap();
        assert!(matches!(r.position(), Err(Error::NoCurrentEntry)));
    }

    #[test]
    fn test_commit_gating_without_rewrap() {
        let fixture = Fixture::new();
        fixture.append(&[entry(1, 1, b"a"), entry(2, 2, b"b")]);
        fixture.commit.advance(1);

        let mut r = reader(ReadMode::Committed);
        r.wrap(fixture.source()).unwrap();

        assert!(r.has_next().unwrap());
        assert_eq!(r.next().unwrap().position, 1);

        // The second entry is persisted but not committed
        assert!(!r.has_next().unwrap());

        // Advancing the watermark makes it visible without re-wrapping
        fixture.commit.advance(2);
        assert!(r.has_next().unwrap());
        assert_eq!(r.next().unwrap().position, 2);
    }

    #[test]
    fn test_uncommitted_mode_skips_the_gate() {
        let fixture = Fixture::new();
        fixture.append(&[entry(1, 1, b"a"), entry(2, 2, b"b")]);
        // Nothing committed at all

        let mut r = reader(ReadMode::Uncommitted);
        r.wrap(fixture.source()).unwrap();

        assert!(r.has_next().unwrap());
        assert_eq!(r.next().unwrap().position, 1);
        assert_eq!(r.next().unwrap().position, 2);
        assert!(!r.has_next().unwrap());

        // position() still applies the commit check
        assert!(matches!(r.position(), Err(Error::Uncommitted { .. })));
    }

    #[test]
    fn test_seek_exact_hit() {
        let fixture = Fixture::new();
        fixture.append(&[
            entry(1, 1, b"a"),
            entry(2, 2, b"b"),
            entry(3, 3, b"c"),
        ]);
        fixture.commit.advance(3);

        let mut r = reader(ReadMode::Committed);
        assert!(r.wrap_at(fixture.source(), 2).unwrap());
        assert_eq!(r.next().unwrap().position, 2);
    }

    #[test]
    fn test_seek_miss_advances_to_next_higher() {
        let fixture = Fixture::new();
        // A gap: positions 1, 2, 5, 6
        fixture.append(&[
            entry(1, 1, b"a"),
            entry(2, 2, b"b"),
            entry(5, 5, b"e"),
            entry(6, 6, b"f"),
        ]);
        fixture.commit.advance(6);

        let mut r = reader(ReadMode::Committed);
        let found = r.wrap_at(fixture.source(), 3).unwrap();
        assert!(!found);
        // Cursor rests on the next existing greater position
        assert_eq!(r.next().unwrap().position, 5);
    }

    #[test]
    fn test_seek_past_end() {
        let fixture = Fixture::new();
        fixture.append(&[entry(1, 1, b"a")]);
        fixture.commit.advance(1);

        let mut r = reader(ReadMode::Committed);
        assert!(!r.wrap_at(fixture.source(), 99).unwrap());
        assert!(!r.has_next().unwrap());
    }

    #[test]
    fn test_seek_uses_block_index() {
        let fixture = Fixture::new();
        let addr = fixture.append(&[entry(10, 10, b"x"), entry(11, 11, b"y")]);
        let addr2 = fixture.append(&[entry(20, 20, b"z")]);
        fixture.commit.advance(20);
        fixture.index.add_block(10, addr).unwrap();
        fixture.index.add_block(20, addr2).unwrap();

        let mut r = reader(ReadMode::Committed);
        assert!(r.wrap_at(fixture.source(), 20).unwrap());
        assert_eq!(r.next().unwrap().position, 20);

        // Floor lookup between indexed blocks
        assert!(r.seek(11).unwrap());
        assert_eq!(r.next().unwrap().position, 11);
    }

    #[test]
    fn test_seek_to_first_and_last_event() {
        let fixture = Fixture::new();
        fixture.append(&[
            entry(1, 1, b"a"),
            entry(2, 2, b"b"),
            entry(3, 3, b"c"),
        ]);
        fixture.commit.advance(2);

        let mut r = reader(ReadMode::Committed);
        r.wrap(fixture.source()).unwrap();

        r.seek_to_last_event().unwrap();
        // Bounded by commit visibility
        assert_eq!(r.position().unwrap(), 2);
        assert!(!r.has_next().unwrap());

        r.seek_to_first_event().unwrap();
        assert_eq!(r.next().unwrap().position, 1);
    }

    #[test]
    fn test_buffer_grows_to_fit_large_entries() {
        let fixture = Fixture::new();
        // Larger than the 4KB initial buffer
        let big = vec![0x5A; 16 * 1024];
        fixture.append(&[entry(1, 1, &big)]);
        fixture.commit.advance(1);

        let mut r = reader(ReadMode::Committed);
        r.wrap(fixture.source()).unwrap();
        assert!(r.has_next().unwrap());
        assert_eq!(r.next().unwrap().value.len(), big.len());
    }

    #[test]
    fn test_buffer_growth_is_bounded() {
        let fixture = Fixture::new();
        let big = vec![0x5A; 16 * 1024];
        fixture.append(&[entry(1, 1, &big)]);
        fixture.commit.advance(1);

        // Hard cap below the entry size: fatal configuration error
        let mut r = LogReader::new(ReadMode::Committed, 1024, 8 * 1024);
        let result = r.wrap(fixture.source()).and_then(|_| r.has_next());
        assert!(matches!(
            result,
            Err(Error::BufferCapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_reader_replays_across_segment_roll() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FsLogStorage::open(dir.path(), "orders", 256).unwrap());
        let fixture = Fixture {
            _dir: dir,
            storage,
            index: Arc::new(LogBlockIndex::new(64)),
            commit: CommitPosition::new(),
        };

        for i in 1..=6 {
            fixture.append(&[entry(i, i, &[i as u8; 64])]);
        }
        fixture.commit.advance(6);
        assert!(fixture.storage.segment_count() > 1);

        let mut r = reader(ReadMode::Committed);
        r.wrap(fixture.source()).unwrap();
        let mut positions = Vec::new();
        while r.has_next().unwrap() {
            positions.push(r.next().unwrap().position);
        }
        // Padding frames at segment tails are invisible
        assert_eq!(positions, vec![1, 2, 3, 4, 5, 6]);
    }
}
