//! Filesystem Log Storage
//!
//! Segment-file implementation of the [`LogStorage`] contract.
//!
//! ## On-Disk Layout
//!
//! One directory per log under the configured root, holding fixed-size
//! segment files:
//!
//! ```text
//! <root>/<log-name>/
//!   segment-00000000.data
//!   segment-00000001.data
//!   ...
//! ```
//!
//! Each segment starts with a 16-byte header:
//!
//! ```text
//! ┌───────────┬──────────┬──────────┬─────────────┬──────────┐
//! │ Magic     │ Version  │ Reserved │ Segment id  │ Reserved │
//! │ "LHSG"    │ (2 bytes)│ (2 bytes)│ (4 bytes)   │ (4 bytes)│
//! └───────────┴──────────┴──────────┴─────────────┴──────────┘
//! ```
//!
//! followed by frames back to back. When an append batch does not fit in the
//! remaining space of the head segment, the remainder is filled with one
//! padding frame and a new segment is started; frames therefore never cross
//! a segment boundary.
//!
//! ## Concurrency
//!
//! Appends and structural mutations (roll, truncate, delete) are serialized
//! by a single lock. Reads go through positional `read_at` on shared file
//! handles and never contend with the appender: each segment publishes its
//! valid byte count through an atomic `limit` that is only advanced after
//! the written frames are synced to disk.
//!
//! ## Crash Recovery
//!
//! On open, every segment's frame chain is walked header by header; the
//! first torn or garbage frame marks the end of valid data and the file is
//! clipped there. Committed data is never clipped because the limit only
//! ever covers synced whole frames.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::{BufMut, BytesMut};
use loghouse_core::frame::{self, FrameType};
use tracing::{debug, info, warn};

use super::{
    address, complete_frames_length, segment_id, segment_offset, LogStorage, Processed,
    ReadOutcome, ReadProcessor,
};
use crate::error::{Error, Result};

/// Magic bytes for segment files: "LHSG"
const SEGMENT_MAGIC: [u8; 4] = [0x4C, 0x48, 0x53, 0x47];

/// Version number for the segment format
const SEGMENT_VERSION: u16 = 1;

/// Segment header size (16 bytes)
pub const SEGMENT_HEADER_LENGTH: usize = 16;

/// One open segment file.
struct Segment {
    id: u32,
    path: PathBuf,
    file: File,

    /// Bytes of valid data in the file, advanced only after a sync. Readers
    /// never look past this.
    limit: AtomicU32,
}

impl Segment {
    fn limit(&self) -> u32 {
        self.limit.load(Ordering::Acquire)
    }
}

struct Segments {
    /// Ordered by id; front is the oldest, back is the head segment.
    list: VecDeque<Arc<Segment>>,
}

impl Segments {
    fn find(&self, id: u32) -> Option<&Arc<Segment>> {
        let front_id = self.list.front()?.id;
        if id < front_id {
            return None;
        }
        self.list.get((id - front_id) as usize)
    }

    fn head(&self) -> &Arc<Segment> {
        // The list is never empty after open()
        self.list.back().expect("segment list is never empty")
    }
}

/// Append-only storage over fixed-size segment files.
pub struct FsLogStorage {
    name: String,
    directory: PathBuf,
    segment_size: usize,

    segments: RwLock<Segments>,

    /// Serializes appends, rolls, truncates and deletes.
    append_lock: Mutex<()>,
}

impl FsLogStorage {
    /// Open (or create) the storage directory for `name` under `root`.
    pub fn open(root: impl AsRef<Path>, name: &str, segment_size: usize) -> Result<Self> {
        if segment_size <= SEGMENT_HEADER_LENGTH + frame::FRAME_HEADER_LENGTH {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("segment size {} too small", segment_size),
            )));
        }

        let directory = root.as_ref().join(name);
        std::fs::create_dir_all(&directory)?;

        let mut found: Vec<(u32, PathBuf)> = Vec::new();
        for dir_entry in std::fs::read_dir(&directory)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(id) = parse_segment_file_name(&file_name) {
                found.push((id, dir_entry.path()));
            }
        }
        found.sort_by_key(|(id, _)| *id);

        let mut list = VecDeque::with_capacity(found.len().max(1));
        let mut expected_id = found.first().map(|(id, _)| *id);
        for (id, path) in found {
            if expected_id != Some(id) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("segment id gap before segment {}", id),
                )));
            }
            expected_id = Some(id + 1);

            let segment = open_segment(&path, id, segment_size)?;
            list.push_back(Arc::new(segment));
        }

        let storage = Self {
            name: name.to_string(),
            directory,
            segment_size,
            segments: RwLock::new(Segments { list }),
            append_lock: Mutex::new(()),
        };

        if storage.segments.read().unwrap().list.is_empty() {
            let segment = storage.create_segment(0)?;
            storage
                .segments
                .write()
                .unwrap()
                .list
                .push_back(Arc::new(segment));
        }

        {
            let segments = storage.segments.read().unwrap();
            info!(
                log = %storage.name,
                segments = segments.list.len(),
                first = segments.list.front().map(|s| s.id).unwrap_or(0),
                "log storage opened"
            );
        }

        Ok(storage)
    }

    /// Usable bytes per segment (after the header).
    pub fn data_capacity(&self) -> usize {
        self.segment_size - SEGMENT_HEADER_LENGTH
    }

    /// Number of segment files currently on disk.
    pub fn segment_count(&self) -> usize {
        self.segments.read().unwrap().list.len()
    }

    /// Directory holding this log's segment files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn create_segment(&self, id: u32) -> Result<Segment> {
        let path = self.directory.join(segment_file_name(id));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = BytesMut::with_capacity(SEGMENT_HEADER_LENGTH);
        header.put_slice(&SEGMENT_MAGIC);
        header.put_u16(SEGMENT_VERSION);
        header.put_u16(0);
        header.put_u32(id);
        header.put_u32(0);
        file.write_all_at(&header, 0)?;
        file.sync_data()?;

        debug!(log = %self.name, segment = id, path = ?path, "segment created");

        Ok(Segment {
            id,
            path,
            file,
            limit: AtomicU32::new(SEGMENT_HEADER_LENGTH as u32),
        })
    }

    /// Fill `buf` with raw bytes from `address`, normalizing across sealed
    /// segment boundaries. Returns the normalized address and fill length.
    fn fill(&self, buf: &mut [u8], addr: u64) -> Result<Fill> {
        let mut id = segment_id(addr);
        let mut offset = segment_offset(addr);

        loop {
            let (segment, is_head) = {
                let segments = self.segments.read().unwrap();
                let front_id = match segments.list.front() {
                    Some(front) => front.id,
                    None => return Ok(Fill::NoData),
                };
                if id < front_id || (offset as usize) < SEGMENT_HEADER_LENGTH {
                    return Err(Error::InvalidAddress(addr));
                }
                let back_id = segments.head().id;
                if id > back_id {
                    return Ok(Fill::NoData);
                }
                let segment = match segments.find(id) {
                    Some(s) => s.clone(),
                    None => return Ok(Fill::NoData),
                };
                (segment, id == back_id)
            };

            let limit = segment.limit();
            if offset >= limit {
                if is_head {
                    return Ok(Fill::NoData);
                }
                // Sealed segment exhausted: continue in the next one
                id += 1;
                offset = SEGMENT_HEADER_LENGTH as u32;
                continue;
            }

            let available = (limit - offset) as usize;
            let to_read = available.min(buf.len());
            segment.file.read_exact_at(&mut buf[..to_read], offset as u64)?;

            return Ok(Fill::Data {
                normalized: address(id, offset),
                length: to_read,
            });
        }
    }
}

enum Fill {
    Data { normalized: u64, length: usize },
    NoData,
}

impl LogStorage for FsLogStorage {
    fn append(&self, block: &[u8]) -> Result<u64> {
        let _guard = self.append_lock.lock().unwrap();

        if block.len() > self.data_capacity() {
            return Err(Error::AppendBlockTooLarge {
                length: block.len(),
                max: self.data_capacity(),
            });
        }

        let head = self.segments.read().unwrap().head().clone();
        let limit = head.limit();
        let remaining = self.segment_size - limit as usize;

        let (segment, write_offset) = if block.len() > remaining {
            // Seal the head: fill the tail with one padding frame. The tail
            // is always frame-aligned and at least one header long.
            if remaining > 0 {
                let mut padding = BytesMut::with_capacity(remaining);
                frame::encode_padding(&mut padding, remaining);
                head.file.write_all_at(&padding, limit as u64)?;
                head.file.sync_data()?;
                head.limit
                    .store(self.segment_size as u32, Ordering::Release);
            }

            let next = Arc::new(self.create_segment(head.id + 1)?);
            self.segments.write().unwrap().list.push_back(next.clone());
            (next, SEGMENT_HEADER_LENGTH as u32)
        } else {
            (head, limit)
        };

        segment.file.write_all_at(block, write_offset as u64)?;
        segment.file.sync_data()?;
        segment
            .limit
            .store(write_offset + block.len() as u32, Ordering::Release);

        Ok(address(segment.id, write_offset))
    }

    fn read_into(&self, buf: &mut [u8], addr: u64) -> Result<ReadOutcome> {
        match self.fill(buf, addr)? {
            Fill::NoData => Ok(ReadOutcome::NoData),
            Fill::Data { normalized, length } => {
                let consumed = complete_frames_length(&buf[..length], self.data_capacity())?;
                if consumed == 0 {
                    // Not even one full frame fits the buffer
                    return Ok(ReadOutcome::InsufficientCapacity);
                }
                let remainder = length - consumed;
                if remainder * 2 > buf.len() {
                    // Avoid fragmenting reads: let the caller retry bigger
                    return Ok(ReadOutcome::InsufficientCapacity);
                }
                Ok(ReadOutcome::Advanced {
                    next_address: normalized + consumed as u64,
                    length: consumed,
                })
            }
        }
    }

    fn read_with_processor(
        &self,
        buf: &mut [u8],
        addr: u64,
        processor: &mut dyn ReadProcessor,
    ) -> Result<ReadOutcome> {
        match self.fill(buf, addr)? {
            Fill::NoData => Ok(ReadOutcome::NoData),
            Fill::Data { normalized, length } => match processor.process(&buf[..length])? {
                Processed::Consumed(0) | Processed::TryLater => Ok(ReadOutcome::Deferred),
                Processed::Consumed(consumed) => {
                    debug_assert!(consumed <= length);
                    Ok(ReadOutcome::Advanced {
                        next_address: normalized + consumed as u64,
                        length: consumed,
                    })
                }
                Processed::InsufficientCapacity => Ok(ReadOutcome::InsufficientCapacity),
            },
        }
    }

    fn first_block_address(&self) -> Option<u64> {
        let segments = self.segments.read().unwrap();
        segments
            .list
            .front()
            .map(|s| address(s.id, SEGMENT_HEADER_LENGTH as u32))
    }

    fn truncate(&self, addr: u64) -> Result<()> {
        let _guard = self.append_lock.lock().unwrap();

        let id = segment_id(addr);
        let offset = segment_offset(addr);

        let mut segments = self.segments.write().unwrap();
        let front_id = segments.list.front().map(|s| s.id).unwrap_or(0);
        let back_id = segments.head().id;
        if id < front_id || id > back_id || (offset as usize) < SEGMENT_HEADER_LENGTH {
            return Err(Error::InvalidAddress(addr));
        }

        let target = segments
            .find(id)
            .cloned()
            .ok_or(Error::InvalidAddress(addr))?;
        if offset > target.limit() {
            return Err(Error::InvalidAddress(addr));
        }

        // Drop every segment after the target
        while segments.head().id > id {
            let removed = segments.list.pop_back().expect("head exists");
            std::fs::remove_file(&removed.path)?;
            debug!(log = %self.name, segment = removed.id, "segment removed by truncate");
        }

        // Clip the target segment
        target.file.set_len(offset as u64)?;
        target.file.sync_data()?;
        target.limit.store(offset, Ordering::Release);

        info!(log = %self.name, address = format_args!("{:#x}", addr), "storage truncated");

        Ok(())
    }

    fn delete_until(&self, addr: u64) -> Result<usize> {
        let _guard = self.append_lock.lock().unwrap();

        let target_id = segment_id(addr);
        let mut removed = 0;

        let mut segments = self.segments.write().unwrap();
        while segments.list.len() > 1 {
            let front = segments.list.front().expect("list not empty");
            if front.id >= target_id {
                break;
            }
            let old = segments.list.pop_front().expect("front exists");
            std::fs::remove_file(&old.path)?;
            removed += 1;
            debug!(log = %self.name, segment = old.id, "segment deleted by retention");
        }

        if removed > 0 {
            info!(log = %self.name, segments = removed, "retention deleted segments");
        }

        Ok(removed)
    }
}

fn segment_file_name(id: u32) -> String {
    format!("segment-{:08}.data", id)
}

fn parse_segment_file_name(name: &str) -> Option<u32> {
    let rest = name.strip_prefix("segment-")?;
    let digits = rest.strip_suffix(".data")?;
    digits.parse().ok()
}

/// Open an existing segment file and recover its valid data length by walking
/// the frame chain. The first torn or garbage frame clips the file.
fn open_segment(path: &Path, id: u32, segment_size: usize) -> Result<Segment> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let file_len = file.metadata()?.len();

    let mut header = [0u8; SEGMENT_HEADER_LENGTH];
    if file_len < SEGMENT_HEADER_LENGTH as u64 {
        return Err(loghouse_core::Error::InvalidMagic.into());
    }
    file.read_exact_at(&mut header, 0)?;

    if header[0..4] != SEGMENT_MAGIC {
        return Err(loghouse_core::Error::InvalidMagic.into());
    }
    let version = u16::from_be_bytes([header[4], header[5]]);
    if version != SEGMENT_VERSION {
        return Err(loghouse_core::Error::UnsupportedVersion(version).into());
    }
    let stored_id = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    if stored_id != id {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("segment file {:?} claims id {}", path, stored_id),
        )));
    }

    let data_capacity = segment_size - SEGMENT_HEADER_LENGTH;
    let mut offset = SEGMENT_HEADER_LENGTH as u64;
    loop {
        let mut frame_header = [0u8; frame::FRAME_HEADER_LENGTH];
        if offset + frame::FRAME_HEADER_LENGTH as u64 > file_len {
            break;
        }
        file.read_exact_at(&mut frame_header, offset)?;

        let (frame_type, framed) = match frame::decode_frame_header(&frame_header) {
            Ok(Some(decoded)) => decoded,
            Ok(None) | Err(_) => break,
        };
        // A zero-length message frame cannot hold an entry header; it marks
        // zeroed (never written) space
        if framed > data_capacity || (frame_type == FrameType::Message && framed == frame::FRAME_HEADER_LENGTH)
        {
            break;
        }
        if offset + framed as u64 > file_len {
            break;
        }
        offset += framed as u64;
    }

    if offset < file_len {
        warn!(
            segment = id,
            valid = offset,
            file_len,
            "clipping torn tail of segment"
        );
        file.set_len(offset)?;
        file.sync_data()?;
    }

    Ok(Segment {
        id,
        path: path.to_path_buf(),
        file,
        limit: AtomicU32::new(offset as u32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use loghouse_core::entry::{NO_PRODUCER_ID, NO_SOURCE_PARTITION};
    use loghouse_core::LogEntry;
    use tempfile::TempDir;

    fn entry(position: i64, value: &[u8]) -> LogEntry {
        LogEntry {
            position,
            raft_term: 1,
            producer_id: NO_PRODUCER_ID,
            source_event_partition_id: NO_SOURCE_PARTITION,
            source_event_position: -1,
            key: position,
            source_log_name: None,
            metadata: None,
            value: bytes::Bytes::copy_from_slice(value),
        }
    }

    fn encode_block(entries: &[LogEntry]) -> BytesMut {
        let mut buf = BytesMut::new();
        for e in entries {
            frame::encode_entry(&mut buf, e);
        }
        buf
    }

    fn read_entries(storage: &FsLogStorage, mut addr: u64) -> Vec<LogEntry> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match storage.read_into(&mut buf, addr).unwrap() {
                ReadOutcome::Advanced {
                    next_address,
                    length,
                } => {
                    let mut off = 0;
                    while let Some(f) = frame::decode_frame(&buf[off..length]).unwrap() {
                        if f.frame_type == FrameType::Message {
                            out.push(frame::decode_entry(f.payload).unwrap());
                        }
                        off += f.framed_length;
                    }
                    addr = next_address;
                }
                ReadOutcome::NoData => break,
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        out
    }

    #[test]
    fn test_append_and_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = FsLogStorage::open(dir.path(), "orders", 1024 * 1024).unwrap();

        let entries: Vec<_> = (1..=5).map(|i| entry(i, format!("v{}", i).as_bytes())).collect();
        let addr = storage.append(&encode_block(&entries)).unwrap();
        assert_eq!(Some(addr), storage.first_block_address());

        let read = read_entries(&storage, addr);
        assert_eq!(read, entries);
    }

    #[test]
    fn test_read_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = FsLogStorage::open(dir.path(), "orders", 1024 * 1024).unwrap();

        let entries: Vec<_> = (1..=3).map(|i| entry(i, b"same")).collect();
        let addr = storage.append(&encode_block(&entries)).unwrap();

        let first = read_entries(&storage, addr);
        let second = read_entries(&storage, addr);
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_data_at_head() {
        let dir = TempDir::new().unwrap();
        let storage = FsLogStorage::open(dir.path(), "orders", 1024 * 1024).unwrap();

        let mut buf = vec![0u8; 1024];
        let addr = storage.first_block_address().unwrap();
        assert_eq!(storage.read_into(&mut buf, addr).unwrap(), ReadOutcome::NoData);

        let appended = storage.append(&encode_block(&[entry(1, b"x")])).unwrap();
        let next = match storage.read_into(&mut buf, appended).unwrap() {
            ReadOutcome::Advanced { next_address, .. } => next_address,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(storage.read_into(&mut buf, next).unwrap(), ReadOutcome::NoData);
    }

    #[test]
    fn test_insufficient_capacity_for_one_frame() {
        let dir = TempDir::new().unwrap();
        let storage = FsLogStorage::open(dir.path(), "orders", 1024 * 1024).unwrap();

        let addr = storage
            .append(&encode_block(&[entry(1, &[7u8; 256])]))
            .unwrap();

        let mut small = vec![0u8; 64];
        assert_eq!(
            storage.read_into(&mut small, addr).unwrap(),
            ReadOutcome::InsufficientCapacity
        );
    }

    #[test]
    fn test_segment_roll_pads_and_continues() {
        let dir = TempDir::new().unwrap();
        // Small segments force a roll after a couple of entries
        let storage = FsLogStorage::open(dir.path(), "orders", 256).unwrap();

        let mut addrs = Vec::new();
        for i in 1..=6 {
            let addr = storage
                .append(&encode_block(&[entry(i, &[i as u8; 64])]))
                .unwrap();
            addrs.push(addr);
        }
        assert!(storage.segment_count() > 1);

        // Addresses are monotonically increasing with append order
        for pair in addrs.windows(2) {
            assert!(pair[0] < pair[1]);
        }

        // All entries are readable across the roll, padding is invisible
        let read = read_entries(&storage, storage.first_block_address().unwrap());
        let positions: Vec<_> = read.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_truncate_discards_tail() {
        let dir = TempDir::new().unwrap();
        let storage = FsLogStorage::open(dir.path(), "orders", 1024 * 1024).unwrap();

        storage.append(&encode_block(&[entry(1, b"keep")])).unwrap();
        let cut = storage.append(&encode_block(&[entry(2, b"drop")])).unwrap();
        storage.append(&encode_block(&[entry(3, b"drop")])).unwrap();

        storage.truncate(cut).unwrap();

        let read = read_entries(&storage, storage.first_block_address().unwrap());
        let positions: Vec<_> = read.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1]);

        // The log keeps accepting appends after a truncate
        storage.append(&encode_block(&[entry(4, b"new")])).unwrap();
        let read = read_entries(&storage, storage.first_block_address().unwrap());
        let positions: Vec<_> = read.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 4]);
    }

    #[test]
    fn test_truncate_before_first_address_fails() {
        let dir = TempDir::new().unwrap();
        let storage = FsLogStorage::open(dir.path(), "orders", 256).unwrap();

        // Roll into segment 1, then retention-delete segment 0
        for i in 1..=6 {
            storage
                .append(&encode_block(&[entry(i, &[0u8; 64])]))
                .unwrap();
        }
        let head = address(storage.segment_count() as u32, 0);
        storage.delete_until(head).unwrap();

        let stale = address(0, SEGMENT_HEADER_LENGTH as u32);
        assert!(matches!(
            storage.truncate(stale),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_delete_until_keeps_target_segment() {
        let dir = TempDir::new().unwrap();
        let storage = FsLogStorage::open(dir.path(), "orders", 256).unwrap();

        for i in 1..=9 {
            storage
                .append(&encode_block(&[entry(i, &[0u8; 64])]))
                .unwrap();
        }
        let segments_before = storage.segment_count();
        assert!(segments_before >= 3);

        // Delete everything before the second remaining segment
        let keep_from = address(1, SEGMENT_HEADER_LENGTH as u32);
        let removed = storage.delete_until(keep_from).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.segment_count(), segments_before - 1);
        assert_eq!(storage.first_block_address(), Some(keep_from));

        // Deleted range now reads as invalid
        let mut buf = vec![0u8; 1024];
        assert!(matches!(
            storage.read_into(&mut buf, address(0, SEGMENT_HEADER_LENGTH as u32)),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_reopen_recovers_segments() {
        let dir = TempDir::new().unwrap();
        let entries: Vec<_> = (1..=6).map(|i| entry(i, &[i as u8; 64])).collect();
        {
            let storage = FsLogStorage::open(dir.path(), "orders", 256).unwrap();
            for e in &entries {
                storage.append(&encode_block(std::slice::from_ref(e))).unwrap();
            }
        }

        let storage = FsLogStorage::open(dir.path(), "orders", 256).unwrap();
        let read = read_entries(&storage, storage.first_block_address().unwrap());
        assert_eq!(read, entries);

        // Appends continue after the recovered head
        storage.append(&encode_block(&[entry(7, b"post")])).unwrap();
        let read = read_entries(&storage, storage.first_block_address().unwrap());
        assert_eq!(read.last().unwrap().position, 7);
    }

    #[test]
    fn test_reopen_clips_torn_tail() {
        let dir = TempDir::new().unwrap();
        let valid_entries: Vec<_> = (1..=2).map(|i| entry(i, b"ok")).collect();
        let path;
        {
            let storage = FsLogStorage::open(dir.path(), "orders", 1024 * 1024).unwrap();
            storage.append(&encode_block(&valid_entries)).unwrap();
            path = storage.directory().join(segment_file_name(0));
        }

        // Simulate a torn append: a frame header claiming more than exists
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        let torn = [0u8, 0, 1, 0, 0, 0, 0, 0]; // 256-byte payload, no payload bytes
        file.write_all_at(&torn, len).unwrap();

        let storage = FsLogStorage::open(dir.path(), "orders", 1024 * 1024).unwrap();
        let read = read_entries(&storage, storage.first_block_address().unwrap());
        assert_eq!(read, valid_entries);
    }

    #[test]
    fn test_append_block_too_large() {
        let dir = TempDir::new().unwrap();
        let storage = FsLogStorage::open(dir.path(), "orders", 256).unwrap();

        let block = vec![0u8; 512];
        assert!(matches!(
            storage.append(&block),
            Err(Error::AppendBlockTooLarge { .. })
        ));
    }
}
