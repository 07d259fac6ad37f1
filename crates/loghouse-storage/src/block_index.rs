//! Block Index for O(log n) Position Lookups
//!
//! ## The Problem
//!
//! Positions are logical sequence numbers; addresses are physical offsets in
//! the storage backend. A reader that wants to start at position `p` would
//! otherwise have to scan the whole log from the first segment.
//!
//! ## The Solution
//!
//! `LogBlockIndex` keeps one `(position, address)` sample per indexed storage
//! block, where `position` is the position of the *first* entry in that block
//! and `address` is that entry's frame address:
//!
//! ```text
//! entries (sorted, append-only):
//!   (1,    0x0000_0010)
//!   (512,  0x0000_fff0)
//!   (1024, 0x0001_0010)
//!
//! lookup_block_address(700):
//!   floor via binary search -> 0x0000_fff0
//! ```
//!
//! Entries are strictly increasing in both fields and only ever appended, so
//! a dense sorted `Vec` with binary search beats any tree structure. The
//! capacity is fixed at construction; filling the index completely is a hard
//! error that requires operator intervention (index sizing is a
//! configuration concern).
//!
//! ## Snapshots
//!
//! The full entry array serializes to a checksummed binary snapshot so the
//! controller can seed a fresh index on startup instead of rescanning the
//! log:
//!
//! ```text
//! ┌───────┬─────────┬──────────┬──────────┬───────┬─────────────┬───────┐
//! │ Magic │ Version │ Reserved │ Position │ Count │ Entries     │ CRC32 │
//! │"LHIX" │ (2)     │ (2)      │ (8)      │ (4)   │ (16 each)   │ (4)   │
//! └───────┴─────────┴──────────┴──────────┴───────┴─────────────┴───────┘
//! ```
//!
//! Recovery is all-or-nothing: a snapshot that fails validation leaves the
//! in-memory index untouched.
//!
//! ## Thread Safety
//!
//! The index is owned and mutated only by its controller but read
//! concurrently by any number of readers; an internal `RwLock` over the
//! entry array keeps lookups cheap while appends stay rare (one per block).

use std::sync::RwLock;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Magic bytes for index snapshots: "LHIX"
const SNAPSHOT_MAGIC: [u8; 4] = [0x4C, 0x48, 0x49, 0x58];

/// Version number for the snapshot format
const SNAPSHOT_VERSION: u16 = 1;

/// Snapshot header size: magic + version + reserved + position + count
const SNAPSHOT_HEADER_LENGTH: usize = 4 + 2 + 2 + 8 + 4;

/// Serialized size of one index entry
const SNAPSHOT_ENTRY_LENGTH: usize = 16;

/// One indexed block: the position and address of its first entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub position: i64,
    pub address: u64,
}

/// Bounded, ordered position-to-address index.
pub struct LogBlockIndex {
    capacity: usize,
    entries: RwLock<Vec<BlockIndexEntry>>,
}

impl LogBlockIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(Vec::with_capacity(capacity)),
        }
    }

    /// Append an index entry for a newly scanned block.
    ///
    /// Returns the new size. Fails when the index is full, or when
    /// `position`/`address` are not strictly greater than the last stored
    /// entry (duplicate or out-of-order insert).
    pub fn add_block(&self, position: i64, address: u64) -> Result<usize> {
        let mut entries = self.entries.write().unwrap();

        if entries.len() >= self.capacity {
            return Err(Error::BlockIndexFull(self.capacity));
        }
        if let Some(last) = entries.last() {
            if position <= last.position || address <= last.address {
                return Err(Error::OutOfOrderBlock {
                    last_position: last.position,
                    position,
                });
            }
        }

        entries.push(BlockIndexEntry { position, address });
        Ok(entries.len())
    }

    /// Address of the block whose recorded position is the greatest value
    /// less than or equal to `position`; `None` if the index is empty or
    /// `position` precedes the first entry.
    pub fn lookup_block_address(&self, position: i64) -> Option<u64> {
        self.floor(position).map(|e| e.address)
    }

    /// Same floor search, returning the recorded position instead.
    pub fn lookup_block_position(&self, position: i64) -> Option<i64> {
        self.floor(position).map(|e| e.position)
    }

    fn floor(&self, position: i64) -> Option<BlockIndexEntry> {
        let entries = self.entries.read().unwrap();
        let idx = match entries.binary_search_by_key(&position, |e| e.position) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        Some(entries[idx])
    }

    pub fn size(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Position of the most recently indexed block, if any.
    pub fn last_position(&self) -> Option<i64> {
        self.entries.read().unwrap().last().map(|e| e.position)
    }

    /// Discard all entries.
    pub fn reset(&self) {
        self.entries.write().unwrap().clear();
    }

    /// Drop all entries at or after `position` (index tail truncation).
    pub fn truncate(&self, position: i64) {
        let mut entries = self.entries.write().unwrap();
        let keep = entries.partition_point(|e| e.position < position);
        entries.truncate(keep);
    }

    /// Serialize the full entry array plus the position the snapshot was
    /// taken at.
    pub fn write_snapshot(&self, buf: &mut BytesMut, snapshot_position: i64) {
        let entries = self.entries.read().unwrap();

        buf.reserve(SNAPSHOT_HEADER_LENGTH + entries.len() * SNAPSHOT_ENTRY_LENGTH + 4);
        buf.put_slice(&SNAPSHOT_MAGIC);
        buf.put_u16(SNAPSHOT_VERSION);
        buf.put_u16(0);
        buf.put_i64(snapshot_position);
        buf.put_u32(entries.len() as u32);
        for e in entries.iter() {
            buf.put_i64(e.position);
            buf.put_u64(e.address);
        }

        let crc = crc32fast::hash(&buf[..]);
        buf.put_u32(crc);
    }

    /// Replace the in-memory contents from a serialized snapshot.
    ///
    /// Either fully succeeds (returning the position the snapshot was taken
    /// at) or leaves the index in its prior state.
    pub fn recover_from_snapshot(&self, data: &[u8]) -> Result<i64> {
        if data.len() < SNAPSHOT_HEADER_LENGTH + 4 {
            return Err(Error::CorruptSnapshot("snapshot too short".to_string()));
        }
        if data[0..4] != SNAPSHOT_MAGIC {
            return Err(Error::CorruptSnapshot("bad magic".to_string()));
        }
        let version = u16::from_be_bytes([data[4], data[5]]);
        if version != SNAPSHOT_VERSION {
            return Err(Error::CorruptSnapshot(format!(
                "unsupported version {}",
                version
            )));
        }

        let body = &data[..data.len() - 4];
        let stored_crc = u32::from_be_bytes([
            data[data.len() - 4],
            data[data.len() - 3],
            data[data.len() - 2],
            data[data.len() - 1],
        ]);
        if crc32fast::hash(body) != stored_crc {
            return Err(Error::CorruptSnapshot("CRC mismatch".to_string()));
        }

        let position = i64::from_be_bytes([
            data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
        ]);
        let count = u32::from_be_bytes([data[16], data[17], data[18], data[19]]) as usize;

        if count > self.capacity {
            return Err(Error::CorruptSnapshot(format!(
                "snapshot holds {} entries but index capacity is {}",
                count, self.capacity
            )));
        }
        if body.len() != SNAPSHOT_HEADER_LENGTH + count * SNAPSHOT_ENTRY_LENGTH {
            return Err(Error::CorruptSnapshot("length mismatch".to_string()));
        }

        let mut recovered = Vec::with_capacity(count);
        for i in 0..count {
            let off = SNAPSHOT_HEADER_LENGTH + i * SNAPSHOT_ENTRY_LENGTH;
            let entry = BlockIndexEntry {
                position: i64::from_be_bytes([
                    data[off],
                    data[off + 1],
                    data[off + 2],
                    data[off + 3],
                    data[off + 4],
                    data[off + 5],
                    data[off + 6],
                    data[off + 7],
                ]),
                address: u64::from_be_bytes([
                    data[off + 8],
                    data[off + 9],
                    data[off + 10],
                    data[off + 11],
                    data[off + 12],
                    data[off + 13],
                    data[off + 14],
                    data[off + 15],
                ]),
            };
            if let Some(prev) = recovered.last() {
                let prev: &BlockIndexEntry = prev;
                if entry.position <= prev.position || entry.address <= prev.address {
                    return Err(Error::CorruptSnapshot(format!(
                        "out-of-order entry at index {}",
                        i
                    )));
                }
            }
            recovered.push(entry);
        }

        *self.entries.write().unwrap() = recovered;
        Ok(position)
    }
}
