//! Storage Backend Abstraction
//!
//! This module defines the append-only byte storage contract that the rest of
//! the engine builds on, plus the outcome types shared by all backends.
//!
//! ## The Contract
//!
//! A backend stores frames back-to-back and addresses them by their start
//! offset:
//!
//! - `append(block)` persists a block of whole frames at a new address
//! - `read_into(buf, address)` fills the caller's buffer with as many whole
//!   frames as fit and reports where the next read should resume
//! - `first_block_address()` is where scanning starts when no index exists
//! - `truncate(address)` discards everything at or after an address
//! - `delete_until(address)` drops whole segments that precede an address
//!   (retention)
//!
//! Reads are idempotent: re-reading the same address yields the same bytes
//! until a truncate affects the range.
//!
//! ## Addresses
//!
//! An address packs the segment id into the upper 32 bits and the byte offset
//! within that segment into the lower 32 bits. Addresses are monotonically
//! non-decreasing with append order but are *not* positions; only the block
//! index relates the two.
//!
//! ## Read Outcomes
//!
//! Reads never block and never error on "not there yet" conditions; they
//! return outcomes that drive the retry loops of the reader and the index
//! controller:
//!
//! - `Advanced`: frames were consumed, resume at `next_address`
//! - `NoData`: the address is at or past the end of written data
//! - `InsufficientCapacity`: not even one full frame fits the buffer, or the
//!   unread remainder exceeds half the buffer (retry with a larger buffer
//!   to avoid excessive fragmentation)
//! - `Deferred`: a supplied processor declined to consume anything yet
//!   (e.g. the block's entries are not committed); retry at the same address

mod fs;

pub use fs::{FsLogStorage, SEGMENT_HEADER_LENGTH};

use crate::error::Result;
use loghouse_core::frame;

/// Build an address from a segment id and a byte offset within the segment.
pub const fn address(segment_id: u32, offset: u32) -> u64 {
    ((segment_id as u64) << 32) | offset as u64
}

/// Segment id part of an address.
pub const fn segment_id(addr: u64) -> u32 {
    (addr >> 32) as u32
}

/// Byte offset part of an address.
pub const fn segment_offset(addr: u64) -> u32 {
    addr as u32
}

/// Outcome of a positional read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Frames were consumed; the next read should resume at `next_address`.
    Advanced { next_address: u64, length: usize },

    /// The address is at or past the end of written data.
    NoData,

    /// The caller's buffer cannot hold one consumable unit; retry with a
    /// larger buffer.
    InsufficientCapacity,

    /// The supplied processor declined to consume the block; retry later at
    /// the same address.
    Deferred,
}

/// Decision of a [`ReadProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Consume this many bytes of the filled buffer.
    Consumed(usize),

    /// Nothing is consumable yet; retry later at the same address.
    TryLater,

    /// The buffer cannot hold one consumable unit.
    InsufficientCapacity,
}

/// Inspects a filled read buffer and determines the true consumed length.
///
/// Used to truncate a read batch to only complete (and, for the index
/// controller, only committed) frames.
pub trait ReadProcessor {
    fn process(&mut self, buf: &[u8]) -> Result<Processed>;
}

/// Append-only frame storage.
pub trait LogStorage: Send + Sync {
    /// Persist `block` (one or more whole frames) at a new address.
    ///
    /// Fails only on unrecoverable I/O errors; these are propagated, not
    /// retried.
    fn append(&self, block: &[u8]) -> Result<u64>;

    /// Fill `buf` with as many whole frames as fit, starting at `address`.
    fn read_into(&self, buf: &mut [u8], address: u64) -> Result<ReadOutcome>;

    /// Fill `buf` starting at `address` and let `processor` decide how much
    /// of it counts as consumed.
    fn read_with_processor(
        &self,
        buf: &mut [u8],
        address: u64,
        processor: &mut dyn ReadProcessor,
    ) -> Result<ReadOutcome>;

    /// Address to start scanning from when no index exists yet.
    fn first_block_address(&self) -> Option<u64>;

    /// Discard all data at or after `address`.
    fn truncate(&self, address: u64) -> Result<()>;

    /// Remove whole segments strictly before the segment containing
    /// `address`; returns the number of removed segments.
    fn delete_until(&self, address: u64) -> Result<usize>;
}

/// Length of the whole-frame prefix of `buf`.
///
/// `max_framed_length` bounds a single frame; a declared length beyond it is
/// corruption, not a short read.
pub(crate) fn complete_frames_length(buf: &[u8], max_framed_length: usize) -> Result<usize> {
    let mut consumed = 0;
    while let Some((_, framed)) = frame::decode_frame_header(&buf[consumed..])? {
        if framed > max_framed_length {
            return Err(loghouse_core::Error::CorruptFrame(format!(
                "frame of {} bytes exceeds segment capacity {}",
                framed, max_framed_length
            ))
            .into());
        }
        if consumed + framed > buf.len() {
            break;
        }
        consumed += framed;
    }
    Ok(consumed)
}
