//! Storage Error Types
//!
//! This module defines all error types that can occur during storage engine
//! operations.
//!
//! ## Error Categories
//!
//! ### Caller/Validation Errors
//! - `MissingKey` / `MissingValue`: An entry was submitted without its
//!   mandatory fields; rejected synchronously, never persisted
//! - `InvalidPosition`: A negative position was passed where one is required
//!
//! ### Capacity Exhaustion
//! - `BlockIndexFull`: The block index reached its fixed capacity; index
//!   sizing is a configuration concern and this is a hard stop
//! - `BufferCapacityExceeded`: A reader would have to grow past its hard
//!   maximum; surfaced immediately as a configuration error
//! - `FrameTooLarge` / `AppendBlockTooLarge`: A single entry or append batch
//!   exceeds what the backend can hold
//!
//! ### Conflicts
//! - `AlreadyCommitted`: Truncation targeted a position at or below the
//!   commit watermark
//! - `InvalidState`: An operation arrived while the controller was in a state
//!   that cannot serve it (e.g. truncate during snapshotting)
//!
//! ### Misuse
//! - `NotInitialized` / `NoNextEntry` / `NoCurrentEntry`: Reader protocol
//!   violations; end-of-data itself is signalled via `has_next() == false`,
//!   not through errors
//!
//! Transient I/O outcomes (no data yet, insufficient buffer capacity, block
//! not yet committed) are *not* errors; they are `ReadOutcome` values that
//! drive the retry loops in the controller and reader.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] loghouse_core::Error),

    #[error("Entry missing a key")]
    MissingKey,

    #[error("Entry missing a value")]
    MissingValue,

    #[error("Invalid position: {0}")]
    InvalidPosition(i64),

    #[error("Frame of {length} bytes exceeds maximum entry size {max}")]
    FrameTooLarge { length: usize, max: usize },

    #[error("Append block of {length} bytes exceeds segment data capacity {max}")]
    AppendBlockTooLarge { length: usize, max: usize },

    #[error("Block index full: capacity {0}")]
    BlockIndexFull(usize),

    #[error("Block position {position} not greater than last indexed position {last_position}")]
    OutOfOrderBlock { last_position: i64, position: i64 },

    #[error("Read buffer would exceed maximum capacity {max} (required {required})")]
    BufferCapacityExceeded { required: usize, max: usize },

    #[error("Invalid storage address: {0:#x}")]
    InvalidAddress(u64),

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Reader not initialized, call wrap() first")]
    NotInitialized,

    #[error("No next entry, call has_next() first")]
    NoNextEntry,

    #[error("Reader has no current entry")]
    NoCurrentEntry,

    #[error("Position {position} is uncommitted (commit position {commit_position})")]
    Uncommitted { position: i64, commit_position: i64 },

    #[error("Position {position} is already committed (commit position {commit_position})")]
    AlreadyCommitted { position: i64, commit_position: i64 },

    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Write buffer is marked failed")]
    WriteBufferFailed,

    #[error("Log stream closed: {0}")]
    Closed(&'static str),
}
