//! Log Entry Data Structure
//!
//! This module defines the core `LogEntry` type, the fundamental unit of data
//! in a loghouse partition.
//!
//! ## What is a Log Entry?
//! A log entry is a single event in the append-only partition log:
//! - **position**: Unique, strictly increasing sequence number within the
//!   partition, assigned when the entry is committed to the write buffer
//! - **key**: Caller-supplied identifier (>= 0). Callers that have no natural
//!   key use the assigned position as the key
//! - **value**: The actual payload (arbitrary bytes, mandatory)
//! - **metadata**: Optional opaque bytes carried next to the value
//! - **provenance**: Pointer to the causally preceding entry, possibly in
//!   another partition (`source_event_partition_id` / `source_event_position`,
//!   optionally qualified by `source_log_name`)
//! - **producer_id / raft_term**: Who wrote it and under which leadership
//!   epoch
//!
//! ## Design Decisions
//! - Uses `bytes::Bytes` for zero-copy slicing of decoded payloads
//! - Position and key are `i64` so that -1 can act as a sentinel in the
//!   provenance fields, matching the on-disk format
//! - Optional byte ranges decode as `None` when their stored length is zero

use bytes::Bytes;

/// Sentinel for an absent producer id.
pub const NO_PRODUCER_ID: i32 = -1;

/// Sentinel for an absent source-event partition.
pub const NO_SOURCE_PARTITION: i32 = -1;

/// A single entry in the partition log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Position of this entry in the partition (strictly increasing)
    pub position: i64,

    /// Leadership epoch active when the entry was written
    pub raft_term: i32,

    /// Producer id, or [`NO_PRODUCER_ID`]
    pub producer_id: i32,

    /// Partition of the causally preceding entry, or [`NO_SOURCE_PARTITION`]
    pub source_event_partition_id: i32,

    /// Position of the causally preceding entry, or -1
    pub source_event_position: i64,

    /// Entry key (>= 0); defaults to the position when the caller supplied none
    pub key: i64,

    /// Optional log name qualifying the provenance pointer
    pub source_log_name: Option<Bytes>,

    /// Optional metadata
    pub metadata: Option<Bytes>,

    /// Value (payload)
    pub value: Bytes,
}

impl LogEntry {
    /// Byte length of the variable trailers plus value, as stored on disk.
    pub fn payload_body_len(&self) -> usize {
        self.source_log_name.as_ref().map(|n| n.len()).unwrap_or(0)
            + self.metadata.as_ref().map(|m| m.len()).unwrap_or(0)
            + self.value.len()
    }
}
