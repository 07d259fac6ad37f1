//! Binary Frame Codec
//!
//! This module implements the on-disk framing format for the partition log.
//!
//! ## Frame Layout
//!
//! Every entry is stored as a length-prefixed, alignment-padded frame. The
//! start offset of a frame within the storage backend is its *address*.
//!
//! ```text
//! ┌──────────────┬────────────┬──────────────┬─────────────────┬─────────┐
//! │ Length       │ Frame Type │ Reserved     │ Payload         │ Padding │
//! │ (4 bytes)    │ (1 byte)   │ (3 bytes)    │ (Length bytes)  │ (0..7)  │
//! └──────────────┴────────────┴──────────────┴─────────────────┴─────────┘
//! ```
//!
//! - `Length` is the payload byte length, excluding the 8-byte frame header
//! - The total on-disk size is rounded up to an 8-byte alignment boundary;
//!   padding byte content is unspecified and skippable by length alone
//! - `Frame Type` distinguishes message frames from padding frames. Padding
//!   frames fill the unusable tail of a segment and never decode to an entry
//!
//! ## Entry Header Layout (inside a message payload)
//!
//! ```text
//! offset  0: position                   (8 bytes, i64)
//! offset  8: raft term                  (4 bytes, i32)
//! offset 12: producer id                (4 bytes, i32)
//! offset 16: source event partition id  (4 bytes, i32)
//! offset 20: source event position      (8 bytes, i64)
//! offset 28: key                        (8 bytes, i64)
//! offset 36: source log name length     (2 bytes, u16)
//! offset 38: metadata length            (2 bytes, u16)
//! offset 40: source log name bytes, then metadata bytes, then value bytes
//! ```
//!
//! The header size depends on two variable-length trailers (source log name
//! and metadata), so all field access goes through the explicit offset
//! functions below rather than struct overlays. Decoding validates the
//! declared trailer lengths against the frame's payload length and never
//! reads past it.
//!
//! All integers are big-endian.

use bytes::{BufMut, BytesMut};

use crate::entry::LogEntry;
use crate::error::{Error, Result};

/// Frame header: length (4) + type (1) + reserved (3).
pub const FRAME_HEADER_LENGTH: usize = 8;

/// Every frame's total on-disk size is a multiple of this.
pub const FRAME_ALIGNMENT: usize = 8;

/// Fixed part of the entry header, before the variable trailers.
pub const ENTRY_HEADER_LENGTH: usize = 40;

/// Type of a stored frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Carries one encoded log entry
    Message = 0,
    /// Fills the unusable tail of a segment; skipped by all consumers
    Padding = 1,
}

impl TryFrom<u8> for FrameType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FrameType::Message),
            1 => Ok(FrameType::Padding),
            other => Err(Error::UnknownFrameType(other)),
        }
    }
}

/// Round `len` up to the frame alignment boundary.
pub const fn align(len: usize) -> usize {
    (len + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1)
}

/// Total on-disk size of a frame with the given payload length.
pub const fn framed_length(payload_length: usize) -> usize {
    align(FRAME_HEADER_LENGTH + payload_length)
}

// ---------------------------------------------------------------------------
// Entry header offsets (within a message payload)
// ---------------------------------------------------------------------------

pub const fn position_offset() -> usize {
    0
}

pub const fn raft_term_offset() -> usize {
    8
}

pub const fn producer_id_offset() -> usize {
    12
}

pub const fn source_partition_id_offset() -> usize {
    16
}

pub const fn source_position_offset() -> usize {
    20
}

pub const fn key_offset() -> usize {
    28
}

pub const fn source_name_length_offset() -> usize {
    36
}

pub const fn metadata_length_offset() -> usize {
    38
}

pub const fn source_name_offset() -> usize {
    ENTRY_HEADER_LENGTH
}

pub const fn metadata_offset(source_name_length: usize) -> usize {
    ENTRY_HEADER_LENGTH + source_name_length
}

pub const fn value_offset(source_name_length: usize, metadata_length: usize) -> usize {
    ENTRY_HEADER_LENGTH + source_name_length + metadata_length
}

/// Payload length of an encoded entry (header + trailers + value).
pub fn entry_payload_length(entry: &LogEntry) -> usize {
    ENTRY_HEADER_LENGTH + entry.payload_body_len()
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode `entry` as a complete message frame, including alignment padding.
///
/// Returns the framed (aligned) length written.
pub fn encode_entry(buf: &mut BytesMut, entry: &LogEntry) -> usize {
    let payload_length = entry_payload_length(entry);
    let framed = framed_length(payload_length);

    // Frame header
    buf.put_u32(payload_length as u32);
    buf.put_u8(FrameType::Message as u8);
    buf.put_bytes(0, 3);

    // Entry header
    buf.put_i64(entry.position);
    buf.put_i32(entry.raft_term);
    buf.put_i32(entry.producer_id);
    buf.put_i32(entry.source_event_partition_id);
    buf.put_i64(entry.source_event_position);
    buf.put_i64(entry.key);

    let source_name = entry.source_log_name.as_deref().unwrap_or(&[]);
    let metadata = entry.metadata.as_deref().unwrap_or(&[]);
    buf.put_u16(source_name.len() as u16);
    buf.put_u16(metadata.len() as u16);

    // Trailers and value
    buf.put_slice(source_name);
    buf.put_slice(metadata);
    buf.put_slice(&entry.value);

    // Alignment padding
    buf.put_bytes(0, framed - FRAME_HEADER_LENGTH - payload_length);

    framed
}

/// Encode a padding frame occupying exactly `total_length` bytes.
///
/// `total_length` must be frame-aligned and at least one frame header long;
/// both hold by construction wherever padding is emitted (segment tails are
/// always a multiple of the alignment).
pub fn encode_padding(buf: &mut BytesMut, total_length: usize) {
    debug_assert!(total_length >= FRAME_HEADER_LENGTH);
    debug_assert_eq!(total_length % FRAME_ALIGNMENT, 0);

    buf.put_u32((total_length - FRAME_HEADER_LENGTH) as u32);
    buf.put_u8(FrameType::Padding as u8);
    buf.put_bytes(0, 3);
    buf.put_bytes(0, total_length - FRAME_HEADER_LENGTH);
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A decoded frame borrowing its payload from the read buffer.
#[derive(Debug)]
pub struct Frame<'a> {
    pub frame_type: FrameType,
    pub payload: &'a [u8],
    /// Aligned total length; the next frame starts this many bytes later.
    pub framed_length: usize,
}

/// Peek at a frame header without requiring the full frame.
///
/// Returns `Ok(None)` when fewer than [`FRAME_HEADER_LENGTH`] bytes are
/// available, otherwise the frame type and the aligned total length. This is
/// how scanners detect a corrupt declared length before the full frame is in
/// memory.
pub fn decode_frame_header(buf: &[u8]) -> Result<Option<(FrameType, usize)>> {
    if buf.len() < FRAME_HEADER_LENGTH {
        return Ok(None);
    }

    let payload_length = read_u32(buf, 0) as usize;
    let frame_type = FrameType::try_from(buf[4])?;
    Ok(Some((frame_type, framed_length(payload_length))))
}

/// Decode the frame starting at the beginning of `buf`.
///
/// Returns `Ok(None)` when the buffer holds a truncated frame ("needs more
/// data"); this never decodes garbage from a partial read. Errors only on an
/// unknown frame type.
pub fn decode_frame(buf: &[u8]) -> Result<Option<Frame<'_>>> {
    if buf.len() < FRAME_HEADER_LENGTH {
        return Ok(None);
    }

    let payload_length = read_u32(buf, 0) as usize;
    let frame_type = FrameType::try_from(buf[4])?;
    let framed = framed_length(payload_length);

    if buf.len() < framed {
        return Ok(None);
    }

    Ok(Some(Frame {
        frame_type,
        payload: &buf[FRAME_HEADER_LENGTH..FRAME_HEADER_LENGTH + payload_length],
        framed_length: framed,
    }))
}

/// Decode a message payload into an owned [`LogEntry`].
///
/// Validates the declared trailer lengths against the payload bounds; a
/// mismatch is corruption, never a partial decode.
pub fn decode_entry(payload: &[u8]) -> Result<LogEntry> {
    if payload.len() < ENTRY_HEADER_LENGTH {
        return Err(Error::CorruptFrame(format!(
            "payload too short for entry header: {} < {}",
            payload.len(),
            ENTRY_HEADER_LENGTH
        )));
    }

    let source_name_length = read_u16(payload, source_name_length_offset()) as usize;
    let metadata_length = read_u16(payload, metadata_length_offset()) as usize;
    let body_offset = value_offset(source_name_length, metadata_length);

    if body_offset > payload.len() {
        return Err(Error::CorruptFrame(format!(
            "declared trailer lengths ({} + {}) exceed payload length {}",
            source_name_length,
            metadata_length,
            payload.len()
        )));
    }

    let source_log_name = if source_name_length > 0 {
        Some(bytes::Bytes::copy_from_slice(
            &payload[source_name_offset()..source_name_offset() + source_name_length],
        ))
    } else {
        None
    };

    let metadata = if metadata_length > 0 {
        let start = metadata_offset(source_name_length);
        Some(bytes::Bytes::copy_from_slice(
            &payload[start..start + metadata_length],
        ))
    } else {
        None
    };

    Ok(LogEntry {
        position: read_i64(payload, position_offset()),
        raft_term: read_i32(payload, raft_term_offset()),
        producer_id: read_i32(payload, producer_id_offset()),
        source_event_partition_id: read_i32(payload, source_partition_id_offset()),
        source_event_position: read_i64(payload, source_position_offset()),
        key: read_i64(payload, key_offset()),
        source_log_name,
        metadata,
        value: bytes::Bytes::copy_from_slice(&payload[body_offset..]),
    })
}

/// Cheap peek at the position of an encoded entry without a full decode.
pub fn entry_position(payload: &[u8]) -> Result<i64> {
    if payload.len() < ENTRY_HEADER_LENGTH {
        return Err(Error::CorruptFrame(
            "payload too short to read position".to_string(),
        ));
    }
    Ok(read_i64(payload, position_offset()))
}

// ---------------------------------------------------------------------------
// In-place patching (used when positions are assigned at commit time)
// ---------------------------------------------------------------------------

/// Overwrite the position field of an encoded entry payload.
pub fn patch_position(payload: &mut [u8], position: i64) {
    payload[position_offset()..position_offset() + 8].copy_from_slice(&position.to_be_bytes());
}

/// Overwrite the key field of an encoded entry payload.
pub fn patch_key(payload: &mut [u8], key: i64) {
    payload[key_offset()..key_offset() + 8].copy_from_slice(&key.to_be_bytes());
}

// ---------------------------------------------------------------------------
// Primitive readers (bounds are validated by the callers above)
// ---------------------------------------------------------------------------

fn read_u16(b: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([b[off], b[off + 1]])
}

fn read_u32(b: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn read_i32(b: &[u8], off: usize) -> i32 {
    i32::from_be_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn read_i64(b: &[u8], off: usize) -> i64 {
    i64::from_be_bytes([
        b[off],
        b[off + 1],
        b[off + 2],
        b[off + 3],
        b[off + 4],
        b[off + 5],
        b[off + 6],
        b[off + 7],
    ])
}
