//! In-Memory Write Buffer with Claim/Commit Semantics
//!
//! Writers and the appender meet here: a multi-producer, single-consumer
//! buffer of encoded frames.
//!
//! ```text
//! Writers ──try_claim──▶ [reserved capacity]
//!         ──encode────▶ claim-local block (invisible to the consumer)
//!         ──commit────▶ [committed queue] ──take_block──▶ Appender
//! ```
//!
//! ## Claim/Commit Protocol
//!
//! A producer claims capacity for a whole batch, encodes its frames into the
//! claim, then commits. The consumer only ever observes committed batches;
//! a claimed-but-uncommitted batch exists solely on the producer's side, and
//! an abandoned claim releases its reservation.
//!
//! ## Position Assignment
//!
//! Positions must be strictly increasing *in append order*. Since commit
//! order is append order, final positions are assigned under the commit
//! lock: each frame's position field (and, when requested, its key) is
//! patched in place just before the batch enters the committed queue. This
//! keeps a batch atomic and keeps positions dense per commit regardless of
//! which producer claimed first.
//!
//! ## Backpressure and Failure
//!
//! `try_claim` returns `Ok(None)` while outstanding claims plus queued bytes
//! would exceed the configured capacity; producers retry later. When the
//! appender hits an unrecoverable storage error it marks the buffer failed,
//! after which every claim attempt errors so producers observe the failure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use loghouse_core::frame;
use loghouse_core::LogEntry;
use tokio::sync::Notify;

use crate::error::{Error, Result};

/// A committed batch queued for the appender.
struct Batch {
    data: Bytes,
    last_position: i64,
}

struct Inner {
    queue: VecDeque<Batch>,
    /// Committed bytes waiting to be drained
    queued_bytes: usize,
    /// Bytes reserved by outstanding claims
    claimed_bytes: usize,
    /// Next position to assign at commit
    next_position: i64,
}

/// A block handed to the appender: whole committed batches, never split.
pub struct AppendBlock {
    pub data: Bytes,
    /// Position of the last entry in the block
    pub last_position: i64,
}

/// Multi-producer, single-consumer frame buffer.
pub struct WriteBuffer {
    capacity: usize,
    /// Largest single claim; bounds what one append hands to storage
    max_claim: usize,
    inner: Mutex<Inner>,
    data_ready: Notify,
    failed: AtomicBool,
}

impl WriteBuffer {
    pub fn new(capacity: usize, max_claim: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            max_claim: max_claim.min(capacity),
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                queued_bytes: 0,
                claimed_bytes: 0,
                next_position: 1,
            }),
            data_ready: Notify::new(),
            failed: AtomicBool::new(false),
        })
    }

    /// Reserve `length` bytes for a batch.
    ///
    /// `Ok(None)` means the buffer is at capacity; this is expected
    /// backpressure, the producer should retry later.
    pub fn try_claim(self: &Arc<Self>, length: usize) -> Result<Option<Claim>> {
        if self.failed.load(Ordering::Acquire) {
            return Err(Error::WriteBufferFailed);
        }
        if length > self.max_claim {
            return Err(Error::AppendBlockTooLarge {
                length,
                max: self.max_claim,
            });
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.queued_bytes + inner.claimed_bytes + length > self.capacity {
            return Ok(None);
        }
        inner.claimed_bytes += length;

        Ok(Some(Claim {
            buffer: self.clone(),
            reserved: length,
            block: BytesMut::with_capacity(length),
            frames: Vec::new(),
            consumed: false,
        }))
    }

    /// Drain committed batches, up to `max_bytes`, without splitting any
    /// batch. Returns `None` when nothing is committed.
    pub fn take_block(&self, max_bytes: usize) -> Option<AppendBlock> {
        let mut inner = self.inner.lock().unwrap();

        let first = inner.queue.front()?;
        let mut total = first.data.len();
        let mut last_position = first.last_position;
        let mut count = 1;

        while let Some(batch) = inner.queue.get(count) {
            if total + batch.data.len() > max_bytes {
                break;
            }
            total += batch.data.len();
            last_position = batch.last_position;
            count += 1;
        }

        let mut data = BytesMut::with_capacity(total);
        for _ in 0..count {
            let batch = inner.queue.pop_front().expect("counted batches exist");
            data.extend_from_slice(&batch.data);
        }
        inner.queued_bytes -= total;

        Some(AppendBlock {
            data: data.freeze(),
            last_position,
        })
    }

    /// Wait until a batch is committed (or a permit is already stored).
    pub async fn data_ready(&self) {
        self.data_ready.notified().await;
    }

    /// True when no batch is queued and no claim is outstanding.
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.queue.is_empty() && inner.claimed_bytes == 0
    }

    /// Mark the buffer failed; producers observe this on their next claim.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
        // Wake the appender so it can observe the failure too
        self.data_ready.notify_one();
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

struct FrameMeta {
    payload_offset: usize,
    payload_length: usize,
    key_from_position: bool,
}

/// A reserved, producer-local batch under construction.
pub struct Claim {
    buffer: Arc<WriteBuffer>,
    reserved: usize,
    block: BytesMut,
    frames: Vec<FrameMeta>,
    consumed: bool,
}

impl Claim {
    /// Encode `entry` as the next frame of this batch.
    ///
    /// The entry's position (and key, when `key_from_position` is set) are
    /// placeholders until commit assigns the final values.
    pub fn append_entry(&mut self, entry: &LogEntry, key_from_position: bool) {
        let payload_offset = self.block.len() + frame::FRAME_HEADER_LENGTH;
        let payload_length = frame::entry_payload_length(entry);
        frame::encode_entry(&mut self.block, entry);
        self.frames.push(FrameMeta {
            payload_offset,
            payload_length,
            key_from_position,
        });
    }

    /// Number of entries appended so far.
    pub fn entry_count(&self) -> usize {
        self.frames.len()
    }

    /// Assign final positions and publish the batch atomically.
    ///
    /// Returns the position of the last entry in the batch.
    pub fn commit(mut self) -> i64 {
        debug_assert_eq!(self.block.len(), self.reserved);
        debug_assert!(!self.frames.is_empty());

        let mut inner = self.buffer.inner.lock().unwrap();

        let mut last_position = inner.next_position;
        for meta in &self.frames {
            let position = inner.next_position;
            inner.next_position += 1;
            last_position = position;

            let payload =
                &mut self.block[meta.payload_offset..meta.payload_offset + meta.payload_length];
            frame::patch_position(payload, position);
            if meta.key_from_position {
                frame::patch_key(payload, position);
            }
        }

        let data = std::mem::take(&mut self.block).freeze();
        inner.queued_bytes += data.len();
        inner.claimed_bytes -= self.reserved;
        inner.queue.push_back(Batch {
            data,
            last_position,
        });
        drop(inner);

        self.consumed = true;
        self.buffer.data_ready.notify_one();

        last_position
    }

    /// Release the reservation without publishing anything.
    pub fn abort(self) {
        // Drop handles the release
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.consumed {
            let mut inner = self.buffer.inner.lock().unwrap();
            inner.claimed_bytes -= self.reserved;
        }
    }
}
