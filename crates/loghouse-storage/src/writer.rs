//! Entry Writers
//!
//! Builder-style producers that assemble one entry (`LogWriter`) or many
//! (`BatchWriter`) and submit them as one atomic claim/commit against the
//! write buffer.
//!
//! ## Building an Entry
//!
//! Every entry needs an explicit key **or** the use-position-as-key flag,
//! and a value. Values and metadata accept three forms: a whole buffer, a
//! partial byte range, or a deferred [`BufferWriter`] that produces its
//! bytes at submit time. Batch-level provenance (`source_event`) and the
//! producer id apply to every entry in the batch; the current leadership
//! term is stamped automatically.
//!
//! ## Backpressure
//!
//! `try_write()` returns `Ok(Some(position))` of the **last** written entry
//! on success and `Ok(None)` when the write buffer is at capacity; the
//! latter is an expected signal, the batch stays intact so the caller can
//! retry later. Validation failures (missing key or value, an entry larger
//! than the configured maximum) are errors and nothing is persisted.
//!
//! ## Usage
//!
//! ```ignore
//! let mut batch = stream.new_batch_writer();
//! batch.source_event(2, 7541);
//! batch.entry().key(42).value(payload).done()?;
//! batch.entry().key_from_position().value(other).done()?;
//! match batch.try_write()? {
//!     Some(last_position) => { /* both entries submitted */ }
//!     None => { /* buffer full, retry later */ }
//! }
//! ```

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use loghouse_core::entry::{NO_PRODUCER_ID, NO_SOURCE_PARTITION};
use loghouse_core::{frame, LogEntry};

use crate::error::{Error, Result};
use crate::write_buffer::WriteBuffer;

/// Produces its encoded bytes on demand, at submit time.
pub trait BufferWriter {
    fn encoded_length(&self) -> usize;
    fn write_into(&self, buf: &mut BytesMut);
}

/// One entry under construction.
#[derive(Default)]
struct EntrySpec {
    key: Option<i64>,
    key_from_position: bool,
    metadata: Option<Bytes>,
    value: Option<Bytes>,
}

impl EntrySpec {
    fn validate(&self) -> Result<()> {
        if self.key.is_none() && !self.key_from_position {
            return Err(Error::MissingKey);
        }
        if let Some(key) = self.key {
            if key < 0 {
                return Err(Error::MissingKey);
            }
        }
        if self.value.is_none() {
            return Err(Error::MissingValue);
        }
        Ok(())
    }
}

/// Batch-level fields shared by every entry.
struct BatchContext {
    buffer: Arc<WriteBuffer>,
    term: Arc<AtomicI32>,
    max_frame_length: usize,

    source_partition_id: i32,
    source_position: i64,
    source_log_name: Option<Bytes>,
    producer_id: i32,
}

impl BatchContext {
    fn new(buffer: Arc<WriteBuffer>, term: Arc<AtomicI32>, max_frame_length: usize) -> Self {
        Self {
            buffer,
            term,
            max_frame_length,
            source_partition_id: NO_SOURCE_PARTITION,
            source_position: -1,
            source_log_name: None,
            producer_id: NO_PRODUCER_ID,
        }
    }

    fn reset(&mut self) {
        self.source_partition_id = NO_SOURCE_PARTITION;
        self.source_position = -1;
        self.source_log_name = None;
        self.producer_id = NO_PRODUCER_ID;
    }

    /// Validate, claim, encode and commit all specs as one atomic batch.
    fn submit(&self, specs: &[EntrySpec]) -> Result<Option<i64>> {
        if specs.is_empty() {
            return Err(Error::InvalidState {
                operation: "try_write",
                state: "empty batch".to_string(),
            });
        }

        let term = self.term.load(Ordering::Acquire);
        let mut entries = Vec::with_capacity(specs.len());
        let mut total_length = 0;

        for spec in specs {
            spec.validate()?;

            let entry = LogEntry {
                // Final position assigned at commit; key patched alongside
                // when key_from_position is set
                position: -1,
                raft_term: term,
                producer_id: self.producer_id,
                source_event_partition_id: self.source_partition_id,
                source_event_position: self.source_position,
                key: spec.key.unwrap_or(-1),
                source_log_name: self.source_log_name.clone(),
                metadata: spec.metadata.clone(),
                value: spec.value.clone().ok_or(Error::MissingValue)?,
            };

            let framed = frame::framed_length(frame::entry_payload_length(&entry));
            if framed > self.max_frame_length {
                return Err(Error::FrameTooLarge {
                    length: framed,
                    max: self.max_frame_length,
                });
            }
            total_length += framed;
            entries.push((entry, spec.key_from_position));
        }

        let Some(mut claim) = self.buffer.try_claim(total_length)? else {
            // At capacity: expected backpressure, retry later
            return Ok(None);
        };
        for (entry, key_from_position) in &entries {
            claim.append_entry(entry, *key_from_position);
        }
        Ok(Some(claim.commit()))
    }
}

fn range_of(buf: &[u8], offset: usize, length: usize) -> Bytes {
    Bytes::copy_from_slice(&buf[offset..offset + length])
}

fn produced(writer: &dyn BufferWriter) -> Bytes {
    let mut buf = BytesMut::with_capacity(writer.encoded_length());
    writer.write_into(&mut buf);
    buf.freeze()
}

// ---------------------------------------------------------------------------
// Batch writer
// ---------------------------------------------------------------------------

/// Builds and atomically appends a batch of entries.
pub struct BatchWriter {
    context: BatchContext,
    specs: Vec<EntrySpec>,
}

impl BatchWriter {
    pub fn new(buffer: Arc<WriteBuffer>, term: Arc<AtomicI32>, max_frame_length: usize) -> Self {
        Self {
            context: BatchContext::new(buffer, term, max_frame_length),
            specs: Vec::new(),
        }
    }

    /// Provenance pointer applied to every entry in the batch.
    pub fn source_event(&mut self, partition_id: i32, position: i64) -> &mut Self {
        self.context.source_partition_id = partition_id;
        self.context.source_position = position;
        self
    }

    /// Log name qualifying the provenance pointer.
    pub fn source_log_name(&mut self, name: impl Into<Bytes>) -> &mut Self {
        self.context.source_log_name = Some(name.into());
        self
    }

    /// Producer id applied to every entry in the batch.
    pub fn producer_id(&mut self, producer_id: i32) -> &mut Self {
        self.context.producer_id = producer_id;
        self
    }

    /// Start building the next entry of the batch.
    pub fn entry(&mut self) -> EntryBuilder<'_> {
        EntryBuilder {
            specs: &mut self.specs,
            spec: EntrySpec::default(),
        }
    }

    /// Number of entries staged in the batch.
    pub fn entry_count(&self) -> usize {
        self.specs.len()
    }

    /// Submit the staged entries as one atomic append.
    ///
    /// `Ok(Some(position))` is the position of the last entry; `Ok(None)`
    /// means the buffer is at capacity and the batch is kept for a retry.
    pub fn try_write(&mut self) -> Result<Option<i64>> {
        let result = self.context.submit(&self.specs)?;
        if result.is_some() {
            self.specs.clear();
            self.context.reset();
        }
        Ok(result)
    }
}

/// Builder for one entry of a batch; call [`EntryBuilder::done`] to stage it.
pub struct EntryBuilder<'a> {
    specs: &'a mut Vec<EntrySpec>,
    spec: EntrySpec,
}

impl EntryBuilder<'_> {
    pub fn key(mut self, key: i64) -> Self {
        self.spec.key = Some(key);
        self
    }

    /// Use the assigned position as the key.
    pub fn key_from_position(mut self) -> Self {
        self.spec.key_from_position = true;
        self
    }

    pub fn value(mut self, value: impl Into<Bytes>) -> Self {
        self.spec.value = Some(value.into());
        self
    }

    pub fn value_range(mut self, buf: &[u8], offset: usize, length: usize) -> Self {
        self.spec.value = Some(range_of(buf, offset, length));
        self
    }

    pub fn value_writer(mut self, writer: &dyn BufferWriter) -> Self {
        self.spec.value = Some(produced(writer));
        self
    }

    pub fn metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.spec.metadata = Some(metadata.into());
        self
    }

    pub fn metadata_range(mut self, buf: &[u8], offset: usize, length: usize) -> Self {
        self.spec.metadata = Some(range_of(buf, offset, length));
        self
    }

    pub fn metadata_writer(mut self, writer: &dyn BufferWriter) -> Self {
        self.spec.metadata = Some(produced(writer));
        self
    }

    /// Validate and stage the entry.
    pub fn done(self) -> Result<()> {
        self.spec.validate()?;
        self.specs.push(self.spec);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Single-entry writer
// ---------------------------------------------------------------------------

/// Builds and appends one entry at a time.
pub struct LogWriter {
    context: BatchContext,
    spec: EntrySpec,
}

impl LogWriter {
    pub fn new(buffer: Arc<WriteBuffer>, term: Arc<AtomicI32>, max_frame_length: usize) -> Self {
        Self {
            context: BatchContext::new(buffer, term, max_frame_length),
            spec: EntrySpec::default(),
        }
    }

    pub fn key(&mut self, key: i64) -> &mut Self {
        self.spec.key = Some(key);
        self
    }

    /// Use the assigned position as the key.
    pub fn key_from_position(&mut self) -> &mut Self {
        self.spec.key_from_position = true;
        self
    }

    pub fn value(&mut self, value: impl Into<Bytes>) -> &mut Self {
        self.spec.value = Some(value.into());
        self
    }

    pub fn value_range(&mut self, buf: &[u8], offset: usize, length: usize) -> &mut Self {
        self.spec.value = Some(range_of(buf, offset, length));
        self
    }

    pub fn value_writer(&mut self, writer: &dyn BufferWriter) -> &mut Self {
        self.spec.value = Some(produced(writer));
        self
    }

    pub fn metadata(&mut self, metadata: impl Into<Bytes>) -> &mut Self {
        self.spec.metadata = Some(metadata.into());
        self
    }

    pub fn metadata_range(&mut self, buf: &[u8], offset: usize, length: usize) -> &mut Self {
        self.spec.metadata = Some(range_of(buf, offset, length));
        self
    }

    pub fn metadata_writer(&mut self, writer: &dyn BufferWriter) -> &mut Self {
        self.spec.metadata = Some(produced(writer));
        self
    }

    pub fn source_event(&mut self, partition_id: i32, position: i64) -> &mut Self {
        self.context.source_partition_id = partition_id;
        self.context.source_position = position;
        self
    }

    pub fn source_log_name(&mut self, name: impl Into<Bytes>) -> &mut Self {
        self.context.source_log_name = Some(name.into());
        self
    }

    pub fn producer_id(&mut self, producer_id: i32) -> &mut Self {
        self.context.producer_id = producer_id;
        self
    }

    /// Submit the entry.
    ///
    /// `Ok(Some(position))` on success; `Ok(None)` when the buffer is at
    /// capacity (the entry is kept for a retry).
    pub fn try_write(&mut self) -> Result<Option<i64>> {
        let spec = std::mem::take(&mut self.spec);
        let result = self.context.submit(std::slice::from_ref(&spec))?;
        if result.is_none() {
            // Keep the entry for the retry
            self.spec = spec;
        } else {
            self.context.reset();
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loghouse_core::frame::FrameType;

    fn term(value: i32) -> Arc<AtomicI32> {
        Arc::new(AtomicI32::new(value))
    }

    fn decode_all(buffer: &WriteBuffer) -> Vec<LogEntry> {
        let mut out = Vec::new();
        while let Some(block) = buffer.take_block(usize::MAX) {
            let mut off = 0;
            while let Some(f) = frame::decode_frame(&block.data[off..]).unwrap() {
                if f.frame_type == FrameType::Message {
                    out.push(frame::decode_entry(f.payload).unwrap());
                }
                off += f.framed_length;
            }
        }
        out
    }

    #[test]
    fn test_single_writer_roundtrip() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut writer = LogWriter::new(buffer.clone(), term(3), 4096);

        let position = writer
            .key(2)
            .value(Bytes::from_static(b"event"))
            .try_write()
            .unwrap();
        assert_eq!(position, Some(1));

        let entries = decode_all(&buffer);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].position, 1);
        assert_eq!(entries[0].key, 2);
        assert_eq!(entries[0].raft_term, 3);
        assert_eq!(entries[0].value, Bytes::from_static(b"event"));
        assert!(entries[0].metadata.is_none());
    }

    #[test]
    fn test_missing_key_rejected() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut writer = LogWriter::new(buffer.clone(), term(0), 4096);

        writer.value(Bytes::from_static(b"v"));
        assert!(matches!(writer.try_write(), Err(Error::MissingKey)));
        assert!(decode_all(&buffer).is_empty());
    }

    #[test]
    fn test_missing_value_rejected() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut writer = LogWriter::new(buffer.clone(), term(0), 4096);

        writer.key(1);
        assert!(matches!(writer.try_write(), Err(Error::MissingValue)));
        assert!(decode_all(&buffer).is_empty());
    }

    #[test]
    fn test_negative_key_rejected() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut writer = LogWriter::new(buffer, term(0), 4096);
        writer.key(-5).value(Bytes::from_static(b"v"));
        assert!(matches!(writer.try_write(), Err(Error::MissingKey)));
    }

    #[test]
    fn test_key_from_position() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut writer = LogWriter::new(buffer.clone(), term(0), 4096);

        writer
            .key_from_position()
            .value(Bytes::from_static(b"a"))
            .try_write()
            .unwrap();
        writer
            .key_from_position()
            .value(Bytes::from_static(b"b"))
            .try_write()
            .unwrap();

        let entries = decode_all(&buffer);
        assert_eq!(entries[0].key, 1);
        assert_eq!(entries[1].key, 2);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut writer = LogWriter::new(buffer.clone(), term(0), 128);

        writer.key(1).value(Bytes::from(vec![0u8; 256]));
        assert!(matches!(
            writer.try_write(),
            Err(Error::FrameTooLarge { .. })
        ));
        assert!(decode_all(&buffer).is_empty());
    }

    #[test]
    fn test_backpressure_keeps_entry_for_retry() {
        let buffer = WriteBuffer::new(128, 128);
        // Fill the buffer so the next claim cannot fit
        let blocker = buffer.try_claim(100).unwrap().unwrap();

        let mut writer = LogWriter::new(buffer.clone(), term(0), 128);
        writer.key(1).value(Bytes::from_static(b"payload"));
        assert_eq!(writer.try_write().unwrap(), None);

        // Once capacity frees up, the same staged entry goes through
        blocker.abort();
        assert_eq!(writer.try_write().unwrap(), Some(1));
    }

    #[test]
    fn test_batch_writer_atomic_append() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut batch = BatchWriter::new(buffer.clone(), term(7), 4096);

        batch.source_event(2, 15).producer_id(9);
        batch
            .entry()
            .key(100)
            .value(Bytes::from_static(b"a"))
            .done()
            .unwrap();
        batch
            .entry()
            .key_from_position()
            .value(Bytes::from_static(b"b"))
            .metadata(Bytes::from_static(b"md"))
            .done()
            .unwrap();

        // The last entry's position is returned
        assert_eq!(batch.try_write().unwrap(), Some(2));
        assert_eq!(batch.entry_count(), 0);

        let entries = decode_all(&buffer);
        assert_eq!(entries.len(), 2);

        // Batch-level fields are applied to every entry
        for e in &entries {
            assert_eq!(e.source_event_partition_id, 2);
            assert_eq!(e.source_event_position, 15);
            assert_eq!(e.producer_id, 9);
            assert_eq!(e.raft_term, 7);
        }
        assert_eq!(entries[0].key, 100);
        assert_eq!(entries[1].key, 2);
        assert_eq!(entries[1].metadata.as_deref(), Some(b"md".as_slice()));
    }

    #[test]
    fn test_batch_entry_validation_in_done() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut batch = BatchWriter::new(buffer, term(0), 4096);

        assert!(matches!(
            batch.entry().value(Bytes::from_static(b"v")).done(),
            Err(Error::MissingKey)
        ));
        assert!(matches!(
            batch.entry().key(1).done(),
            Err(Error::MissingValue)
        ));
        assert_eq!(batch.entry_count(), 0);
    }

    #[test]
    fn test_empty_batch_is_misuse() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut batch = BatchWriter::new(buffer, term(0), 4096);
        assert!(matches!(
            batch.try_write(),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn test_value_range_and_writer_forms() {
        struct Doubler(Vec<u8>);
        impl BufferWriter for Doubler {
            fn encoded_length(&self) -> usize {
                self.0.len() * 2
            }
            fn write_into(&self, buf: &mut BytesMut) {
                buf.extend_from_slice(&self.0);
                buf.extend_from_slice(&self.0);
            }
        }

        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut writer = LogWriter::new(buffer.clone(), term(0), 4096);

        let backing = b"xxhelloxx";
        writer
            .key(1)
            .value_range(backing, 2, 5)
            .try_write()
            .unwrap();

        writer
            .key(2)
            .value_writer(&Doubler(b"ab".to_vec()))
            .metadata_range(backing, 0, 2)
            .try_write()
            .unwrap();

        let entries = decode_all(&buffer);
        assert_eq!(entries[0].value, Bytes::from_static(b"hello"));
        assert_eq!(entries[1].value, Bytes::from_static(b"abab"));
        assert_eq!(entries[1].metadata.as_deref(), Some(b"xx".as_slice()));
    }

    #[test]
    fn test_source_log_name_trailer() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        let mut writer = LogWriter::new(buffer.clone(), term(0), 4096);

        writer
            .key(1)
            .value(Bytes::from_static(b"v"))
            .source_event(4, 99)
            .source_log_name(Bytes::from_static(b"upstream-2"));
        assert_eq!(writer.try_write().unwrap(), Some(1));

        let entries = decode_all(&buffer);
        assert_eq!(
            entries[0].source_log_name.as_deref(),
            Some(b"upstream-2".as_slice())
        );
        assert_eq!(entries[0].source_event_partition_id, 4);
        assert_eq!(entries[0].source_event_position, 99);
    }

    #[test]
    fn test_failed_buffer_propagates_to_writer() {
        let buffer = WriteBuffer::new(64 * 1024, 16 * 1024);
        buffer.mark_failed();

        let mut writer = LogWriter::new(buffer, term(0), 4096);
        writer.key(1).value(Bytes::from_static(b"v"));
        assert!(matches!(
            writer.try_write(),
            Err(Error::WriteBufferFailed)
        ));
    }
}
