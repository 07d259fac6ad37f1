//! Log Appender
//!
//! Cooperative actor that drains committed batches from the write buffer and
//! persists them through the storage backend.
//!
//! ```text
//! [WriteBuffer] ──take_block──▶ LogAppender ──append──▶ [LogStorage]
//! ```
//!
//! One `do_work()` call moves at most one block; the async runner keeps
//! ticking while work is available and otherwise parks on the buffer's
//! data-ready signal. A failed append marks both the appender and the write
//! buffer failed so producers observe the failure through backpressure;
//! there is no automatic retry.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use loghouse_core::INVALID_POSITION;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::storage::LogStorage;
use crate::write_buffer::WriteBuffer;

/// Commands handled by the appender runner between ticks.
pub enum AppenderCommand {
    /// Drain what is already committed, then stop.
    Close(oneshot::Sender<()>),
}

/// Drains the write buffer into the storage backend.
pub struct LogAppender {
    name: String,
    storage: Arc<dyn LogStorage>,
    buffer: Arc<WriteBuffer>,
    max_append_block_size: usize,

    /// Position of the most recently appended entry (observability)
    appender_position: Arc<AtomicI64>,

    /// Address of the most recently appended block (observability)
    appender_address: Arc<AtomicU64>,

    failed: bool,
}

impl LogAppender {
    pub fn new(
        name: impl Into<String>,
        storage: Arc<dyn LogStorage>,
        buffer: Arc<WriteBuffer>,
        max_append_block_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            storage,
            buffer,
            max_append_block_size,
            appender_position: Arc::new(AtomicI64::new(INVALID_POSITION)),
            appender_address: Arc::new(AtomicU64::new(0)),
            failed: false,
        }
    }

    /// Shared handle to the last appended position, readable after the
    /// appender moved into its runner task.
    pub fn position_handle(&self) -> Arc<AtomicI64> {
        self.appender_position.clone()
    }

    /// Position of the most recently appended entry.
    pub fn current_appender_position(&self) -> i64 {
        self.appender_position.load(Ordering::Acquire)
    }

    /// Address of the most recently appended block.
    pub fn current_appender_address(&self) -> u64 {
        self.appender_address.load(Ordering::Acquire)
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Append at most one block; returns the number of blocks appended.
    pub fn do_work(&mut self) -> usize {
        if self.failed {
            return 0;
        }

        let Some(block) = self.buffer.take_block(self.max_append_block_size) else {
            return 0;
        };

        match self.storage.append(&block.data) {
            Ok(address) => {
                self.appender_address.store(address, Ordering::Release);
                self.appender_position
                    .store(block.last_position, Ordering::Release);
                debug!(
                    log = %self.name,
                    position = block.last_position,
                    address = format_args!("{:#x}", address),
                    bytes = block.data.len(),
                    "block appended"
                );
                1
            }
            Err(e) => {
                // The block is lost from the buffer's perspective; producers
                // must observe the failure rather than silently diverge
                error!(log = %self.name, error = %e, "append failed, marking appender failed");
                self.failed = true;
                self.buffer.mark_failed();
                0
            }
        }
    }

    /// Runner loop: tick while work is available, park on the buffer's
    /// data-ready signal otherwise, drain on close.
    pub async fn run(mut self, mut commands: mpsc::Receiver<AppenderCommand>) {
        info!(log = %self.name, "appender started");
        loop {
            while self.do_work() > 0 {}

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(AppenderCommand::Close(ack)) => {
                        while self.do_work() > 0 {}
                        let _ = ack.send(());
                        break;
                    }
                    None => break,
                },
                _ = self.buffer.data_ready() => {}
            }
        }
        info!(log = %self.name, "appender stopped");
    }
}
