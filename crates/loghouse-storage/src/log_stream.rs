//! Log Stream Facade
//!
//! Assembles one partition log and owns its lifecycle.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────┐   claim/commit   ┌──────────────┐   do_work    ┌────────────┐
//! │  Writers   │ ───────────────▶ │ WriteBuffer  │ ───────────▶ │  Appender  │
//! └────────────┘                  └──────────────┘              └─────┬──────┘
//!                                                                     │ append
//!                    commit watermark (replication layer)             ▼
//! ┌────────────┐   floor lookup   ┌──────────────┐   scan      ┌────────────┐
//! │  Readers   │ ◀─────────────── │  BlockIndex  │ ◀────────── │ FsStorage  │
//! └────────────┘                  └──────▲───────┘             └────────────┘
//!                                        │ add_block / snapshot
//!                                 ┌──────┴───────┐
//!                                 │  Controller  │
//!                                 └──────────────┘
//! ```
//!
//! `open()` builds the storage, index, and snapshot store, then spawns the
//! appender and index controller as command-drained actor tasks. The handle
//! exposes reader/writer factories, the commit watermark and term feeds, and
//! the maintenance surface: `truncate`, retention `delete`, and an
//! idempotent `close` that drains the appender and snapshots the index.
//!
//! All components synchronize only through the storage backend and the
//! shared commit watermark; the replication layer advances the watermark and
//! the term, this subsystem only reads them.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use loghouse_core::CommitPosition;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::appender::{AppenderCommand, LogAppender};
use crate::block_index::LogBlockIndex;
use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::index_controller::{ControllerCommand, LogBlockIndexController, Recovery};
use crate::reader::{LogReader, ReadMode, ReaderSource};
use crate::snapshot::SnapshotStore;
use crate::storage::{FsLogStorage, LogStorage};
use crate::write_buffer::WriteBuffer;
use crate::writer::{BatchWriter, LogWriter};

/// Supplies the minimum position guaranteed already durably exported.
///
/// Retention deletion never proceeds without one.
pub trait ExportedPositionSupplier: Send + Sync {
    fn exported_position(&self) -> i64;
}

impl<F> ExportedPositionSupplier for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn exported_position(&self) -> i64 {
        self()
    }
}

/// One open partition log.
pub struct LogStream {
    config: LogConfig,
    storage: Arc<FsLogStorage>,
    index: Arc<LogBlockIndex>,
    snapshots: Arc<SnapshotStore>,
    commit: CommitPosition,
    term: Arc<AtomicI32>,
    write_buffer: Arc<WriteBuffer>,

    appender_tx: mpsc::Sender<AppenderCommand>,
    controller_tx: mpsc::Sender<ControllerCommand>,
    appender_position: Arc<AtomicI64>,
    exported: Option<Arc<dyn ExportedPositionSupplier>>,

    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl LogStream {
    /// Open the log: recover storage and index, spawn the actors.
    pub async fn open(config: LogConfig) -> Result<Self> {
        validate(&config)?;

        let storage = Arc::new(FsLogStorage::open(
            &config.root,
            &config.name,
            config.segment_size,
        )?);
        let index = Arc::new(LogBlockIndex::new(config.index_capacity));
        let snapshots = Arc::new(SnapshotStore::open(&config.root)?);
        let commit = CommitPosition::new();
        let term = Arc::new(AtomicI32::new(config.initial_term));

        let write_buffer = WriteBuffer::new(
            config.write_buffer_capacity,
            config.max_append_block_size,
        );

        let appender = LogAppender::new(
            config.name.clone(),
            storage.clone() as Arc<dyn LogStorage>,
            write_buffer.clone(),
            config.max_append_block_size,
        );
        let appender_position = appender.position_handle();
        let (appender_tx, appender_rx) = mpsc::channel(16);

        let controller = LogBlockIndexController::new(
            &config,
            storage.clone() as Arc<dyn LogStorage>,
            index.clone(),
            snapshots.clone(),
            commit.clone(),
        );
        let (controller_tx, controller_rx) = mpsc::channel(16);

        let tasks = vec![
            tokio::spawn(appender.run(appender_rx)),
            tokio::spawn(controller.run(controller_rx)),
        ];

        let stream = Self {
            config,
            storage,
            index,
            snapshots,
            commit,
            term,
            write_buffer,
            appender_tx,
            controller_tx,
            appender_position,
            exported: None,
            tasks,
            closed: false,
        };

        let recovery = stream.open_controller().await?;
        info!(
            log = %stream.config.name,
            recovery = ?recovery,
            "log stream opened"
        );

        Ok(stream)
    }

    async fn open_controller(&self) -> Result<Recovery> {
        let (ack, response) = oneshot::channel();
        self.controller_tx
            .send(ControllerCommand::Open(ack))
            .await
            .map_err(|_| Error::Closed("index controller"))?;
        response.await.map_err(|_| Error::Closed("index controller"))?
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Install the export watermark callback used by retention deletion.
    pub fn set_exported_position_supplier(
        &mut self,
        supplier: Arc<dyn ExportedPositionSupplier>,
    ) {
        self.exported = Some(supplier);
    }

    // -- watermarks ---------------------------------------------------------

    pub fn commit_position(&self) -> i64 {
        self.commit.get()
    }

    /// Advance the commit watermark (fed by the replication layer).
    pub fn advance_commit_position(&self, position: i64) {
        self.commit.advance(position);
    }

    pub fn current_term(&self) -> i32 {
        self.term.load(Ordering::Acquire)
    }

    pub fn set_term(&self, term: i32) {
        self.term.store(term, Ordering::Release);
    }

    /// Position of the most recently appended entry (observability).
    pub fn current_appender_position(&self) -> i64 {
        self.appender_position.load(Ordering::Acquire)
    }

    /// The shared block index (readers hold it through their source).
    pub fn block_index(&self) -> Arc<LogBlockIndex> {
        self.index.clone()
    }

    // -- readers and writers ------------------------------------------------

    pub fn reader_source(&self) -> ReaderSource {
        ReaderSource {
            storage: self.storage.clone() as Arc<dyn LogStorage>,
            index: self.index.clone(),
            commit: self.commit.clone(),
        }
    }

    /// A reader already wrapped at the start of the log.
    pub fn new_reader(&self, mode: ReadMode) -> Result<LogReader> {
        let mut reader = LogReader::new(
            mode,
            self.config.read_buffer_size,
            self.config.max_read_buffer_size,
        );
        reader.wrap(self.reader_source())?;
        Ok(reader)
    }

    pub fn new_writer(&self) -> LogWriter {
        LogWriter::new(
            self.write_buffer.clone(),
            self.term.clone(),
            self.config.max_frame_length,
        )
    }

    pub fn new_batch_writer(&self) -> BatchWriter {
        BatchWriter::new(
            self.write_buffer.clone(),
            self.term.clone(),
            self.config.max_frame_length,
        )
    }

    // -- maintenance --------------------------------------------------------

    /// Remove all entries at or after `position`.
    ///
    /// Fails when the position is already committed or the controller cannot
    /// serve the request in its current state.
    pub async fn truncate(&self, position: i64) -> Result<()> {
        let (ack, response) = oneshot::channel();
        self.controller_tx
            .send(ControllerCommand::Truncate { position, ack })
            .await
            .map_err(|_| Error::Closed("index controller"))?;
        response.await.map_err(|_| Error::Closed("index controller"))?
    }

    /// Retention: remove segments wholly superseded by both `position` and
    /// the exported watermark. Returns the number of removed segments.
    ///
    /// A negative position or an absent exported-position supplier makes
    /// this a no-op; a segment containing an entry not yet exported is never
    /// deleted.
    pub fn delete(&self, position: i64) -> Result<usize> {
        if position < 0 {
            return Ok(0);
        }
        let Some(supplier) = &self.exported else {
            return Ok(0);
        };
        let exported = supplier.exported_position();
        if exported < 0 {
            return Ok(0);
        }

        let target = position.min(exported);
        let Some(address) = self.index.lookup_block_address(target) else {
            // Without an applicable index entry there is no safe boundary
            return Ok(0);
        };
        self.storage.delete_until(address)
    }

    /// Drain the appender, snapshot the index, stop both actors.
    ///
    /// Idempotent; optionally removes all on-disk state when
    /// `delete_on_close` is configured.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let (ack, response) = oneshot::channel();
        if self
            .appender_tx
            .send(AppenderCommand::Close(ack))
            .await
            .is_ok()
        {
            let _ = response.await;
        }

        let (ack, response) = oneshot::channel();
        if self
            .controller_tx
            .send(ControllerCommand::Close(ack))
            .await
            .is_ok()
        {
            if let Ok(result) = response.await {
                result?;
            }
        }

        for task in self.tasks.drain(..) {
            // The runners exit after their close command; a panicked task is
            // reported but must not wedge the close
            if let Err(e) = task.await {
                warn!(log = %self.config.name, error = %e, "actor task failed");
            }
        }

        if self.config.delete_on_close {
            self.snapshots.remove(&self.config.name)?;
            std::fs::remove_dir_all(self.storage.directory())?;
            info!(log = %self.config.name, "log stream closed and deleted");
        } else {
            info!(log = %self.config.name, "log stream closed");
        }

        Ok(())
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        // Dropping the command senders ends both runner loops; an explicit
        // close() is still required for the final drain and snapshot
        if !self.closed {
            warn!(log = %self.config.name, "log stream dropped without close()");
        }
    }
}

fn validate(config: &LogConfig) -> Result<()> {
    let data_capacity = config
        .segment_size
        .saturating_sub(crate::storage::SEGMENT_HEADER_LENGTH);
    if config.max_append_block_size > data_capacity {
        return Err(config_error(format!(
            "max_append_block_size {} exceeds segment data capacity {}",
            config.max_append_block_size, data_capacity
        )));
    }
    if config.max_frame_length > config.max_append_block_size {
        return Err(config_error(format!(
            "max_frame_length {} exceeds max_append_block_size {}",
            config.max_frame_length, config.max_append_block_size
        )));
    }
    if config.max_read_buffer_size < config.max_frame_length {
        return Err(config_error(format!(
            "max_read_buffer_size {} cannot hold a maximum frame of {}",
            config.max_read_buffer_size, config.max_frame_length
        )));
    }
    if config.index_density <= 0.0 || config.index_density > 1.0 {
        return Err(config_error(format!(
            "index_density {} outside (0.0, 1.0]",
            config.index_density
        )));
    }
    Ok(())
}

fn config_error(message: String) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        message,
    ))
}
