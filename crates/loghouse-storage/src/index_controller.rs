//! Block Index Controller
//!
//! Cooperative state machine that scans newly written storage blocks and
//! maintains the block index and its snapshots.
//!
//! ## State Machine
//!
//! ```text
//!          open()                    block indexed
//! closed ─────────▶ opening ─▶ open ◀──────────────▶ create
//!                                │  ▲                   │
//!                     snapshot   │  │    truncate()     │
//!                     policy ────▶ snapshotting         │
//!                                │  ▲                   │
//!                                └──┴─── truncating ◀───┘
//!          close()
//! open ─────────▶ closing ─▶ closed
//! ```
//!
//! - **opening**: seed the index from the latest snapshot and resume
//!   scanning from the block containing the snapshot position, or rescan
//!   from the backend's first block address. Snapshot-apply failures fall
//!   back to a rescan instead of failing the open.
//! - **open/create**: read the next block-sized chunk. A block is indexed
//!   once it is full enough (`density * block_size` bytes read) *and* every
//!   complete entry in it is committed; otherwise the controller stays in
//!   `create` and re-checks on the next tick. Uncommitted data is never
//!   indexed.
//! - **snapshotting**: when the snapshot policy fires (interval elapsed and
//!   new blocks indexed), serialize the index through the snapshot store; a
//!   failed write keeps the previous snapshot and the in-memory index
//!   untouched.
//! - **truncating**: only reachable from open/create; resolves the exact
//!   frame address of the first entry at or above the target position,
//!   truncates storage and the index tail, and resets the scan address.
//!
//! ## Scheduling
//!
//! `do_work()` advances one bounded step and never blocks beyond short file
//! operations, so tests drive the machine deterministically. The async
//! runner drains queued commands (open/close/truncate) between ticks and
//! sleeps for the configured retry interval when a tick makes no progress.
//!
//! ## Failure Policy
//!
//! Read errors are transient (retried next tick). A full block index or a
//! frame larger than the maximum scan buffer is a hard stop: the controller
//! logs the error and stops making progress until an operator intervenes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use loghouse_core::frame::{self, FrameType};
use loghouse_core::CommitPosition;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::block_index::LogBlockIndex;
use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::snapshot::SnapshotStore;
use crate::storage::{LogStorage, Processed, ReadOutcome, ReadProcessor};

/// States of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Closed,
    Opening,
    Open,
    Create,
    Snapshotting,
    Truncating,
    Closing,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControllerState::Closed => "closed",
            ControllerState::Opening => "opening",
            ControllerState::Open => "open",
            ControllerState::Create => "create",
            ControllerState::Snapshotting => "snapshotting",
            ControllerState::Truncating => "truncating",
            ControllerState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// How the index was rebuilt on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Seeded from a snapshot taken at this position.
    Recovered(i64),
    /// No usable snapshot; scanning from the first block address.
    Rescanned,
    /// The controller was already open; nothing happened.
    AlreadyOpen,
}

/// Commands handled by the controller runner between ticks.
pub enum ControllerCommand {
    Open(oneshot::Sender<Result<Recovery>>),
    Close(oneshot::Sender<Result<()>>),
    Truncate {
        position: i64,
        ack: oneshot::Sender<Result<()>>,
    },
}

/// Read processor that consumes only complete, committed frames and applies
/// the block density threshold.
///
/// This is the default in-block policy: a read that is not full enough
/// (`min_block_length`) or that contains an uncommitted entry is deferred
/// rather than half-indexed.
struct CommittedBlockProcessor {
    commit_position: i64,
    buffer_capacity: usize,
    min_block_length: usize,

    /// Position and block-relative offset of the first entry frame
    first_position: Option<i64>,
    first_offset: Option<usize>,
    /// Position of the last consumed entry frame
    last_position: Option<i64>,
    /// A consumed padding frame marks the end of a sealed segment
    saw_padding: bool,
}

impl CommittedBlockProcessor {
    fn new(commit_position: i64, buffer_capacity: usize, min_block_length: usize) -> Self {
        Self {
            commit_position,
            buffer_capacity,
            min_block_length,
            first_position: None,
            first_offset: None,
            last_position: None,
            saw_padding: false,
        }
    }
}

impl ReadProcessor for CommittedBlockProcessor {
    fn process(&mut self, buf: &[u8]) -> Result<Processed> {
        let mut consumed = 0;

        while let Some(f) = frame::decode_frame(&buf[consumed..])? {
            match f.frame_type {
                FrameType::Message => {
                    let position = frame::entry_position(f.payload)?;
                    if position > self.commit_position {
                        // Never index uncommitted data; the whole block waits
                        return Ok(Processed::TryLater);
                    }
                    if self.first_position.is_none() {
                        self.first_position = Some(position);
                        self.first_offset = Some(consumed);
                    }
                    self.last_position = Some(position);
                }
                FrameType::Padding => self.saw_padding = true,
            }
            consumed += f.framed_length;
        }

        if consumed == 0 {
            // A single frame larger than the whole buffer needs a bigger
            // buffer; anything else is data still arriving
            return if buf.len() >= self.buffer_capacity {
                Ok(Processed::InsufficientCapacity)
            } else {
                Ok(Processed::TryLater)
            };
        }

        // Padding only ever terminates a sealed segment: no more bytes will
        // arrive for this block, so the density threshold does not apply
        if buf.len() < self.min_block_length && !self.saw_padding {
            // Block not full enough to index yet
            return Ok(Processed::TryLater);
        }

        Ok(Processed::Consumed(consumed))
    }
}

/// Scans storage blocks, extends the block index, and persists snapshots.
pub struct LogBlockIndexController {
    name: String,
    storage: Arc<dyn LogStorage>,
    index: Arc<LogBlockIndex>,
    snapshots: Arc<SnapshotStore>,
    commit: CommitPosition,

    block_size: usize,
    density: f32,
    snapshot_interval: Duration,
    retry_interval: Duration,
    max_scan_buffer: usize,

    state: ControllerState,
    next_address: Option<u64>,
    block_buffer: Vec<u8>,

    /// Highest committed position seen while scanning
    last_indexed_position: Option<i64>,
    last_snapshot_position: Option<i64>,
    last_snapshot_time: Instant,

    failed: bool,
}

impl LogBlockIndexController {
    pub fn new(
        config: &LogConfig,
        storage: Arc<dyn LogStorage>,
        index: Arc<LogBlockIndex>,
        snapshots: Arc<SnapshotStore>,
        commit: CommitPosition,
    ) -> Self {
        Self {
            name: config.name.clone(),
            storage,
            index,
            snapshots,
            commit,
            block_size: config.index_block_size,
            density: config.index_density,
            snapshot_interval: Duration::from_millis(config.snapshot_interval_ms),
            retry_interval: Duration::from_millis(config.controller_retry_interval_ms),
            max_scan_buffer: config.max_read_buffer_size.max(config.index_block_size),
            state: ControllerState::Closed,
            next_address: None,
            block_buffer: vec![0u8; config.index_block_size],
            last_indexed_position: None,
            last_snapshot_position: None,
            last_snapshot_time: Instant::now(),
            failed: false,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Recover the index and start scanning.
    ///
    /// Idempotent: opening an already open controller is a no-op.
    pub fn open(&mut self) -> Result<Recovery> {
        if self.state != ControllerState::Closed {
            return Ok(Recovery::AlreadyOpen);
        }
        self.state = ControllerState::Opening;

        let recovery = match self.snapshots.latest(&self.name) {
            Ok(Some(data)) => match self.index.recover_from_snapshot(&data) {
                Ok(snapshot_position) => {
                    self.last_snapshot_position = Some(snapshot_position);
                    self.last_indexed_position = self.index.last_position();
                    // Resume from the block containing the snapshot position
                    self.next_address = self
                        .index
                        .lookup_block_address(snapshot_position)
                        .or_else(|| self.storage.first_block_address());
                    info!(
                        log = %self.name,
                        position = snapshot_position,
                        entries = self.index.size(),
                        "index recovered from snapshot"
                    );
                    Recovery::Recovered(snapshot_position)
                }
                Err(e) => {
                    warn!(
                        log = %self.name,
                        error = %e,
                        "snapshot apply failed, falling back to full rescan"
                    );
                    self.index.reset();
                    self.rescan()
                }
            },
            Ok(None) => self.rescan(),
            Err(e) => {
                warn!(log = %self.name, error = %e, "snapshot load failed, rescanning");
                self.rescan()
            }
        };

        self.last_snapshot_time = Instant::now();
        self.state = ControllerState::Open;
        Ok(recovery)
    }

    fn rescan(&mut self) -> Recovery {
        self.next_address = self.storage.first_block_address();
        info!(log = %self.name, "rebuilding index by rescan");
        Recovery::Rescanned
    }

    /// Stop scanning; persists a final snapshot when new blocks were indexed.
    ///
    /// Idempotent: closing a closed controller is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ControllerState::Closed {
            return Ok(());
        }
        self.state = ControllerState::Closing;
        self.write_snapshot_if_newer();
        self.state = ControllerState::Closed;
        info!(log = %self.name, "index controller closed");
        Ok(())
    }

    /// Truncate storage and the index tail at `position`.
    ///
    /// Refused while the controller is neither open nor in create, when the
    /// position is negative, or when the position is already committed.
    pub fn truncate(&mut self, position: i64) -> Result<()> {
        if !matches!(self.state, ControllerState::Open | ControllerState::Create) {
            return Err(Error::InvalidState {
                operation: "truncate",
                state: self.state.to_string(),
            });
        }
        if position < 0 {
            return Err(Error::InvalidPosition(position));
        }
        let commit_position = self.commit.get();
        if position <= commit_position {
            return Err(Error::AlreadyCommitted {
                position,
                commit_position,
            });
        }

        self.state = ControllerState::Truncating;
        let result = self.truncate_from(position);
        self.state = ControllerState::Open;
        result
    }

    fn truncate_from(&mut self, position: i64) -> Result<()> {
        let start = self
            .index
            .lookup_block_address(position)
            .or_else(|| self.storage.first_block_address());

        let Some(start) = start else {
            return Ok(());
        };

        let truncate_address = self.find_entry_address(start, position)?;
        let Some(truncate_address) = truncate_address else {
            // No entry at or above the position exists; nothing to discard
            return Ok(());
        };

        self.storage.truncate(truncate_address)?;
        self.index.truncate(position);

        // Re-scan from the truncation point on the next cycle
        self.next_address = Some(match self.next_address {
            Some(next) => next.min(truncate_address),
            None => truncate_address,
        });

        info!(
            log = %self.name,
            position,
            address = format_args!("{:#x}", truncate_address),
            "log truncated"
        );
        Ok(())
    }

    /// Linear forward scan for the frame address of the first entry with a
    /// position at or above `position`.
    fn find_entry_address(&mut self, start: u64, position: i64) -> Result<Option<u64>> {
        let mut buf = vec![0u8; self.block_size];
        let mut addr = start;

        loop {
            match self.storage.read_into(&mut buf, addr)? {
                ReadOutcome::Advanced {
                    next_address,
                    length,
                } => {
                    let base = next_address - length as u64;
                    let mut offset = 0;
                    while let Some(f) = frame::decode_frame(&buf[offset..length])? {
                        if f.frame_type == FrameType::Message
                            && frame::entry_position(f.payload)? >= position
                        {
                            return Ok(Some(base + offset as u64));
                        }
                        offset += f.framed_length;
                    }
                    addr = next_address;
                }
                ReadOutcome::NoData => return Ok(None),
                ReadOutcome::InsufficientCapacity => {
                    if buf.len() >= self.max_scan_buffer {
                        return Err(Error::BufferCapacityExceeded {
                            required: buf.len() * 2,
                            max: self.max_scan_buffer,
                        });
                    }
                    let new_len = (buf.len() * 2).min(self.max_scan_buffer);
                    buf.resize(new_len, 0);
                }
                ReadOutcome::Deferred => return Ok(None),
            }
        }
    }

    /// Advance the state machine by one bounded step.
    ///
    /// Returns the amount of work performed (0 means idle; the runner backs
    /// off for the retry interval).
    pub fn do_work(&mut self) -> usize {
        if self.failed {
            return 0;
        }
        if !matches!(self.state, ControllerState::Open | ControllerState::Create) {
            return 0;
        }

        let Some(scan_address) = self.next_address else {
            self.next_address = self.storage.first_block_address();
            return 0;
        };

        let min_block_length = (self.density as f64 * self.block_size as f64) as usize;
        let mut processor = CommittedBlockProcessor::new(
            self.commit.get(),
            self.block_buffer.len(),
            min_block_length,
        );

        let outcome =
            self.storage
                .read_with_processor(&mut self.block_buffer, scan_address, &mut processor);

        match outcome {
            Ok(ReadOutcome::NoData) => {
                self.state = ControllerState::Open;
                0
            }
            Ok(ReadOutcome::Deferred) => {
                // Block not full enough or not yet committed; re-check later
                self.state = ControllerState::Create;
                0
            }
            Ok(ReadOutcome::InsufficientCapacity) => {
                if self.block_buffer.len() >= self.max_scan_buffer {
                    error!(
                        log = %self.name,
                        buffer = self.block_buffer.len(),
                        "frame exceeds maximum scan buffer, indexing halted"
                    );
                    self.failed = true;
                    return 0;
                }
                let new_len = (self.block_buffer.len() * 2).min(self.max_scan_buffer);
                self.block_buffer.resize(new_len, 0);
                1
            }
            Ok(ReadOutcome::Advanced {
                next_address,
                length,
            }) => {
                let base = next_address - length as u64;

                if let (Some(first_position), Some(first_offset)) =
                    (processor.first_position, processor.first_offset)
                {
                    let entry_address = base + first_offset as u64;
                    // Skip blocks already covered by a recovered snapshot
                    let already_indexed = self
                        .index
                        .last_position()
                        .is_some_and(|last| last >= first_position);
                    if !already_indexed {
                        if let Err(e) = self.index.add_block(first_position, entry_address) {
                            error!(log = %self.name, error = %e, "cannot extend block index");
                            self.failed = true;
                            return 0;
                        }
                        debug!(
                            log = %self.name,
                            position = first_position,
                            address = format_args!("{:#x}", entry_address),
                            "block indexed"
                        );
                    }
                }
                if let Some(last) = processor.last_position {
                    if self.last_indexed_position.map_or(true, |p| p < last) {
                        self.last_indexed_position = Some(last);
                    }
                }

                self.next_address = Some(next_address);
                self.state = ControllerState::Open;
                self.maybe_snapshot();
                1
            }
            Err(e) => {
                // Transient read errors retry on the next cycle; corruption
                // is fatal for this cycle and logged
                warn!(log = %self.name, error = %e, "block scan failed");
                0
            }
        }
    }

    fn maybe_snapshot(&mut self) {
        let Some(position) = self.last_indexed_position else {
            return;
        };
        if self
            .last_snapshot_position
            .is_some_and(|taken| taken >= position)
        {
            return;
        }
        if self.last_snapshot_time.elapsed() < self.snapshot_interval {
            return;
        }

        self.state = ControllerState::Snapshotting;
        self.write_snapshot_if_newer();
        self.last_snapshot_time = Instant::now();
        self.state = ControllerState::Open;
    }

    fn write_snapshot_if_newer(&mut self) {
        let Some(position) = self.last_indexed_position else {
            return;
        };
        if self
            .last_snapshot_position
            .is_some_and(|taken| taken >= position)
        {
            return;
        }

        let mut buf = BytesMut::new();
        self.index.write_snapshot(&mut buf, position);
        match self.snapshots.commit(&self.name, &buf) {
            Ok(()) => {
                self.last_snapshot_position = Some(position);
            }
            Err(e) => {
                // The in-memory index stays untouched; the previous snapshot
                // remains the recovery point
                warn!(log = %self.name, error = %e, "snapshot write failed");
            }
        }
    }

    /// Runner loop: drain commands between ticks, back off when idle.
    ///
    /// The loop ends after a close command or when all senders are dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ControllerCommand>) {
        info!(log = %self.name, "index controller started");
        'runner: loop {
            while let Ok(cmd) = commands.try_recv() {
                if !self.handle(cmd) {
                    break 'runner;
                }
            }

            if self.state == ControllerState::Closed {
                // Nothing to tick before the open command arrives
                match commands.recv().await {
                    Some(cmd) => {
                        if !self.handle(cmd) {
                            break;
                        }
                        continue;
                    }
                    None => break,
                }
            }

            if self.do_work() == 0 {
                tokio::select! {
                    cmd = commands.recv() => match cmd {
                        Some(cmd) => {
                            if !self.handle(cmd) {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep(self.retry_interval) => {}
                }
            }
        }
        info!(log = %self.name, "index controller stopped");
    }

    /// Returns false when the runner should exit.
    fn handle(&mut self, cmd: ControllerCommand) -> bool {
        match cmd {
            ControllerCommand::Open(ack) => {
                let _ = ack.send(self.open());
                true
            }
            ControllerCommand::Close(ack) => {
                let _ = ack.send(self.close());
                false
            }
            ControllerCommand::Truncate { position, ack } => {
                let _ = ack.send(self.truncate(position));
                true
            }
        }
    }
}
