//! Loghouse Storage Engine
//!
//! This crate implements the append-only partition log: the component that
//! durably persists an ordered sequence of binary log entries and serves
//! commit-gated, seekable reads over them.
//!
//! ## What Does the Storage Engine Do?
//!
//! 1. **Appending**: Writers claim space in an in-memory buffer, the
//!    appender drains committed batches into fixed-size segment files
//! 2. **Indexing**: A controller scans written blocks and maintains a sparse
//!    position-to-address index for fast seeks
//! 3. **Reading**: Buffered readers replay entries sequentially, gated by
//!    the replication layer's commit watermark
//! 4. **Recovery**: Index snapshots bound restart time; torn segment tails
//!    are clipped without losing committed data
//! 5. **Maintenance**: Truncation discards uncommitted tails, retention
//!    deletion drops fully exported segments
//!
//! ## Data Flow
//!
//! ```text
//! ┌────────────┐
//! │  Writers   │  key/value/metadata builders
//! └─────┬──────┘
//!       │ claim + commit (positions assigned here)
//!       ▼
//! ┌────────────┐        ┌───────────────┐
//! │ WriteBuffer│ ─────▶ │  LogAppender  │
//! └────────────┘        └──────┬────────┘
//!                              │ append(block)
//!                              ▼
//!                       ┌──────────────┐     scan      ┌─────────────────┐
//!                       │ FsLogStorage │ ◀──────────── │ IndexController │
//!                       │  (segments)  │               │  + snapshots    │
//!                       └──────┬───────┘               └────────┬────────┘
//!                              │ read (whole frames)            │ add_block
//!                              ▼                                ▼
//!                       ┌────────────┐  floor lookup   ┌───────────────┐
//!                       │ LogReader  │ ◀────────────── │ LogBlockIndex │
//!                       └────────────┘                 └───────────────┘
//! ```
//!
//! ## Main Entry Point
//!
//! [`LogStream::open`] assembles everything and returns the handle used to
//! create readers and writers and to drive lifecycle:
//!
//! ```ignore
//! use loghouse_storage::{LogConfig, LogStream, ReadMode};
//!
//! let mut stream = LogStream::open(LogConfig::new("orders-0", "/var/lib/loghouse")).await?;
//!
//! let mut writer = stream.new_writer();
//! writer.key(42).value(payload);
//! let position = writer.try_write()?;
//!
//! // The replication layer commits positions...
//! stream.advance_commit_position(position.unwrap());
//!
//! let mut reader = stream.new_reader(ReadMode::Committed)?;
//! while reader.has_next()? {
//!     let entry = reader.next()?;
//!     println!("{}: {:?}", entry.position, entry.value);
//! }
//!
//! stream.close().await?;
//! ```
//!
//! ## Design Decisions
//!
//! ### Why a sparse block index instead of a per-entry index?
//! - One `(position, address)` sample per block keeps the index tiny
//! - Lookups are a floor binary search plus a short forward scan
//! - Entries are append-only and strictly ordered, so a sorted array beats
//!   any tree
//!
//! ### Why commit-time position assignment?
//! - Multiple producers claim concurrently, but positions must be strictly
//!   increasing in append order; assigning under the commit lock makes
//!   commit order the append order
//!
//! ### Why actors with a synchronous `do_work()`?
//! - The appender and index controller are cooperative state machines
//!   advanced one bounded step at a time; tests drive them deterministically
//!   while the runtime drives them through command-drained runner loops

pub mod appender;
pub mod block_index;
pub mod config;
pub mod error;
pub mod index_controller;
pub mod log_stream;
pub mod reader;
pub mod snapshot;
pub mod storage;
pub mod write_buffer;
pub mod writer;

pub use block_index::{BlockIndexEntry, LogBlockIndex};
pub use config::LogConfig;
pub use error::{Error, Result};
pub use index_controller::{ControllerState, LogBlockIndexController, Recovery};
pub use log_stream::{ExportedPositionSupplier, LogStream};
pub use reader::{LogReader, ReadMode, ReaderSource};
pub use snapshot::SnapshotStore;
pub use storage::{FsLogStorage, LogStorage, Processed, ReadOutcome, ReadProcessor};
pub use write_buffer::WriteBuffer;
pub use writer::{BatchWriter, BufferWriter, LogWriter};
