//! Log Stream Configuration
//!
//! This module defines configuration for one partition log.
//!
//! ## LogConfig
//!
//! Controls segment sizing, index density, buffering, and snapshot cadence:
//!
//! - **name**: Log/partition identifier; also keys the snapshot store
//! - **root**: Root storage path; segments live under `<root>/<name>/`
//! - **segment_size**: Fixed size of each segment file (default: 64MB)
//! - **index_block_size**: How many bytes of frames one block index entry
//!   covers (default: 1MB)
//! - **index_density**: Deviation factor; a block is indexed once at least
//!   `index_density * index_block_size` bytes of committed frames have been
//!   read (default: 1.0, a full block)
//! - **index_capacity**: Fixed entry capacity of the block index
//! - **read_buffer_size** / **max_read_buffer_size**: Reader buffer initial
//!   capacity and hard growth cap
//! - **max_frame_length**: Largest single entry accepted at write time
//! - **write_buffer_capacity**: In-memory claim/commit buffer size
//! - **max_append_block_size**: Largest block the appender hands to storage
//!   in one append
//! - **snapshot_interval_ms**: Minimum time between index snapshots
//! - **controller_retry_interval_ms**: Idle tick cadence of the index
//!   controller (retry cadence for not-yet-committed blocks)
//! - **initial_term**: Leadership term stamped on entries until the
//!   replication layer updates it
//! - **delete_on_close**: Remove all on-disk state when the stream closes
//!
//! ## Usage
//!
//! ```ignore
//! use loghouse_storage::LogConfig;
//!
//! let config = LogConfig {
//!     name: "orders-0".to_string(),
//!     root: "/var/lib/loghouse".into(),
//!     segment_size: 16 * 1024 * 1024,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log/partition identifier
    pub name: String,

    /// Root storage path
    pub root: PathBuf,

    /// Fixed segment file size in bytes, including the segment header
    /// (default: 64MB)
    #[serde(default = "default_segment_size")]
    pub segment_size: usize,

    /// Bytes of frames covered by one block index entry (default: 1MB)
    #[serde(default = "default_index_block_size")]
    pub index_block_size: usize,

    /// Fraction of a block that must be filled with committed frames before
    /// it is indexed (default: 1.0)
    #[serde(default = "default_index_density")]
    pub index_density: f32,

    /// Fixed entry capacity of the block index (default: 100_000)
    #[serde(default = "default_index_capacity")]
    pub index_capacity: usize,

    /// Initial reader buffer capacity (default: 4KB)
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Hard cap on reader buffer growth (default: 16MB)
    #[serde(default = "default_max_read_buffer_size")]
    pub max_read_buffer_size: usize,

    /// Largest single entry frame accepted at write time (default: 4MB)
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,

    /// Capacity of the in-memory write buffer (default: 8MB)
    #[serde(default = "default_write_buffer_capacity")]
    pub write_buffer_capacity: usize,

    /// Largest block handed to the storage backend in one append
    /// (default: 4MB)
    #[serde(default = "default_max_append_block_size")]
    pub max_append_block_size: usize,

    /// Minimum milliseconds between index snapshots (default: 60s)
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    /// Idle tick cadence of the index controller in milliseconds
    /// (default: 100ms)
    #[serde(default = "default_controller_retry_interval_ms")]
    pub controller_retry_interval_ms: u64,

    /// Term stamped on entries until the replication layer updates it
    #[serde(default)]
    pub initial_term: i32,

    /// Remove all on-disk state when the stream closes (default: false)
    #[serde(default)]
    pub delete_on_close: bool,
}

impl LogConfig {
    /// Convenience constructor with defaults for everything but identity.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            ..Default::default()
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            root: PathBuf::from("./data/loghouse"),
            segment_size: default_segment_size(),
            index_block_size: default_index_block_size(),
            index_density: default_index_density(),
            index_capacity: default_index_capacity(),
            read_buffer_size: default_read_buffer_size(),
            max_read_buffer_size: default_max_read_buffer_size(),
            max_frame_length: default_max_frame_length(),
            write_buffer_capacity: default_write_buffer_capacity(),
            max_append_block_size: default_max_append_block_size(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            controller_retry_interval_ms: default_controller_retry_interval_ms(),
            initial_term: 0,
            delete_on_close: false,
        }
    }
}

fn default_segment_size() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_index_block_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_index_density() -> f32 {
    1.0 // full block
}

fn default_index_capacity() -> usize {
    100_000
}

fn default_read_buffer_size() -> usize {
    4 * 1024 // 4KB
}

fn default_max_read_buffer_size() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_max_frame_length() -> usize {
    4 * 1024 * 1024 // 4MB
}

fn default_write_buffer_capacity() -> usize {
    8 * 1024 * 1024 // 8MB
}

fn default_max_append_block_size() -> usize {
    4 * 1024 * 1024 // 4MB
}

fn default_snapshot_interval_ms() -> u64 {
    60_000 // 1 minute
}

fn default_controller_retry_interval_ms() -> u64 {
    100
}
