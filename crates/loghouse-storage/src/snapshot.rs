//! Snapshot Store
//!
//! Side channel that persists the latest serialized block index per log,
//! independent of the segment files. Only the most recent snapshot matters:
//! it bounds recovery time, it is not needed for correctness (the controller
//! falls back to a full rescan).
//!
//! ## Layout
//!
//! ```text
//! <root>/snapshots/
//!   orders-0.snapshot
//!   payments-3.snapshot
//! ```
//!
//! ## Write Protocol
//!
//! A snapshot is written to `<name>.snapshot.tmp`, synced, then renamed over
//! the final path. A crash mid-write leaves either the previous snapshot or
//! none; it never leaves a half-written file under the committed name. Stale
//! temp files are ignored and overwritten by the next commit.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;

/// Filesystem store for the latest block index snapshot per log.
pub struct SnapshotStore {
    directory: PathBuf,
}

impl SnapshotStore {
    /// Open (or create) the snapshot directory under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let directory = root.as_ref().join("snapshots");
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    fn path(&self, log_name: &str) -> PathBuf {
        self.directory.join(format!("{}.snapshot", log_name))
    }

    /// Atomically replace the snapshot for `log_name` with `data`.
    pub fn commit(&self, log_name: &str, data: &[u8]) -> Result<()> {
        let final_path = self.path(log_name);
        let tmp_path = self.directory.join(format!("{}.snapshot.tmp", log_name));

        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_data()?;
        drop(file);

        std::fs::rename(&tmp_path, &final_path)?;

        info!(log = log_name, bytes = data.len(), "index snapshot committed");
        Ok(())
    }

    /// Latest committed snapshot for `log_name`, or `None` if there is none.
    pub fn latest(&self, log_name: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(log_name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove any snapshot for `log_name` (used by delete-on-close).
    pub fn remove(&self, log_name: &str) -> Result<()> {
        match std::fs::remove_file(self.path(log_name)) {
            Ok(()) => {
                debug!(log = log_name, "index snapshot removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
