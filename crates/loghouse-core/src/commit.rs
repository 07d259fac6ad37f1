//! Commit Position Watermark
//!
//! The commit position marks the highest log position that the enclosing
//! replication layer has agreed on. Everything in this subsystem only *reads*
//! the watermark: readers use it to gate visibility, and the block index
//! controller uses it to avoid indexing data that could still be truncated
//! away.
//!
//! The watermark is a single shared atomic. Writers to it live outside this
//! subsystem; updates are monotonic (a stale update can never move the
//! watermark backwards).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Sentinel for "no position": the watermark before anything is committed,
/// and the value of absent provenance pointers.
pub const INVALID_POSITION: i64 = -1;

/// Shared, monotonically non-decreasing commit watermark.
///
/// Cheap to clone; all clones observe the same value.
#[derive(Clone, Debug)]
pub struct CommitPosition {
    inner: Arc<AtomicI64>,
}

impl CommitPosition {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicI64::new(INVALID_POSITION)),
        }
    }

    /// Current watermark, or [`INVALID_POSITION`] if nothing is committed yet.
    pub fn get(&self) -> i64 {
        self.inner.load(Ordering::Acquire)
    }

    /// Advance the watermark. Stale values are ignored, the watermark never
    /// moves backwards.
    pub fn advance(&self, position: i64) {
        self.inner.fetch_max(position, Ordering::AcqRel);
    }
}

impl Default for CommitPosition {
    fn default() -> Self {
        Self::new()
    }
}
