pub mod commit;
pub mod entry;
pub mod error;
pub mod frame;

pub use commit::{CommitPosition, INVALID_POSITION};
pub use entry::LogEntry;
pub use error::{Error, Result};
