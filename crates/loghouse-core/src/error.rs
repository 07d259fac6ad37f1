//! Error Types for the Core Codec
//!
//! This module defines the errors that can surface while encoding or decoding
//! the binary formats shared across the loghouse crates.
//!
//! ## Error Categories
//!
//! ### Data Integrity Errors
//! - `InvalidMagic`: A persisted file doesn't start with its expected magic bytes
//! - `CrcMismatch`: Corruption detected via checksum
//! - `CorruptFrame`: A frame's declared lengths don't fit inside its payload
//!
//! ### Version/Compatibility Errors
//! - `UnsupportedVersion`: Data was written by a newer format version
//! - `UnknownFrameType`: Frame type byte is neither message nor padding
//!
//! ## Usage
//!
//! All codec functions return `Result<T>` which is aliased to
//! `Result<T, Error>`, so errors propagate cleanly with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u16),

    #[error("CRC mismatch")]
    CrcMismatch,

    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("Unknown frame type: {0}")]
    UnknownFrameType(u8),
}
