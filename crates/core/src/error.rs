//! Error types for audiodb
//!
//! One taxonomy for the whole system, built with `thiserror`. The core never
//! retries or rolls back: every failure is surfaced to the immediate caller
//! with enough context to diagnose it. Multi-step operations (batch insert)
//! report how far they got instead of undoing the committed prefix.

use std::io;
use thiserror::Error;

/// Result type alias for audiodb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the audiodb database
#[derive(Debug, Error)]
pub enum Error {
    /// The file is not a compatible audiodb database
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// I/O failure (mapping, read, write, lock), fatal to the current
    /// operation and never retried internally
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A preallocated table has no room for the requested append;
    /// the database is left unchanged
    #[error("{table} capacity exhausted: need {needed} bytes, {available} free")]
    Capacity {
        /// Which table ran out of room
        table: &'static str,
        /// Bytes the append required
        needed: u64,
        /// Bytes remaining in the table
        available: u64,
    },

    /// Insert of a key that is already present; nothing is overwritten
    #[error("duplicate key: {0:?}")]
    DuplicateKey(String),

    /// Lookup of a key that is not in the database
    #[error("key not found: {0:?}")]
    KeyNotFound(String),

    /// Incoming vector dimension (or annotation length) disagrees with the
    /// database's fixed dimension
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimension the database was created with (or established on first insert)
        expected: u32,
        /// Dimension of the offending input
        got: u32,
    },

    /// A mutating operation was attempted on a read-only handle
    #[error("operation {0:?} requires a read-write handle")]
    InvalidMode(&'static str),

    /// A request that is well-formed but not valid for the current database
    /// state (double-enabling a feature, oversized key, out-of-range query
    /// offset, ...)
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Batch insert failed partway; the committed prefix stands and the
    /// header is the authoritative record of progress
    #[error("batch insert aborted after {committed} committed tracks: {cause}")]
    BatchAborted {
        /// Number of tracks fully committed before the failure
        committed: usize,
        /// The failure that stopped the batch
        cause: Box<Error>,
    },
}

/// Header-level rejection reasons, checked on every open
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Magic bytes do not identify any audiodb format
    #[error("not an audiodb database (magic {found:#010x})")]
    BadMagic {
        /// The magic value found in the file
        found: u32,
    },

    /// Magic bytes identify the pre-version-4 format, which is recognized
    /// only to report explicit incompatibility
    #[error("legacy audiodb format detected; this version cannot read it")]
    LegacyMagic,

    /// Version field differs from the one compiled version
    #[error("unsupported format version {found}, supported version is {supported}")]
    Version {
        /// Version found in the file
        found: u32,
        /// The single version this implementation supports
        supported: u32,
    },

    /// Stored header size differs from the compiled record size, i.e. the
    /// file comes from a build with a different field layout
    #[error("header size {found} does not match expected {expected}")]
    HeaderSize {
        /// Header size recorded in the file
        found: u32,
        /// Compiled header record size
        expected: u32,
    },
}
